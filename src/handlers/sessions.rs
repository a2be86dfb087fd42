//! # Session Handlers
//!
//! ## Endpoints (under `/api/v1/speech`):
//! - `POST /sessions`: create a session
//! - `GET /sessions?user_id=..&limit=..`: a user's sessions, newest first
//! - `GET /sessions/{id}`: one session (409 once expired)
//! - `PATCH /sessions/{id}`: change status, expiry or metadata
//! - `DELETE /sessions/{id}`: end a session
//! - `GET /sessions/{id}/interactions`: interaction history
//! - `POST /sessions/{id}/query`: multipart audio → transcription, recorded in the session
//! - `POST /sessions/{id}/response`: JSON text → audio bytes, recorded in the session
//!
//! Session bodies never include raw interaction audio, only whether it was kept.

use crate::error::{AppError, AppResult};
use crate::handlers::multipart::read_form;
use crate::handlers::speech::{audio_response, stt_options_from, SynthesizeRequest};
use crate::session::{Interaction, InteractionKind, Session, SessionStatus, SessionType, SessionUpdate};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub session_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub user_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub interaction_count: usize,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            interaction_count: session.interactions.len(),
            id: session.id,
            user_id: session.user_id,
            session_type: session.session_type,
            status: session.status,
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
            ended_at: session.ended_at,
            metadata: session.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    pub id: String,
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub confidence: f32,
    pub processing_time_ms: u64,
    pub options: HashMap<String, String>,
    pub input_audio_bytes: Option<usize>,
    pub output_audio_bytes: Option<usize>,
}

impl From<Interaction> for InteractionResponse {
    fn from(interaction: Interaction) -> Self {
        Self {
            input_audio_bytes: interaction.input_audio.as_ref().map(Vec::len),
            output_audio_bytes: interaction.output_audio.as_ref().map(Vec::len),
            id: interaction.id,
            kind: interaction.kind,
            timestamp: interaction.timestamp,
            text: interaction.text,
            confidence: interaction.confidence,
            processing_time_ms: interaction.processing_time_ms,
            options: interaction.options,
        }
    }
}

/// `POST /api/v1/speech/sessions`
///
/// ```json
/// { "user_id": "u1", "session_type": "consultation", "metadata": { "clinic": "north" } }
/// ```
pub async fn create_session(
    state: web::Data<AppState>,
    body: web::Json<CreateSessionRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let session_type: SessionType = request.session_type.parse()?;

    let session = state
        .orchestrator
        .create_session(&request.user_id, session_type, request.metadata)
        .await?;

    Ok(HttpResponse::Created().json(SessionResponse::from(session)))
}

pub async fn list_sessions(
    state: web::Data<AppState>,
    query: web::Query<SessionListQuery>,
) -> AppResult<HttpResponse> {
    let query = query.into_inner();
    let limit = query.limit.unwrap_or(20);
    let sessions = state.orchestrator.user_sessions(&query.user_id, limit).await?;
    let sessions: Vec<SessionResponse> = sessions.into_iter().map(SessionResponse::from).collect();

    Ok(HttpResponse::Ok().json(json!({
        "user_id": query.user_id,
        "count": sessions.len(),
        "sessions": sessions
    })))
}

pub async fn get_session(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let session = state.orchestrator.get_session(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(SessionResponse::from(session)))
}

pub async fn update_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateSessionRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    if request.status.is_some_and(|status| status.is_terminal()) {
        return Err(AppError::BadRequest(
            "use DELETE to end a session; expiry is set by the server".to_string(),
        ));
    }

    let update = SessionUpdate {
        status: request.status,
        expires_at: request.expires_at,
        ended_at: None,
        metadata: request.metadata,
    };
    let session = state.orchestrator.update_session(&path.into_inner(), update).await?;
    Ok(HttpResponse::Ok().json(SessionResponse::from(session)))
}

/// `DELETE /api/v1/speech/sessions/{id}`: ends the session. The record is kept.
pub async fn end_session(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let session = state.orchestrator.end_session(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(SessionResponse::from(session)))
}

pub async fn list_interactions(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let interactions: Vec<InteractionResponse> = state
        .orchestrator
        .session_interactions(&session_id)
        .await?
        .into_iter()
        .map(InteractionResponse::from)
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "count": interactions.len(),
        "interactions": interactions
    })))
}

/// `POST /api/v1/speech/sessions/{id}/query`
///
/// Multipart form: an `audio` WAV file plus optional `language`, `model`,
/// `confidence_threshold` and `word_timestamps` text fields.
pub async fn voice_query(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let max_bytes = state.get_config().audio.max_upload_bytes;
    let form = read_form(payload, max_bytes).await?;
    let audio = form.file("audio")?;
    let options = stt_options_from(&form)?;

    let ctx = state.orchestrator.request_context();
    let result = state
        .orchestrator
        .process_voice_query(&path.into_inner(), &audio.data, options, &ctx)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// `POST /api/v1/speech/sessions/{id}/response`
///
/// Same JSON body as `/synthesize`. Responds with the audio bytes; the interaction id is
/// returned in the `X-Interaction-Id` header when it was recorded.
pub async fn voice_response(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SynthesizeRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let ctx = state.orchestrator.request_context();
    let result = state
        .orchestrator
        .generate_voice_response(&path.into_inner(), &request.text, request.options, &ctx)
        .await?;

    let mut response = audio_response(&result.audio);
    if let Some(interaction_id) = &result.interaction_id {
        response.insert_header(("X-Interaction-Id", interaction_id.as_str()));
    }
    Ok(response.body(result.audio.audio))
}
