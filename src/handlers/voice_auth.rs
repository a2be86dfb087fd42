//! # Voice Authentication Handlers
//!
//! ## Endpoints (under `/api/v1/speech/auth`):
//! - `POST /enroll`: multipart `user_id` + one or more audio files (`audio`, `audio_1`, ...)
//! - `POST /authenticate`: multipart `user_id` + one `audio` file
//! - `GET /profiles/{user_id}`: profile summary (no embeddings)
//! - `DELETE /profiles/{user_id}`
//!
//! A failed authentication is a 200 with `is_authenticated: false` and a reason.

use crate::error::{AppError, AppResult};
use crate::handlers::multipart::read_form;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn enroll(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let max_bytes = state.get_config().audio.max_upload_bytes;
    let form = read_form(payload, max_bytes).await?;
    let user_id = form.required_text("user_id")?;

    let samples = form.files_with_prefix("audio");
    if samples.is_empty() {
        return Err(AppError::ValidationError("No audio files provided".to_string()));
    }

    let ctx = state.orchestrator.request_context();
    let profile = state.orchestrator.enroll_voice(user_id, &samples, &ctx).await?;
    info!(user_id, samples = samples.len(), "Voice enrollment request completed");

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "profile": profile
    })))
}

pub async fn authenticate(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let max_bytes = state.get_config().audio.max_upload_bytes;
    let form = read_form(payload, max_bytes).await?;
    let user_id = form.required_text("user_id")?;
    let audio = form.file("audio")?;

    let ctx = state.orchestrator.request_context();
    let result = state
        .orchestrator
        .authenticate_voice(user_id, &audio.data, &ctx)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

pub async fn get_profile(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let profile = state.orchestrator.voice_profile(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn delete_profile(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    state.orchestrator.delete_voice_profile(&user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user_id": user_id,
        "message": "Voice profile deleted"
    })))
}
