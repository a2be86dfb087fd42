//! # Speech Handlers
//!
//! Sessionless access to the speech providers and validators.
//!
//! ## Endpoints (under `/api/v1/speech`):
//! - `POST /transcribe`: multipart `audio` → transcription JSON
//! - `POST /synthesize`: JSON text → audio bytes
//! - `POST /validate`: multipart `audio` + `purpose` (`transcription` | `voice_auth`)
//! - `POST /validate-text`: JSON `{"text": ...}` → character/word counts and issues
//! - `GET /voices`, `GET /languages`: provider capabilities

use crate::audio::AudioPurpose;
use crate::error::AppResult;
use crate::handlers::multipart::{read_form, UploadForm};
use crate::providers::{AudioResult, SttOptions, TtsOptions};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, HttpResponseBuilder};
use serde::Deserialize;
use serde_json::json;

/// Text to synthesize plus optional [`TtsOptions`] at the top level:
///
/// ```json
/// { "text": "Your appointment is confirmed.", "voice": "narrator", "format": "wav" }
/// ```
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(flatten)]
    pub options: TtsOptions,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTextRequest {
    pub text: String,
}

/// Transcription options from optional multipart text fields.
pub fn stt_options_from(form: &UploadForm) -> AppResult<SttOptions> {
    Ok(SttOptions {
        language: form.text("language").map(str::to_string),
        model: form.text("model").map(str::to_string),
        confidence_threshold: form.parsed("confidence_threshold")?,
        word_timestamps: form.parsed("word_timestamps")?.unwrap_or(false),
    })
}

/// Response builder with the content type and metadata headers for synthesized audio.
pub fn audio_response(audio: &AudioResult) -> HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .content_type(content_type_for(&audio.format))
        .insert_header(("X-Audio-Duration", format!("{:.2}", audio.duration_secs)))
        .insert_header(("X-Voice", audio.voice.as_str()))
        .insert_header(("X-Provider", audio.provider.as_str()))
        .insert_header(("X-Processing-Time-Ms", audio.processing_time_ms.to_string()));
    builder
}

fn content_type_for(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "mp3" | "mpeg" => "audio/mpeg",
        "wav" | "wave" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

pub async fn transcribe(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let max_bytes = state.get_config().audio.max_upload_bytes;
    let form = read_form(payload, max_bytes).await?;
    let audio = form.file("audio")?;
    let options = stt_options_from(&form)?;

    let ctx = state.orchestrator.request_context();
    let result = state.orchestrator.transcribe(&audio.data, options, &ctx).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "filename": audio.filename,
        "transcription": result,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn synthesize(
    state: web::Data<AppState>,
    body: web::Json<SynthesizeRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let ctx = state.orchestrator.request_context();
    let result = state
        .orchestrator
        .synthesize(&request.text, request.options, &ctx)
        .await?;

    Ok(audio_response(&result).body(result.audio))
}

/// Check an audio upload without sending it anywhere. A failed check is still a 200 with
/// `is_valid: false` and the list of issues.
pub async fn validate_audio(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let max_bytes = state.get_config().audio.max_upload_bytes;
    let form = read_form(payload, max_bytes).await?;
    let audio = form.file("audio")?;
    let purpose: AudioPurpose = form.text("purpose").unwrap_or("transcription").parse()?;

    let validation = state.orchestrator.validate_audio_input(&audio.data, purpose);
    Ok(HttpResponse::Ok().json(json!({
        "purpose": purpose,
        "validation": validation
    })))
}

pub async fn validate_text(
    state: web::Data<AppState>,
    body: web::Json<ValidateTextRequest>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.orchestrator.validate_text(&body.text)))
}

pub async fn list_voices(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let ctx = state.orchestrator.request_context();
    let voices = state.orchestrator.list_voices(&ctx).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": voices.len(), "voices": voices })))
}

pub async fn list_languages(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let ctx = state.orchestrator.request_context();
    let languages = state.orchestrator.list_languages(&ctx).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": languages.len(), "languages": languages })))
}
