//! # HTTP Speech Service Backend
//!
//! Talks to a speech microservice that exposes TTS and STT over plain HTTP:
//!
//! | Method | Path          | Body                         | Response              |
//! |--------|---------------|------------------------------|-----------------------|
//! | POST   | `/synthesize` | JSON text + options          | audio bytes           |
//! | GET    | `/voices`     |                              | JSON `[Voice]`        |
//! | POST   | `/transcribe` | WAV bytes, options in query  | JSON `Transcript`     |
//! | GET    | `/languages`  |                              | JSON `[Language]`     |
//!
//! ## Status Mapping:
//! - 400/422 → `Validation` (never retried)
//! - 404 → `NotFound` (unknown voice/model, never retried)
//! - other 4xx → `Provider` with status (not retried)
//! - 5xx and transport failures → `Provider` (retried by the gateway)

use crate::error::SpeechError;
use crate::providers::{
    Language, SpeechToTextProvider, SttOptions, TextToSpeechProvider, Transcript, TtsOptions, Voice,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "x-api-key";

/// Client for one speech microservice. Implements both provider traits.
#[derive(Debug, Clone)]
pub struct HttpSpeechService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(flatten)]
    options: &'a TtsOptions,
}

impl HttpSpeechService {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SpeechError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| SpeechError::provider(None, format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }
}

fn map_status(status: StatusCode, body: String) -> SpeechError {
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SpeechError::Validation(message),
        StatusCode::NOT_FOUND => SpeechError::NotFound(message),
        other => SpeechError::provider(Some(other.as_u16()), message),
    }
}

#[async_trait]
impl TextToSpeechProvider for HttpSpeechService {
    fn name(&self) -> &str {
        "http"
    }

    async fn synthesize(&self, text: &str, options: &TtsOptions) -> Result<Vec<u8>, SpeechError> {
        debug!(url = %self.url("synthesize"), "POST synthesize");
        let request = self
            .client
            .post(self.url("synthesize"))
            .json(&SynthesizeRequest { text, options });

        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::provider(None, format!("failed to read audio body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, SpeechError> {
        let response = self.send(self.client.get(self.url("voices"))).await?;
        response
            .json()
            .await
            .map_err(|e| SpeechError::provider(None, format!("invalid voices response: {}", e)))
    }
}

#[async_trait]
impl SpeechToTextProvider for HttpSpeechService {
    fn name(&self) -> &str {
        "http"
    }

    async fn transcribe(&self, audio: &[u8], options: &SttOptions) -> Result<Transcript, SpeechError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(language) = &options.language {
            query.push(("language", language.clone()));
        }
        if let Some(model) = &options.model {
            query.push(("model", model.clone()));
        }
        if options.word_timestamps {
            query.push(("word_timestamps", "true".to_string()));
        }

        debug!(url = %self.url("transcribe"), bytes = audio.len(), "POST transcribe");
        let request = self
            .client
            .post(self.url("transcribe"))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(audio.to_vec());

        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| SpeechError::provider(None, format!("invalid transcript response: {}", e)))
    }

    async fn list_languages(&self) -> Result<Vec<Language>, SpeechError> {
        let response = self.send(self.client.get(self.url("languages"))).await?;
        response
            .json()
            .await
            .map_err(|e| SpeechError::provider(None, format!("invalid languages response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "bad text".into()),
            SpeechError::Validation(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "voice not found".into()),
            SpeechError::NotFound(_)
        ));

        let err = map_status(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(err.is_retryable());
        assert_eq!(
            err,
            SpeechError::provider(Some(503), "Service Unavailable")
        );

        assert!(!map_status(StatusCode::UNAUTHORIZED, "nope".into()).is_retryable());
    }

    #[test]
    fn test_url_joining() {
        let service = HttpSpeechService::new("http://speech:9000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(service.url("/voices"), "http://speech:9000/voices");
        assert_eq!(service.url("synthesize"), "http://speech:9000/synthesize");
    }

    #[test]
    fn test_synthesize_request_flattens_options() {
        let options = TtsOptions {
            voice: Some("narrator".into()),
            speed: Some(1.0),
            ..TtsOptions::default()
        };
        let body = serde_json::to_value(SynthesizeRequest { text: "hi", options: &options }).unwrap();
        assert_eq!(body["text"], "hi");
        assert_eq!(body["voice"], "narrator");
        assert_eq!(body["speed"], 1.0);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_retryable() {
        // Port 9 (discard) is closed on test machines; the connection is refused.
        let service = HttpSpeechService::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let err = service.list_voices().await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
    }
}
