//! # Speech Providers
//!
//! Capability contracts for Text-to-Speech and Speech-to-Text backends, and the
//! resilience layer that wraps them.
//!
//! ## Layout:
//! - **mod.rs**: provider traits plus the option/result value types
//! - **rate_limiter**: token-bucket admission control for outbound calls
//! - **gateway**: validation, defaults, rate limiting and retries around a provider pair
//! - **http**: backend for an HTTP speech microservice (`reqwest`)
//! - **command**: backend that runs a local STT program per request (`tokio::process`)
//!
//! A concrete backend is chosen once, at construction time, from configuration. Nothing
//! downstream inspects which one it got.

pub mod command;
pub mod gateway;
pub mod http;
pub mod rate_limiter;

use crate::error::SpeechError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use gateway::{GatewaySettings, ProviderGateway};
pub use rate_limiter::RateLimiter;

/// Text-to-Speech backend.
#[async_trait]
pub trait TextToSpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Produce audio bytes for `text`. Options have already had defaults applied.
    async fn synthesize(&self, text: &str, options: &TtsOptions) -> Result<Vec<u8>, SpeechError>;

    async fn list_voices(&self) -> Result<Vec<Voice>, SpeechError>;
}

/// Speech-to-Text backend. May be a remote API or an out-of-process local model.
#[async_trait]
pub trait SpeechToTextProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe a WAV buffer that is already in the provider's required format.
    async fn transcribe(&self, audio: &[u8], options: &SttOptions) -> Result<Transcript, SpeechError>;

    async fn list_languages(&self) -> Result<Vec<Language>, SpeechError>;
}

/// Synthesis options. `None` fields are filled from configured defaults by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TtsOptions {
    pub voice: Option<String>,
    pub language: Option<String>,
    pub speed: Option<f32>,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub stability: Option<f32>,
    pub clarity: Option<f32>,
}

/// Transcription options. `None` fields are filled from configured defaults by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SttOptions {
    pub language: Option<String>,
    pub model: Option<String>,
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub word_timestamps: bool,
}

/// Audio produced by the gateway's `synthesize`.
#[derive(Debug, Clone, Serialize)]
pub struct AudioResult {
    #[serde(skip_serializing)]
    pub audio: Vec<u8>,
    pub format: String,
    pub size_bytes: usize,
    /// Estimated from word count at 150 words per minute.
    pub duration_secs: f64,
    pub voice: String,
    pub quality: String,
    pub provider: String,
    pub processing_time_ms: u64,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// What an STT backend returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
    #[serde(default)]
    pub segments: Vec<TextSegment>,
}

/// Gateway-level transcription result.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub model: String,
    pub audio_duration_secs: f64,
    pub processing_time_ms: u64,
    pub provider: String,
    pub words: Vec<WordTimestamp>,
    pub segments: Vec<TextSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Voice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Language {
    pub code: String,
    pub name: String,
}

impl Language {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

/// Result of checking text before synthesis.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContentValidation {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub char_count: usize,
    pub word_count: usize,
    pub estimated_duration_secs: f64,
}
