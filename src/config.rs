//! # Configuration Management
//!
//! Loads the engine's settings from several sources, highest priority first:
//!
//! 1. `HOST` / `PORT` environment variables (deployment platforms set these)
//! 2. `APP_`-prefixed environment variables, with `__` between nesting levels:
//!    `APP_SERVER__PORT=9000`, `APP_VOICE_AUTH__SIMILARITY_THRESHOLD=0.9`
//! 3. `config.toml` in the working directory (optional)
//! 4. Built-in defaults (the `Default` impls below)
//!
//! ## Sections:
//! - **server**: bind address and per-request deadline
//! - **audio**: canonical format, upload cap, STT duration window, transcoder
//! - **providers**: TTS/STT backends, option defaults, rate limit, retries
//! - **voice_auth**: enrollment/authentication thresholds and quality policy
//! - **sessions**: lifetimes per session type, cleanup sweep, retention
//! - **storage**: `memory` or `sled`
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys it changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub providers: ProvidersConfig,
    pub voice_auth: VoiceAuthConfig,
    pub sessions: SessionsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Overall deadline for one speech request (provider calls, retries and conversion).
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Canonical format for voice biometrics and the STT backend.
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub stt_min_duration_secs: f64,
    pub stt_max_duration_secs: f64,
    /// Largest accepted upload per audio field.
    pub max_upload_bytes: usize,
    /// `native` (in-process PCM conversion) or `ffmpeg`.
    pub transcoder: String,
    pub ffmpeg_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
            stt_min_duration_secs: 0.5,
            stt_max_duration_secs: 300.0,
            max_upload_bytes: 50 * 1024 * 1024,
            transcoder: "native".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub max_retries: u32,
    /// Timeout of a single provider attempt.
    pub call_timeout_secs: u64,
    /// Attempt `n` waits `n × retry_backoff_ms` before retrying.
    pub retry_backoff_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub tts: TtsConfig,
    pub stt: SttConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            call_timeout_secs: 30,
            retry_backoff_ms: 1000,
            rate_limit: RateLimitConfig::default(),
            tts: TtsConfig::default(),
            stt: SttConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per interval.
    pub capacity: usize,
    pub interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    /// Only `http` is built in.
    pub backend: String,
    pub base_url: String,
    /// Empty means no key is sent.
    pub api_key: String,
    pub voice: String,
    pub language: String,
    pub speed: f32,
    pub format: String,
    pub quality: String,
    pub stability: f32,
    pub clarity: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            base_url: "http://127.0.0.1:5002".to_string(),
            api_key: String::new(),
            voice: "default".to_string(),
            language: "en".to_string(),
            speed: 1.0,
            format: "mp3".to_string(),
            quality: "medium".to_string(),
            stability: 0.5,
            clarity: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    /// `http` (speech microservice) or `command` (local program per request).
    pub backend: String,
    pub base_url: String,
    pub api_key: String,
    pub command: String,
    pub args: Vec<String>,
    pub language: String,
    pub model: String,
    pub confidence_threshold: f32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            base_url: "http://127.0.0.1:5002".to_string(),
            api_key: String::new(),
            command: "whisper-cli".to_string(),
            args: Vec::new(),
            language: "en".to_string(),
            model: "base".to_string(),
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceAuthConfig {
    pub min_samples: usize,
    pub max_samples: usize,
    pub similarity_threshold: f64,
    /// A match at or above this refreshes the profile with the checked clip.
    pub update_threshold: f64,
    pub min_audio_duration_secs: f64,
    pub max_audio_duration_secs: f64,
    pub embedding_dimension: usize,
    pub quality_minimum: f64,
    /// Mean pairwise similarity above this is treated as duplicate samples...
    pub duplicate_ceiling: f64,
    /// ...and scored as this instead.
    pub duplicate_score: f64,
}

impl Default for VoiceAuthConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            max_samples: 10,
            similarity_threshold: 0.85,
            update_threshold: 0.90,
            min_audio_duration_secs: 2.0,
            max_audio_duration_secs: 30.0,
            embedding_dimension: 32,
            quality_minimum: 0.7,
            duplicate_ceiling: 0.95,
            duplicate_score: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    pub consultation_minutes: i64,
    pub transcription_minutes: i64,
    pub voice_auth_minutes: i64,
    pub general_minutes: i64,
    pub cleanup_interval_secs: u64,
    pub cleanup_timeout_secs: u64,
    /// Expired sessions are deleted after this many hours.
    pub retention_hours: i64,
    /// Keep raw input/output audio on recorded interactions.
    pub retain_audio: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            consultation_minutes: 120,
            transcription_minutes: 60,
            voice_auth_minutes: 15,
            general_minutes: 30,
            cleanup_interval_secs: 300,
            cleanup_timeout_secs: 30,
            retention_hours: 24,
            retain_audio: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` or `sled`.
    pub backend: String,
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: "data/speech-engine".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        let audio = &self.audio;
        if audio.sample_rate == 0 || audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio sample rate and channels must be greater than 0"));
        }
        if !matches!(audio.bit_depth, 8 | 16 | 32) {
            return Err(anyhow::anyhow!("Audio bit depth must be 8, 16 or 32"));
        }
        if audio.stt_min_duration_secs <= 0.0 || audio.stt_min_duration_secs >= audio.stt_max_duration_secs {
            return Err(anyhow::anyhow!(
                "STT duration window must satisfy 0 < min < max"
            ));
        }
        if audio.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }
        if !matches!(audio.transcoder.as_str(), "native" | "ffmpeg") {
            return Err(anyhow::anyhow!(
                "Unknown transcoder '{}' (expected native or ffmpeg)",
                audio.transcoder
            ));
        }

        let providers = &self.providers;
        if providers.rate_limit.capacity == 0 || providers.rate_limit.interval_secs == 0 {
            return Err(anyhow::anyhow!("Rate limit capacity and interval must be greater than 0"));
        }
        if providers.call_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Provider call timeout must be greater than 0"));
        }
        if providers.tts.backend != "http" {
            return Err(anyhow::anyhow!("Unknown TTS backend '{}'", providers.tts.backend));
        }
        if !matches!(providers.stt.backend.as_str(), "http" | "command") {
            return Err(anyhow::anyhow!("Unknown STT backend '{}'", providers.stt.backend));
        }
        if !(0.0..=1.0).contains(&providers.stt.confidence_threshold) {
            return Err(anyhow::anyhow!("STT confidence threshold must be within [0, 1]"));
        }

        let auth = &self.voice_auth;
        if auth.min_samples < 2 {
            return Err(anyhow::anyhow!("Voice auth min_samples must be at least 2"));
        }
        if auth.max_samples < auth.min_samples {
            return Err(anyhow::anyhow!("Voice auth max_samples must be >= min_samples"));
        }
        for (name, value) in [
            ("similarity_threshold", auth.similarity_threshold),
            ("update_threshold", auth.update_threshold),
            ("quality_minimum", auth.quality_minimum),
            ("duplicate_ceiling", auth.duplicate_ceiling),
            ("duplicate_score", auth.duplicate_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow::anyhow!("Voice auth {} must be within [0, 1]", name));
            }
        }
        if auth.min_audio_duration_secs <= 0.0 || auth.min_audio_duration_secs >= auth.max_audio_duration_secs {
            return Err(anyhow::anyhow!(
                "Voice auth duration window must satisfy 0 < min < max"
            ));
        }
        if auth.embedding_dimension == 0 {
            return Err(anyhow::anyhow!("Embedding dimension must be greater than 0"));
        }

        let sessions = &self.sessions;
        if [
            sessions.consultation_minutes,
            sessions.transcription_minutes,
            sessions.voice_auth_minutes,
            sessions.general_minutes,
        ]
        .iter()
        .any(|minutes| *minutes <= 0)
        {
            return Err(anyhow::anyhow!("Session durations must be greater than 0"));
        }
        if sessions.cleanup_interval_secs == 0 || sessions.cleanup_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Session cleanup interval and timeout must be greater than 0"));
        }
        if sessions.retention_hours < 0 {
            return Err(anyhow::anyhow!("Session retention cannot be negative"));
        }

        if !matches!(self.storage.backend.as_str(), "memory" | "sled") {
            return Err(anyhow::anyhow!(
                "Unknown storage backend '{}' (expected memory or sled)",
                self.storage.backend
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"voice_auth": {"similarity_threshold": 0.9}}`.
    ///
    /// The update is merged into the current settings key by key and the result is
    /// validated. On error `self` is left unchanged.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;
        if !partial.is_object() {
            return Err(anyhow::anyhow!("Configuration update must be a JSON object"));
        }

        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, &partial);
        let updated: AppConfig = serde_json::from_value(merged)?;
        updated.validate()?;

        *self = updated;
        Ok(())
    }
}

fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
