//! # Speech Orchestrator
//!
//! The engine's front door. Ties sessions, providers and voice biometrics together and
//! is what the HTTP handlers talk to.
//!
//! ## Session-Bound Operations:
//! - **process_voice_query**: transcribe audio inside a session and record a
//!   `speech_to_text` interaction
//! - **generate_voice_response**: synthesize text inside a session and record a
//!   `text_to_speech` interaction
//!
//! Interaction recording is best-effort: if the repository write fails the caller still
//! gets the transcription or audio, and the failure is logged.
//!
//! ## Construction:
//! [`SpeechOrchestrator::from_config`] picks every backend (storage, TTS, STT, transcoder)
//! once from configuration. Tests build one from parts with [`SpeechOrchestrator::new`].

use crate::audio::{
    AudioFormat, AudioProcessor, AudioPurpose, FfmpegTranscoder, FormatValidation, PcmTranscoder,
    PurposeLimits, Transcoder,
};
use crate::biometrics::{
    AuthenticationResult, QualityPolicy, SpectralEmbeddingModel, VoiceAuthSettings,
    VoiceBiometricAuthenticator, VoiceProfileSummary,
};
use crate::config::AppConfig;
use crate::context::{CancelToken, RequestContext};
use crate::error::SpeechError;
use crate::providers::command::CommandSttProvider;
use crate::providers::gateway::{self, SttDefaults, TtsDefaults};
use crate::providers::http::HttpSpeechService;
use crate::providers::{
    AudioResult, ContentValidation, GatewaySettings, Language, ProviderGateway, RateLimiter,
    SpeechToTextProvider, SttOptions, TextToSpeechProvider, TranscriptionResult, TtsOptions, Voice,
};
use crate::session::{
    CleanupReport, Interaction, InteractionKind, Session, SessionDurations, SessionStatus,
    SessionStore, SessionStoreStats, SessionType, SessionUpdate,
};
use crate::storage::{MemoryStore, SessionRepository, SledStore, VoiceProfileRepository};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Keep raw audio bytes on recorded interactions.
    pub retain_audio: bool,
    /// Deadline given to each request's [`RequestContext`].
    pub request_timeout: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retain_audio: false,
            request_timeout: Duration::from_secs(120),
            cleanup_interval: Duration::from_secs(300),
            cleanup_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceQueryResult {
    pub session_id: String,
    pub transcription: TranscriptionResult,
    /// `None` when the interaction could not be recorded.
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceResponseResult {
    pub session_id: String,
    pub audio: AudioResult,
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub capacity: usize,
    pub available: usize,
}

/// Snapshot reported by the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub sessions: SessionStoreStats,
    pub voice_profiles: usize,
    pub rate_limiter: RateLimiterStats,
    pub tts_provider: String,
    pub stt_provider: String,
    pub transcoder: String,
}

pub struct SpeechOrchestrator {
    sessions: Arc<SessionStore>,
    gateway: Arc<ProviderGateway>,
    authenticator: VoiceBiometricAuthenticator,
    processor: Arc<AudioProcessor>,
    settings: OrchestratorSettings,
}

impl SpeechOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        gateway: Arc<ProviderGateway>,
        authenticator: VoiceBiometricAuthenticator,
        processor: Arc<AudioProcessor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sessions,
            gateway,
            authenticator,
            processor,
            settings,
        }
    }

    /// Build the engine and all of its backends from configuration.
    ///
    /// ## Backend Selection:
    /// - `audio.transcoder`: `native` → [`PcmTranscoder`], `ffmpeg` → [`FfmpegTranscoder`]
    /// - `storage.backend`: `memory` → [`MemoryStore`], `sled` → [`SledStore`] at `storage.path`
    /// - `providers.tts.backend`: `http` → [`HttpSpeechService`]
    /// - `providers.stt.backend`: `http` → [`HttpSpeechService`], `command` → [`CommandSttProvider`]
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let audio = &config.audio;
        let canonical = AudioFormat::wav(audio.sample_rate, audio.channels, audio.bit_depth);
        let transcoder: Arc<dyn Transcoder> = match audio.transcoder.as_str() {
            "ffmpeg" => Arc::new(FfmpegTranscoder::new(&audio.ffmpeg_path)),
            _ => Arc::new(PcmTranscoder),
        };
        let processor = Arc::new(AudioProcessor::new(canonical, transcoder).with_limits(
            PurposeLimits {
                min_duration: audio.stt_min_duration_secs,
                max_duration: audio.stt_max_duration_secs,
                recommended_min_rate: 8000,
            },
            PurposeLimits {
                min_duration: config.voice_auth.min_audio_duration_secs,
                max_duration: config.voice_auth.max_audio_duration_secs,
                recommended_min_rate: 16000,
            },
        ));

        let (session_repository, profile_repository): (
            Arc<dyn SessionRepository>,
            Arc<dyn VoiceProfileRepository>,
        ) = match config.storage.backend.as_str() {
            "sled" => {
                let store = Arc::new(SledStore::open(&config.storage.path)?);
                (store.clone(), store)
            }
            _ => {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

        let providers = &config.providers;
        let call_timeout = Duration::from_secs(providers.call_timeout_secs);
        let tts: Arc<dyn TextToSpeechProvider> = Arc::new(HttpSpeechService::new(
            &providers.tts.base_url,
            Some(providers.tts.api_key.clone()),
            call_timeout,
        )?);
        let stt: Arc<dyn SpeechToTextProvider> = match providers.stt.backend.as_str() {
            "command" => Arc::new(CommandSttProvider::new(
                &providers.stt.command,
                providers.stt.args.clone(),
            )),
            _ => Arc::new(HttpSpeechService::new(
                &providers.stt.base_url,
                Some(providers.stt.api_key.clone()),
                call_timeout,
            )?),
        };

        let limiter = Arc::new(RateLimiter::new(
            "speech-providers",
            providers.rate_limit.capacity,
            Duration::from_secs(providers.rate_limit.interval_secs),
        ));
        let gateway_settings = GatewaySettings {
            max_retries: providers.max_retries,
            call_timeout,
            retry_backoff: Duration::from_millis(providers.retry_backoff_ms),
            tts: TtsDefaults {
                voice: providers.tts.voice.clone(),
                language: providers.tts.language.clone(),
                speed: providers.tts.speed,
                format: providers.tts.format.clone(),
                quality: providers.tts.quality.clone(),
                stability: providers.tts.stability,
                clarity: providers.tts.clarity,
            },
            stt: SttDefaults {
                language: providers.stt.language.clone(),
                model: providers.stt.model.clone(),
                confidence_threshold: providers.stt.confidence_threshold,
                min_duration: audio.stt_min_duration_secs,
                max_duration: audio.stt_max_duration_secs,
                required_format: canonical,
            },
        };
        let gateway = Arc::new(ProviderGateway::new(
            tts,
            stt,
            processor.clone(),
            limiter,
            gateway_settings,
        ));

        let auth = &config.voice_auth;
        let authenticator = VoiceBiometricAuthenticator::new(
            processor.clone(),
            Arc::new(SpectralEmbeddingModel::new(auth.embedding_dimension)),
            profile_repository,
            VoiceAuthSettings {
                min_samples: auth.min_samples,
                max_samples: auth.max_samples,
                similarity_threshold: auth.similarity_threshold,
                update_threshold: auth.update_threshold,
                quality: QualityPolicy {
                    duplicate_ceiling: auth.duplicate_ceiling,
                    duplicate_score: auth.duplicate_score,
                    minimum: auth.quality_minimum,
                },
            },
        );

        let sessions_config = &config.sessions;
        let durations = SessionDurations {
            consultation: chrono::Duration::minutes(sessions_config.consultation_minutes),
            transcription: chrono::Duration::minutes(sessions_config.transcription_minutes),
            voice_auth: chrono::Duration::minutes(sessions_config.voice_auth_minutes),
            general: chrono::Duration::minutes(sessions_config.general_minutes),
        };
        let sessions = Arc::new(SessionStore::new(
            session_repository,
            durations,
            chrono::Duration::hours(sessions_config.retention_hours),
        ));

        info!(
            storage = %config.storage.backend,
            tts = gateway.tts_provider_name(),
            stt = gateway.stt_provider_name(),
            transcoder = processor.transcoder_name(),
            "Speech engine initialized"
        );

        Ok(Self::new(
            sessions,
            gateway,
            authenticator,
            processor,
            OrchestratorSettings {
                retain_audio: sessions_config.retain_audio,
                request_timeout: Duration::from_secs(config.server.request_timeout_secs),
                cleanup_interval: Duration::from_secs(sessions_config.cleanup_interval_secs),
                cleanup_timeout: Duration::from_secs(sessions_config.cleanup_timeout_secs),
            },
        ))
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// A fresh context carrying the configured per-request deadline.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.settings.request_timeout)
    }

    /// Start the rate-limiter refill and the session-expiry sweep. Both stop when `token`
    /// is cancelled.
    pub fn spawn_background_tasks(&self, token: CancelToken) -> Vec<JoinHandle<()>> {
        vec![
            self.gateway.limiter().spawn_refill(token.clone()),
            self.sessions.spawn_cleanup(
                self.settings.cleanup_interval,
                self.settings.cleanup_timeout,
                token,
            ),
        ]
    }

    // Sessions

    pub async fn create_session(
        &self,
        user_id: &str,
        session_type: SessionType,
        metadata: HashMap<String, String>,
    ) -> Result<Session, SpeechError> {
        self.sessions.create_session(user_id, session_type, metadata).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, SpeechError> {
        self.sessions.get_session(session_id).await
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Session, SpeechError> {
        self.sessions.update_session(session_id, update).await
    }

    pub async fn end_session(&self, session_id: &str) -> Result<Session, SpeechError> {
        self.sessions.end_session(session_id).await
    }

    pub async fn user_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError> {
        self.sessions.user_sessions(user_id, limit).await
    }

    pub async fn session_interactions(&self, session_id: &str) -> Result<Vec<Interaction>, SpeechError> {
        self.sessions.interactions(session_id).await
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<CleanupReport, SpeechError> {
        self.sessions.cleanup_expired_sessions().await
    }

    /// Transcribe `audio` within a session and record the exchange.
    ///
    /// ## Errors:
    /// - `NotFound` / `SessionExpired` / `SessionClosed` if the session is not usable
    /// - `Validation` if the session type does not take speech input, or for bad audio
    /// - any gateway error
    pub async fn process_voice_query(
        &self,
        session_id: &str,
        audio: &[u8],
        options: SttOptions,
        ctx: &RequestContext,
    ) -> Result<VoiceQueryResult, SpeechError> {
        let session = self.usable_session(session_id, InteractionKind::SpeechToText).await?;

        let transcription = self.gateway.transcribe(audio, options, ctx).await?;
        if ctx.is_done() {
            return Err(SpeechError::Cancelled("voice query".to_string()));
        }

        let mut interaction = Interaction::new(InteractionKind::SpeechToText, transcription.text.clone());
        interaction.confidence = transcription.confidence;
        interaction.processing_time_ms = transcription.processing_time_ms;
        interaction.options = HashMap::from([
            ("language".to_string(), transcription.language.clone()),
            ("model".to_string(), transcription.model.clone()),
        ]);
        if self.settings.retain_audio {
            interaction.input_audio = Some(audio.to_vec());
        }

        let interaction_id = self.record(&session.id, interaction).await;
        Ok(VoiceQueryResult {
            session_id: session.id,
            transcription,
            interaction_id,
        })
    }

    /// Synthesize `text` within a session and record the exchange.
    pub async fn generate_voice_response(
        &self,
        session_id: &str,
        text: &str,
        options: TtsOptions,
        ctx: &RequestContext,
    ) -> Result<VoiceResponseResult, SpeechError> {
        let session = self.usable_session(session_id, InteractionKind::TextToSpeech).await?;

        let language = options
            .language
            .clone()
            .filter(|language| !language.trim().is_empty())
            .unwrap_or_else(|| self.gateway.settings().tts.language.clone());
        let audio = self.gateway.synthesize(text, options, ctx).await?;
        if ctx.is_done() {
            return Err(SpeechError::Cancelled("voice response".to_string()));
        }

        let mut interaction = Interaction::new(InteractionKind::TextToSpeech, text);
        interaction.confidence = 1.0;
        interaction.processing_time_ms = audio.processing_time_ms;
        interaction.options = HashMap::from([
            ("voice".to_string(), audio.voice.clone()),
            ("language".to_string(), language),
            ("quality".to_string(), audio.quality.clone()),
        ]);
        if self.settings.retain_audio {
            interaction.output_audio = Some(audio.audio.clone());
        }

        let interaction_id = self.record(&session.id, interaction).await;
        Ok(VoiceResponseResult {
            session_id: session.id,
            audio,
            interaction_id,
        })
    }

    // Sessionless provider access

    pub async fn transcribe(
        &self,
        audio: &[u8],
        options: SttOptions,
        ctx: &RequestContext,
    ) -> Result<TranscriptionResult, SpeechError> {
        self.gateway.transcribe(audio, options, ctx).await
    }

    pub async fn synthesize(
        &self,
        text: &str,
        options: TtsOptions,
        ctx: &RequestContext,
    ) -> Result<AudioResult, SpeechError> {
        self.gateway.synthesize(text, options, ctx).await
    }

    pub fn validate_text(&self, text: &str) -> ContentValidation {
        gateway::validate_text(text)
    }

    pub fn validate_audio_input(&self, audio: &[u8], purpose: AudioPurpose) -> FormatValidation {
        self.processor.validate_for(audio, purpose)
    }

    pub async fn list_voices(&self, ctx: &RequestContext) -> Result<Vec<Voice>, SpeechError> {
        self.gateway.list_voices(ctx).await
    }

    pub async fn list_languages(&self, ctx: &RequestContext) -> Result<Vec<Language>, SpeechError> {
        self.gateway.list_languages(ctx).await
    }

    // Voice biometrics

    pub async fn enroll_voice(
        &self,
        user_id: &str,
        samples: &[Vec<u8>],
        ctx: &RequestContext,
    ) -> Result<VoiceProfileSummary, SpeechError> {
        if user_id.trim().is_empty() {
            return Err(SpeechError::validation("user_id is required"));
        }
        let profile = self.authenticator.enroll(user_id, samples, ctx).await?;
        Ok(VoiceProfileSummary::from(&profile))
    }

    pub async fn authenticate_voice(
        &self,
        user_id: &str,
        audio: &[u8],
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult, SpeechError> {
        self.authenticator.authenticate(user_id, audio, ctx).await
    }

    pub async fn voice_profile(&self, user_id: &str) -> Result<VoiceProfileSummary, SpeechError> {
        let profile = self.authenticator.profile(user_id).await?;
        Ok(VoiceProfileSummary::from(&profile))
    }

    pub async fn delete_voice_profile(&self, user_id: &str) -> Result<(), SpeechError> {
        self.authenticator.delete_profile(user_id).await
    }

    pub async fn stats(&self) -> Result<EngineStats, SpeechError> {
        let limiter = self.gateway.limiter();
        Ok(EngineStats {
            sessions: self.sessions.stats().await?,
            voice_profiles: self.authenticator.profile_count().await?,
            rate_limiter: RateLimiterStats {
                capacity: limiter.capacity(),
                available: limiter.available(),
            },
            tts_provider: self.gateway.tts_provider_name().to_string(),
            stt_provider: self.gateway.stt_provider_name().to_string(),
            transcoder: self.processor.transcoder_name().to_string(),
        })
    }

    /// The session, if it is active and its type takes `kind` interactions.
    async fn usable_session(&self, session_id: &str, kind: InteractionKind) -> Result<Session, SpeechError> {
        let session = self.sessions.get_session(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(SpeechError::SessionClosed {
                id: session.id,
                status: session.status.to_string(),
            });
        }
        if !session.session_type.accepts(kind) {
            return Err(SpeechError::validation(format!(
                "{} sessions do not support {}",
                session.session_type,
                kind.as_str()
            )));
        }
        Ok(session)
    }

    async fn record(&self, session_id: &str, interaction: Interaction) -> Option<String> {
        let interaction_id = interaction.id.clone();
        let kind = interaction.kind;
        match self.sessions.add_interaction(session_id, interaction).await {
            Ok(()) => Some(interaction_id),
            Err(err) => {
                warn!(
                    session_id,
                    kind = kind.as_str(),
                    error = %err,
                    "Failed to record interaction"
                );
                None
            }
        }
    }
}
