//! # Provider Gateway
//!
//! The resilience layer between the engine and its speech backends.
//!
//! ## Call Pipeline:
//! 1. **Validate** input (text content or audio format/duration). Validation failures are
//!    returned immediately and never consume a rate-limit token.
//! 2. **Apply defaults** for any unset options.
//! 3. **Acquire** a rate-limit token (bounded by the request context).
//! 4. **Call** the provider with a per-attempt timeout.
//! 5. **Retry** 5xx/transport failures with linear backoff (`attempt × backoff`), all inside
//!    the request's single overall deadline. After `max_retries` the error becomes
//!    `ProviderUnavailable`.

use crate::audio::{AudioFormat, AudioProcessor};
use crate::context::RequestContext;
use crate::error::SpeechError;
use crate::providers::{
    AudioResult, ContentValidation, Language, RateLimiter, SpeechToTextProvider, SttOptions,
    TextToSpeechProvider, TranscriptionResult, TtsOptions, Voice,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest text accepted for synthesis, in characters.
pub const MAX_TEXT_CHARS: usize = 5000;

/// Speaking rate used to estimate synthesized audio length.
const WORDS_PER_MINUTE: f64 = 150.0;

/// Defaults applied to unset [`TtsOptions`].
#[derive(Debug, Clone)]
pub struct TtsDefaults {
    pub voice: String,
    pub language: String,
    pub speed: f32,
    pub format: String,
    pub quality: String,
    pub stability: f32,
    pub clarity: f32,
}

impl Default for TtsDefaults {
    fn default() -> Self {
        Self {
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

/// Defaults and limits for transcription.
#[derive(Debug, Clone)]
pub struct SttDefaults {
    pub language: String,
    pub model: String,
    pub confidence_threshold: f32,
    /// Shortest audio worth sending to a provider (seconds).
    pub min_duration: f64,
    /// Longest audio accepted (seconds).
    pub max_duration: f64,
    /// What the STT backend wants to receive.
    pub required_format: AudioFormat,
}

impl Default for SttDefaults {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            model: "base".to_string(),
            confidence_threshold: 0.5,
            min_duration: 0.5,
            max_duration: 300.0,
            required_format: AudioFormat::speech(),
        }
    }
}

/// Retry and timeout policy plus option defaults.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub max_retries: u32,
    /// Per-attempt timeout. The overall deadline comes from the request context.
    pub call_timeout: Duration,
    /// Unit of the linear backoff: attempt `n` waits `n × retry_backoff`.
    pub retry_backoff: Duration,
    pub tts: TtsDefaults,
    pub stt: SttDefaults,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            call_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
            tts: TtsDefaults::default(),
            stt: SttDefaults::default(),
        }
    }
}

/// Wraps one TTS and one STT provider with validation, rate limiting and retries.
pub struct ProviderGateway {
    tts: Arc<dyn TextToSpeechProvider>,
    stt: Arc<dyn SpeechToTextProvider>,
    processor: Arc<AudioProcessor>,
    limiter: Arc<RateLimiter>,
    settings: GatewaySettings,
}

impl ProviderGateway {
    pub fn new(
        tts: Arc<dyn TextToSpeechProvider>,
        stt: Arc<dyn SpeechToTextProvider>,
        processor: Arc<AudioProcessor>,
        limiter: Arc<RateLimiter>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            tts,
            stt,
            processor,
            limiter,
            settings,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn tts_provider_name(&self) -> &str {
        self.tts.name()
    }

    pub fn stt_provider_name(&self) -> &str {
        self.stt.name()
    }

    /// Synthesize speech for `text`.
    ///
    /// ## Errors:
    /// - `Validation` for empty, oversized (> 5000 chars) or control-character text
    /// - `RateLimitExceeded` if no token frees up before the deadline
    /// - `ProviderUnavailable` once retries are exhausted
    /// - any non-retryable provider error as-is (e.g. `NotFound` for an unknown voice)
    pub async fn synthesize(
        &self,
        text: &str,
        options: TtsOptions,
        ctx: &RequestContext,
    ) -> Result<AudioResult, SpeechError> {
        let started = Instant::now();

        let content = validate_text(text);
        if !content.is_valid {
            return Err(SpeechError::validation(content.issues.join("; ")));
        }

        let options = self.apply_tts_defaults(options);
        debug!(
            provider = self.tts.name(),
            chars = content.char_count,
            voice = options.voice.as_deref().unwrap_or_default(),
            "Synthesizing speech"
        );

        let audio = self
            .call_with_retries("synthesize", ctx, || self.tts.synthesize(text, &options))
            .await?;

        let result = AudioResult {
            size_bytes: audio.len(),
            audio,
            format: options.format.unwrap_or_default(),
            duration_secs: content.estimated_duration_secs,
            voice: options.voice.unwrap_or_default(),
            quality: options.quality.unwrap_or_default(),
            provider: self.tts.name().to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            generated_at: chrono::Utc::now(),
        };

        info!(
            provider = %result.provider,
            bytes = result.size_bytes,
            duration_secs = result.duration_secs,
            elapsed_ms = result.processing_time_ms,
            "Speech synthesized"
        );
        Ok(result)
    }

    /// Transcribe a WAV buffer.
    ///
    /// ## Steps:
    /// 1. Format validation (invalid audio is never sent anywhere)
    /// 2. Duration window: "too short" below the floor, "too long" above the ceiling
    /// 3. Conversion to the provider's required format when it differs
    /// 4. Rate-limited, retried provider call
    /// 5. Confidence filter against `confidence_threshold`
    pub async fn transcribe(
        &self,
        audio: &[u8],
        options: SttOptions,
        ctx: &RequestContext,
    ) -> Result<TranscriptionResult, SpeechError> {
        let started = Instant::now();

        let validation = self.processor.validate_format(audio);
        if !validation.is_valid {
            return Err(SpeechError::validation(validation.summary()));
        }
        let detected = validation
            .format
            .ok_or_else(|| SpeechError::validation("invalid audio header"))?;

        let limits = &self.settings.stt;
        if validation.duration_secs < limits.min_duration {
            return Err(SpeechError::validation(format!(
                "audio too short: {:.2}s (minimum {:.2}s)",
                validation.duration_secs, limits.min_duration
            )));
        }
        if validation.duration_secs > limits.max_duration {
            return Err(SpeechError::validation(format!(
                "audio too long: {:.2}s (maximum {:.2}s)",
                validation.duration_secs, limits.max_duration
            )));
        }

        let options = self.apply_stt_defaults(options);
        let threshold = options.confidence_threshold.unwrap_or(limits.confidence_threshold);

        let prepared = if detected == limits.required_format {
            audio.to_vec()
        } else {
            self.processor
                .preprocess(audio, &limits.required_format, ctx)
                .await?
        };

        debug!(
            provider = self.stt.name(),
            duration_secs = validation.duration_secs,
            converted = detected != limits.required_format,
            "Transcribing audio"
        );

        let transcript = self
            .call_with_retries("transcribe", ctx, || self.stt.transcribe(&prepared, &options))
            .await?;

        // NaN compares false and must not pass.
        let confident = transcript.confidence >= threshold;
        if !confident {
            return Err(SpeechError::validation(format!(
                "transcription confidence ({:.2}) below threshold ({:.2})",
                transcript.confidence, threshold
            )));
        }

        let result = TranscriptionResult {
            text: transcript.text,
            confidence: transcript.confidence.clamp(0.0, 1.0),
            language: transcript
                .language
                .or(options.language)
                .unwrap_or_else(|| limits.language.clone()),
            model: options.model.unwrap_or_else(|| limits.model.clone()),
            audio_duration_secs: validation.duration_secs,
            processing_time_ms: started.elapsed().as_millis() as u64,
            provider: self.stt.name().to_string(),
            words: transcript.words,
            segments: transcript.segments,
        };

        info!(
            provider = %result.provider,
            confidence = result.confidence,
            chars = result.text.len(),
            elapsed_ms = result.processing_time_ms,
            "Audio transcribed"
        );
        Ok(result)
    }

    pub async fn list_voices(&self, ctx: &RequestContext) -> Result<Vec<Voice>, SpeechError> {
        self.call_with_retries("list_voices", ctx, || self.tts.list_voices())
            .await
    }

    pub async fn list_languages(&self, ctx: &RequestContext) -> Result<Vec<Language>, SpeechError> {
        self.call_with_retries("list_languages", ctx, || self.stt.list_languages())
            .await
    }

    fn apply_tts_defaults(&self, mut options: TtsOptions) -> TtsOptions {
        let defaults = &self.settings.tts;
        options.voice = non_empty(options.voice).or_else(|| Some(defaults.voice.clone()));
        options.language = non_empty(options.language).or_else(|| Some(defaults.language.clone()));
        options.format = non_empty(options.format).or_else(|| Some(defaults.format.clone()));
        options.quality = non_empty(options.quality).or_else(|| Some(defaults.quality.clone()));
        options.speed = options.speed.filter(|s| *s > 0.0).or(Some(defaults.speed));
        options.stability = options.stability.or(Some(defaults.stability));
        options.clarity = options.clarity.or(Some(defaults.clarity));
        options
    }

    fn apply_stt_defaults(&self, mut options: SttOptions) -> SttOptions {
        let defaults = &self.settings.stt;
        options.language = non_empty(options.language).or_else(|| Some(defaults.language.clone()));
        options.model = non_empty(options.model).or_else(|| Some(defaults.model.clone()));
        options.confidence_threshold = options
            .confidence_threshold
            .or(Some(defaults.confidence_threshold));
        options
    }

    /// Rate-limited call with linear-backoff retries, all under `ctx`'s deadline.
    async fn call_with_retries<T, F, Fut>(
        &self,
        operation: &str,
        ctx: &RequestContext,
        mut call: F,
    ) -> Result<T, SpeechError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SpeechError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire(ctx).await?;

            let per_call = self.settings.call_timeout;
            let outcome = ctx
                .run(operation, async {
                    match tokio::time::timeout(per_call, call()).await {
                        Ok(result) => result,
                        Err(_) => Err(SpeechError::provider(
                            None,
                            format!("{} timed out after {}s", operation, per_call.as_secs_f64()),
                        )),
                    }
                })
                .await;

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            attempt += 1;
            if attempt > self.settings.max_retries {
                warn!(operation, attempts = attempt, error = %err, "Provider retries exhausted");
                return Err(SpeechError::ProviderUnavailable {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let backoff = self.settings.retry_backoff * attempt;
            warn!(
                operation,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Provider call failed, retrying"
            );
            ctx.sleep(operation, backoff).await?;
        }
    }
}

/// Check text before synthesis.
///
/// Rejects empty/whitespace-only text, text over 5000 characters, and control characters
/// other than newline, carriage return and tab.
pub fn validate_text(text: &str) -> ContentValidation {
    let char_count = text.chars().count();
    let word_count = text.split_whitespace().count();
    let mut issues = Vec::new();

    if text.trim().is_empty() {
        issues.push("text is empty".to_string());
    }
    if char_count > MAX_TEXT_CHARS {
        issues.push(format!(
            "text exceeds maximum length of {} characters",
            MAX_TEXT_CHARS
        ));
    }
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        issues.push("text contains control characters".to_string());
    }

    ContentValidation {
        is_valid: issues.is_empty(),
        issues,
        char_count,
        word_count,
        estimated_duration_secs: word_count as f64 / WORDS_PER_MINUTE * 60.0,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
