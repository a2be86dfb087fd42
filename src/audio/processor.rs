//! # Audio Processing and Validation
//!
//! Validates, converts, normalizes and chunks WAV audio before it reaches a speech provider
//! or the voice biometric model.
//!
//! ## Key Functions:
//! - **Format validation**: header parsing, duration, advisory issues
//! - **Purpose validation**: duration windows for transcription vs. voice authentication
//! - **Preprocessing**: sample rate / channel / bit-depth conversion through a [`Transcoder`]
//! - **Normalization**: peak normalization with headroom
//! - **Chunking**: fixed-length, self-contained WAV windows

use crate::audio::format::{self, AudioFormat, FormatValidation, WAV_HEADER_LEN};
use crate::audio::pcm;
use crate::audio::transcoder::Transcoder;
use crate::context::RequestContext;
use crate::error::SpeechError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Peaks at or below this level are considered quiet and left alone by `normalize`.
const NORMALIZE_FLOOR: f32 = 0.1;

/// Target peak after normalization (leaves headroom below full scale).
const NORMALIZE_TARGET: f32 = 0.95;

/// What an audio buffer is going to be used for. Each purpose has its own acceptance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPurpose {
    Transcription,
    VoiceAuth,
}

impl std::str::FromStr for AudioPurpose {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcription" | "stt" => Ok(AudioPurpose::Transcription),
            "voice_auth" | "voice-auth" | "auth" => Ok(AudioPurpose::VoiceAuth),
            other => Err(SpeechError::validation(format!("unknown audio purpose: {}", other))),
        }
    }
}

/// Acceptance window for one purpose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurposeLimits {
    pub min_duration: f64,
    pub max_duration: f64,
    /// Below this rate the buffer is accepted with an advisory issue.
    pub recommended_min_rate: u32,
}

/// Audio processing and validation utilities.
///
/// ## Purpose:
/// One instance is shared (behind `Arc`) by the provider gateway and the voice
/// authenticator. It holds the canonical format everything is compared against and
/// the transcoder used for conversions.
pub struct AudioProcessor {
    canonical: AudioFormat,
    transcoder: Arc<dyn Transcoder>,
    transcription: PurposeLimits,
    voice_auth: PurposeLimits,
}

impl AudioProcessor {
    pub fn new(canonical: AudioFormat, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            canonical,
            transcoder,
            transcription: PurposeLimits {
                min_duration: 0.5,
                max_duration: 300.0,
                recommended_min_rate: 8000,
            },
            voice_auth: PurposeLimits {
                min_duration: 2.0,
                max_duration: 30.0,
                recommended_min_rate: 16000,
            },
        }
    }

    /// Override the per-purpose acceptance windows (taken from configuration).
    pub fn with_limits(mut self, transcription: PurposeLimits, voice_auth: PurposeLimits) -> Self {
        self.transcription = transcription;
        self.voice_auth = voice_auth;
        self
    }

    pub fn canonical_format(&self) -> AudioFormat {
        self.canonical
    }

    pub fn limits(&self, purpose: AudioPurpose) -> PurposeLimits {
        match purpose {
            AudioPurpose::Transcription => self.transcription,
            AudioPurpose::VoiceAuth => self.voice_auth,
        }
    }

    pub fn transcoder_name(&self) -> &'static str {
        self.transcoder.name()
    }

    /// Validate the structure of an audio buffer. See [`format::inspect`] for the rules.
    pub fn validate_format(&self, data: &[u8]) -> FormatValidation {
        format::inspect(data, &self.canonical)
    }

    /// Validate an audio buffer for a specific purpose.
    ///
    /// Adds duration-window checks ("too short" / "too long", both critical) and a
    /// low-sample-rate advisory on top of [`validate_format`](Self::validate_format).
    pub fn validate_for(&self, data: &[u8], purpose: AudioPurpose) -> FormatValidation {
        let mut validation = self.validate_format(data);
        if !validation.is_valid {
            return validation;
        }

        let limits = self.limits(purpose);
        if validation.duration_secs < limits.min_duration {
            validation.issues.push(format!(
                "audio too short: {:.2}s (minimum {:.2}s)",
                validation.duration_secs, limits.min_duration
            ));
        }
        if validation.duration_secs > limits.max_duration {
            validation.issues.push(format!(
                "audio too long: {:.2}s (maximum {:.2}s)",
                validation.duration_secs, limits.max_duration
            ));
        }
        if let Some(fmt) = validation.format {
            if fmt.sample_rate < limits.recommended_min_rate {
                validation.issues.push(format!(
                    "sample rate {} Hz is low, at least {} Hz recommended",
                    fmt.sample_rate, limits.recommended_min_rate
                ));
            }
        }

        validation.is_valid = !validation.issues.iter().any(|issue| is_critical(issue));
        validation
    }

    /// Convert audio to `target` (rate, channels, bit depth).
    ///
    /// Returns the input unchanged when it already matches. The conversion runs under `ctx`,
    /// so a cancelled or expired request stops waiting on the transcoder.
    pub async fn preprocess(
        &self,
        data: &[u8],
        target: &AudioFormat,
        ctx: &RequestContext,
    ) -> Result<Vec<u8>, SpeechError> {
        let header = format::parse_header(data).map_err(SpeechError::validation)?;
        if header.format == *target {
            return Ok(data.to_vec());
        }

        debug!(
            transcoder = self.transcoder.name(),
            from_rate = header.format.sample_rate,
            to_rate = target.sample_rate,
            from_channels = header.format.channels,
            to_channels = target.channels,
            "Converting audio"
        );

        ctx.run("audio preprocessing", self.transcoder.convert(data, target))
            .await
    }

    /// Sample-rate-only conversion.
    pub async fn resample(
        &self,
        data: &[u8],
        target_rate: u32,
        ctx: &RequestContext,
    ) -> Result<Vec<u8>, SpeechError> {
        let header = format::parse_header(data).map_err(SpeechError::validation)?;
        let target = AudioFormat {
            sample_rate: target_rate,
            ..header.format
        };
        self.preprocess(data, &target, ctx).await
    }

    /// Peak-normalize audio to 0.95 of full scale.
    ///
    /// ## Process:
    /// 1. Decode samples according to the header's bit depth
    /// 2. Find the peak absolute amplitude
    /// 3. If the peak is above 0.1, scale every sample by `0.95 / peak`
    /// 4. Re-encode behind the original header bytes
    ///
    /// Quiet audio (peak ≤ 0.1) is returned untouched so background noise is not amplified.
    pub fn normalize(&self, data: &[u8]) -> Result<Vec<u8>, SpeechError> {
        let header = format::parse_header(data).map_err(SpeechError::validation)?;
        let bit_depth = header.format.bit_depth;

        let mut samples = pcm::decode(&data[WAV_HEADER_LEN..], bit_depth);
        let peak = pcm::peak(&samples);
        if peak <= NORMALIZE_FLOOR {
            return Ok(data.to_vec());
        }

        let gain = NORMALIZE_TARGET / peak;
        for sample in &mut samples {
            *sample *= gain;
        }

        let encoded = pcm::encode(&samples, bit_depth);
        let mut out = Vec::with_capacity(data.len());
        out.extend_from_slice(&data[..WAV_HEADER_LEN]);
        out.extend_from_slice(&encoded);
        // Keep any trailing partial-sample bytes so the length (and header) stay consistent.
        let consumed = WAV_HEADER_LEN + encoded.len();
        if consumed < data.len() {
            out.extend_from_slice(&data[consumed..]);
        }
        Ok(out)
    }

    /// Split audio into consecutive windows of `chunk_seconds`.
    ///
    /// Each chunk is a complete WAV buffer with its own header. The last chunk holds
    /// whatever remains and may be shorter.
    pub fn chunk(&self, data: &[u8], chunk_seconds: f64) -> Result<Vec<Vec<u8>>, SpeechError> {
        if !(chunk_seconds > 0.0) || !chunk_seconds.is_finite() {
            return Err(SpeechError::validation(format!(
                "chunk duration must be positive, got {}",
                chunk_seconds
            )));
        }

        let header = format::parse_header(data).map_err(SpeechError::validation)?;
        let block = header.format.block_align().max(1);
        let frames_per_chunk = ((header.format.sample_rate as f64 * chunk_seconds).floor() as usize).max(1);
        let chunk_bytes = frames_per_chunk * block;

        let pcm_data = &data[WAV_HEADER_LEN..];
        let usable = pcm_data.len() - pcm_data.len() % block;

        Ok(pcm_data[..usable]
            .chunks(chunk_bytes)
            .map(|window| format::wrap_pcm(&header.format, window))
            .collect())
    }
}

/// Issues that make a buffer unusable, as opposed to advisory ones.
pub fn is_critical(issue: &str) -> bool {
    ["too short", "too long", "too small", "missing", "invalid", "unsupported"]
        .iter()
        .any(|keyword| issue.contains(keyword))
}
