//! Shared fixtures for unit tests: synthetic voice audio, scripted providers and a
//! repository that fails on demand.

use crate::audio::format::{self, AudioFormat};
use crate::audio::pcm;
use crate::error::SpeechError;
use crate::providers::{
    Language, SpeechToTextProvider, SttOptions, TextToSpeechProvider, Transcript, TtsOptions, Voice,
};
use crate::session::model::{Interaction, Session, SessionUpdate};
use crate::storage::{MemoryStore, SessionRepository, SessionStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Shape of a synthetic "voice": a harmonic series over a fundamental plus a little noise.
#[derive(Debug, Clone)]
pub struct VoiceSpec {
    pub fundamental: f32,
    pub harmonics: usize,
    pub noise: f32,
    pub amplitude: f32,
    pub format: AudioFormat,
}

impl Default for VoiceSpec {
    fn default() -> Self {
        Self {
            fundamental: 140.0,
            harmonics: 6,
            noise: 0.02,
            amplitude: 0.6,
            format: AudioFormat::speech(),
        }
    }
}

impl VoiceSpec {
    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_fundamental(mut self, fundamental: f32) -> Self {
        self.fundamental = fundamental;
        self
    }
}

/// Deterministic WAV clip for `voice`. Different seeds give different noise, same timbre.
pub fn synthetic_voice(voice: &VoiceSpec, seconds: f64, seed: u64) -> Vec<u8> {
    let rate = voice.format.sample_rate as f32;
    let frames = (voice.format.sample_rate as f64 * seconds) as usize;
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let norm: f32 = (1..=voice.harmonics).map(|k| 1.0 / k as f32).sum();

    let mut samples = Vec::with_capacity(frames * voice.format.channels as usize);
    for i in 0..frames {
        let t = i as f32 / rate;
        let mut value = 0.0f32;
        for k in 1..=voice.harmonics {
            let freq = voice.fundamental * k as f32;
            value += (2.0 * std::f32::consts::PI * freq * t).sin() / k as f32;
        }
        value = value / norm * voice.amplitude;

        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let noise = ((state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0;
        value += noise * voice.noise;

        for _ in 0..voice.format.channels {
            samples.push(value);
        }
    }

    wav_from_samples(&voice.format, &samples)
}

/// Wrap already-scaled interleaved samples in a canonical WAV buffer.
pub fn wav_from_samples(format: &AudioFormat, samples: &[f32]) -> Vec<u8> {
    format::wrap_pcm(format, &pcm::encode(samples, format.bit_depth))
}

/// TTS provider that records calls and can be told to fail.
#[derive(Default)]
pub struct ScriptedTts {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<SpeechError>>,
    last_options: Mutex<Option<TtsOptions>>,
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, errors: Vec<SpeechError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<TtsOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeechProvider for ScriptedTts {
    fn name(&self) -> &str {
        "scripted-tts"
    }

    async fn synthesize(&self, text: &str, options: &TtsOptions) -> Result<Vec<u8>, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("AUDIO:{}", text).into_bytes())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, SpeechError> {
        Ok(vec![Voice {
            id: "default".to_string(),
            name: "Default".to_string(),
            language: Some("en".to_string()),
            gender: None,
            labels: Default::default(),
        }])
    }
}

/// STT provider that returns a canned transcript.
pub struct ScriptedStt {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<SpeechError>>,
    response: Mutex<Transcript>,
    last_audio: Mutex<Option<Vec<u8>>>,
}

impl ScriptedStt {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            response: Mutex::new(Transcript {
                text: "hello world".to_string(),
                confidence: 0.92,
                ..Transcript::default()
            }),
            last_audio: Mutex::new(None),
        }
    }

    pub fn respond_with(&self, transcript: Transcript) {
        *self.response.lock().unwrap() = transcript;
    }

    pub fn fail_next(&self, errors: Vec<SpeechError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_audio(&self) -> Option<Vec<u8>> {
        self.last_audio.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToTextProvider for ScriptedStt {
    fn name(&self) -> &str {
        "scripted-stt"
    }

    async fn transcribe(&self, audio: &[u8], _options: &SttOptions) -> Result<Transcript, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_audio.lock().unwrap() = Some(audio.to_vec());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.response.lock().unwrap().clone())
    }

    async fn list_languages(&self) -> Result<Vec<Language>, SpeechError> {
        Ok(vec![Language::new("en", "English")])
    }
}

/// Session repository that delegates to a [`MemoryStore`] but can be told to fail appends.
#[derive(Default)]
pub struct FlakySessionRepository {
    inner: MemoryStore,
    fail_appends: AtomicBool,
}

impl FlakySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionRepository for FlakySessionRepository {
    async fn create(&self, session: &Session) -> Result<(), SpeechError> {
        self.inner.create(session).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>, SpeechError> {
        self.inner.get_by_id(id).await
    }

    async fn update_fields(
        &self,
        id: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Session, SpeechError> {
        self.inner.update_fields(id, update, now).await
    }

    async fn append_interaction(&self, id: &str, interaction: &Interaction) -> Result<Session, SpeechError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(SpeechError::Storage("disk full".to_string()));
        }
        self.inner.append_interaction(id, interaction).await
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, SpeechError> {
        self.inner.mark_expired(now).await
    }

    async fn delete_expired_older_than(&self, threshold: DateTime<Utc>) -> Result<usize, SpeechError> {
        self.inner.delete_expired_older_than(threshold).await
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError> {
        self.inner.list_by_user(user_id, limit).await
    }

    async fn stats(&self) -> Result<SessionStats, SpeechError> {
        self.inner.stats().await
    }
}

/// Engine wired to scripted providers and in-memory storage.
pub fn scripted_orchestrator() -> (
    crate::orchestrator::SpeechOrchestrator,
    std::sync::Arc<ScriptedTts>,
    std::sync::Arc<ScriptedStt>,
) {
    use crate::audio::{AudioProcessor, PcmTranscoder};
    use crate::biometrics::{SpectralEmbeddingModel, VoiceAuthSettings, VoiceBiometricAuthenticator};
    use crate::orchestrator::{OrchestratorSettings, SpeechOrchestrator};
    use crate::providers::{GatewaySettings, ProviderGateway, RateLimiter};
    use crate::session::{SessionDurations, SessionStore};
    use std::sync::Arc;
    use std::time::Duration;

    let tts = Arc::new(ScriptedTts::new());
    let stt = Arc::new(ScriptedStt::new());
    let store = Arc::new(MemoryStore::new());
    let processor = Arc::new(AudioProcessor::new(AudioFormat::speech(), Arc::new(PcmTranscoder)));

    let gateway = Arc::new(ProviderGateway::new(
        tts.clone(),
        stt.clone(),
        processor.clone(),
        Arc::new(RateLimiter::new("test", 100, Duration::from_secs(60))),
        GatewaySettings::default(),
    ));
    let authenticator = VoiceBiometricAuthenticator::new(
        processor.clone(),
        Arc::new(SpectralEmbeddingModel::default()),
        store.clone(),
        VoiceAuthSettings::default(),
    );
    let sessions = Arc::new(SessionStore::new(
        store,
        SessionDurations::default(),
        chrono::Duration::hours(24),
    ));

    let orchestrator = SpeechOrchestrator::new(
        sessions,
        gateway,
        authenticator,
        processor,
        OrchestratorSettings::default(),
    );
    (orchestrator, tts, stt)
}

pub const MULTIPART_BOUNDARY: &str = "speech-engine-test-boundary";

/// A `multipart/form-data` body. Parts with a filename are sent as WAV files.
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        match filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/wav\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
            }
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY)
}
