//! # Local STT Command Backend
//!
//! Runs a local speech-recognition program once per request. The WAV buffer is written to
//! the program's stdin and a JSON transcript is read from stdout:
//!
//! ```json
//! {"text": "hello world", "confidence": 0.91, "language": "en", "words": [], "segments": []}
//! ```
//!
//! A program that prints plain text instead is accepted too; the transcript then gets
//! `default_confidence`.
//!
//! The child is spawned with `kill_on_drop`, so a request that times out or is cancelled
//! does not leave a stray process behind.

use crate::error::SpeechError;
use crate::providers::{Language, SpeechToTextProvider, SttOptions, Transcript};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Largest input passed to the program.
const MAX_INPUT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CommandSttProvider {
    program: PathBuf,
    args: Vec<String>,
    default_confidence: f32,
    languages: Vec<Language>,
}

impl CommandSttProvider {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            default_confidence: 0.9,
            languages: default_languages(),
        }
    }

    pub fn with_default_confidence(mut self, confidence: f32) -> Self {
        self.default_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    fn parse_output(&self, stdout: &[u8], options: &SttOptions) -> Result<Transcript, SpeechError> {
        let raw = String::from_utf8_lossy(stdout);
        let trimmed = raw.trim();

        if trimmed.starts_with('{') {
            let transcript: Transcript = serde_json::from_str(trimmed).map_err(|e| {
                SpeechError::Internal(format!("STT program printed invalid JSON: {}", e))
            })?;
            return Ok(transcript);
        }

        Ok(Transcript {
            text: trimmed.to_string(),
            confidence: self.default_confidence,
            language: options.language.clone(),
            ..Transcript::default()
        })
    }
}

fn default_languages() -> Vec<Language> {
    [
        ("en", "English"),
        ("es", "Spanish"),
        ("fr", "French"),
        ("de", "German"),
        ("it", "Italian"),
        ("pt", "Portuguese"),
        ("nl", "Dutch"),
        ("ja", "Japanese"),
        ("zh", "Chinese"),
    ]
    .iter()
    .map(|(code, name)| Language::new(code, name))
    .collect()
}

#[async_trait]
impl SpeechToTextProvider for CommandSttProvider {
    fn name(&self) -> &str {
        "command"
    }

    async fn transcribe(&self, audio: &[u8], options: &SttOptions) -> Result<Transcript, SpeechError> {
        if audio.len() > MAX_INPUT_BYTES {
            return Err(SpeechError::validation(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(language) = &options.language {
            command.env("STT_LANGUAGE", language);
        }
        if let Some(model) = &options.model {
            command.env("STT_MODEL", model);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program.display(), bytes = audio.len(), "Spawning STT program");

        let mut child = command
            .spawn()
            .map_err(|e| SpeechError::provider(None, format!("failed to spawn STT program: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpeechError::Internal("failed to open STT program stdin".to_string()))?;
        stdin
            .write_all(audio)
            .await
            .map_err(|e| SpeechError::provider(None, format!("failed to write audio to STT program: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SpeechError::provider(None, format!("failed to read STT program output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::provider(
                None,
                format!("STT program failed ({}): {}", output.status, stderr.trim()),
            ));
        }

        self.parse_output(&output.stdout, options)
    }

    async fn list_languages(&self) -> Result<Vec<Language>, SpeechError> {
        Ok(self.languages.clone())
    }
}
