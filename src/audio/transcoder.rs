//! # Transcoders
//!
//! A [`Transcoder`] turns a WAV buffer into another sample rate / channel layout / bit depth.
//!
//! ## Implementations:
//! - **`PcmTranscoder`**: pure Rust. Linear-interpolation resampling, channel mixing, and
//!   bit-depth re-encoding. No external tools, so it is the default.
//! - **`FfmpegTranscoder`**: shells out to `ffmpeg`. Each call gets its own
//!   `tempfile::TempDir`, so concurrent conversions never share files, and the child process
//!   is killed if the caller stops waiting.

use crate::audio::format::{self, AudioFormat, WAV_HEADER_LEN};
use crate::audio::pcm;
use crate::error::SpeechError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Convert canonical WAV `data` into `target`. Output is a canonical WAV buffer.
    async fn convert(&self, data: &[u8], target: &AudioFormat) -> Result<Vec<u8>, SpeechError>;
}

/// In-process PCM conversion.
#[derive(Debug, Default, Clone)]
pub struct PcmTranscoder;

impl PcmTranscoder {
    /// Synchronous conversion; the async trait method runs this on the blocking pool.
    pub fn convert_sync(data: &[u8], target: &AudioFormat) -> Result<Vec<u8>, SpeechError> {
        let header = format::parse_header(data).map_err(SpeechError::validation)?;
        let source = header.format;
        if !target.is_supported_depth() || target.channels == 0 || target.sample_rate == 0 {
            return Err(SpeechError::validation(format!(
                "unsupported target format: {} Hz, {} channel(s), {}-bit",
                target.sample_rate, target.channels, target.bit_depth
            )));
        }

        let samples = pcm::decode(&data[WAV_HEADER_LEN..], source.bit_depth);
        let mixed = remix(&samples, source.channels as usize, target.channels as usize);
        let resampled = resample_linear(
            &mixed,
            target.channels as usize,
            source.sample_rate,
            target.sample_rate,
        );

        Ok(format::wrap_pcm(target, &pcm::encode(&resampled, target.bit_depth)))
    }
}

#[async_trait]
impl Transcoder for PcmTranscoder {
    fn name(&self) -> &'static str {
        "pcm"
    }

    async fn convert(&self, data: &[u8], target: &AudioFormat) -> Result<Vec<u8>, SpeechError> {
        let data = data.to_vec();
        let target = *target;
        tokio::task::spawn_blocking(move || Self::convert_sync(&data, &target))
            .await
            .map_err(|e| SpeechError::Internal(format!("audio conversion task failed: {}", e)))?
    }
}

/// Change the channel count of interleaved samples.
///
/// Down to mono averages every frame; up from mono duplicates; anything else maps
/// channel `i` to source channel `i % source`.
fn remix(samples: &[f32], source: usize, target: usize) -> Vec<f32> {
    if source == target || source == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / source;
    let mut out = Vec::with_capacity(frames * target);

    for frame in samples.chunks_exact(source) {
        if target == 1 {
            out.push(frame.iter().sum::<f32>() / source as f32);
        } else {
            for channel in 0..target {
                out.push(frame[channel % source]);
            }
        }
    }

    out
}

/// Linear-interpolation resampling of interleaved frames.
fn resample_linear(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || channels == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_frames = ((frames as f64) * to_rate as f64 / from_rate as f64).round() as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let position = i as f64 * ratio;
        let index = position.floor() as usize;
        let fraction = (position - index as f64) as f32;
        let next = (index + 1).min(frames - 1);
        let index = index.min(frames - 1);

        for channel in 0..channels {
            let a = samples[index * channels + channel];
            let b = samples[next * channels + channel];
            out.push(a + (b - a) * fraction);
        }
    }

    out
}

/// Conversion through an external `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn sample_format(bit_depth: u16) -> Result<&'static str, SpeechError> {
        match bit_depth {
            8 => Ok("u8"),
            16 => Ok("s16"),
            32 => Ok("s32"),
            other => Err(SpeechError::validation(format!("unsupported bit depth: {}", other))),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn convert(&self, data: &[u8], target: &AudioFormat) -> Result<Vec<u8>, SpeechError> {
        let sample_fmt = Self::sample_format(target.bit_depth)?;
        let rate = target.sample_rate.to_string();
        let channels = target.channels.to_string();

        // Dropped (and deleted) when this call returns, success or not.
        let scratch = tempfile::TempDir::new()
            .map_err(|e| SpeechError::Internal(format!("failed to create scratch dir: {}", e)))?;
        let input = scratch.path().join("input.wav");
        let output = scratch.path().join("output.wav");

        tokio::fs::write(&input, data)
            .await
            .map_err(|e| SpeechError::Internal(format!("failed to write input audio: {}", e)))?;

        debug!(
            scratch = %scratch.path().display(),
            rate = target.sample_rate,
            channels = target.channels,
            sample_fmt,
            "Running ffmpeg"
        );

        let result = Command::new(&self.binary)
            .arg("-i")
            .arg(&input)
            .args(["-ar", rate.as_str()])
            .args(["-ac", channels.as_str()])
            .args(["-sample_fmt", sample_fmt])
            .args(["-f", "wav", "-y"])
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SpeechError::Internal(format!("failed to run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(SpeechError::Internal(format!(
                "ffmpeg conversion failed: {}",
                stderr.trim()
            )));
        }

        let converted = tokio::fs::read(&output)
            .await
            .map_err(|e| SpeechError::Internal(format!("failed to read converted audio: {}", e)))?;

        format::canonicalize(&converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(format: &AudioFormat, seconds: f64, freq: f32) -> Vec<u8> {
        let frames = (format.sample_rate as f64 * seconds) as usize;
        let mut samples = Vec::with_capacity(frames * format.channels as usize);
        for i in 0..frames {
            let t = i as f32 / format.sample_rate as f32;
            let value = 0.5 * (2.0 * std::f32::consts::PI * freq * t).sin();
            for _ in 0..format.channels {
                samples.push(value);
            }
        }
        format::wrap_pcm(format, &pcm::encode(&samples, format.bit_depth))
    }

    #[tokio::test]
    async fn test_pcm_transcoder_reaches_target() {
        let source = AudioFormat::wav(44100, 2, 32);
        let data = tone(&source, 1.0, 440.0);

        let converted = PcmTranscoder.convert(&data, &AudioFormat::speech()).await.unwrap();
        let header = format::parse_header(&converted).unwrap();

        assert_eq!(header.format, AudioFormat::speech());
        let seconds = header.format.duration_for(header.data_len);
        assert!((seconds - 1.0).abs() < 0.01, "duration {}", seconds);
    }

    #[test]
    fn test_remix_to_mono_averages() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5];
        assert_eq!(remix(&stereo, 2, 1), vec![0.5, 0.5]);
        assert_eq!(remix(&[0.25], 1, 2), vec![0.25, 0.25]);
    }

    #[test]
    fn test_resample_preserves_endpoints() {
        let samples = vec![0.0, 1.0, 0.0, -1.0];
        let up = resample_linear(&samples, 1, 8000, 16000);
        assert_eq!(up.len(), 8);
        assert_eq!(up[0], 0.0);
        assert!((up[1] - 0.5).abs() < 1e-6);
        assert_eq!(up[2], 1.0);
    }

    #[test]
    fn test_rejects_unknown_target_depth() {
        let data = tone(&AudioFormat::speech(), 0.5, 220.0);
        let err = PcmTranscoder::convert_sync(&data, &AudioFormat::wav(16000, 1, 24)).unwrap_err();
        assert!(matches!(err, SpeechError::Validation(_)));
    }
}
