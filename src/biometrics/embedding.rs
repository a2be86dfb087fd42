//! # Voice Embeddings
//!
//! [`EmbeddingModel`] is the seam where a neural speaker-embedding model would plug in.
//! The built-in [`SpectralEmbeddingModel`] is a small deterministic stand-in: a long-term
//! average spectrum over log-spaced frequency bands. It separates voices with different
//! pitch and timbre well enough for enrollment and authentication flows, and needs no model
//! files.
//!
//! ## Algorithm:
//! 1. Decode the WAV buffer and mix it down to mono
//! 2. Cut it into Hann-windowed frames of 512 samples
//! 3. Compute the power of every DFT bin between 80 Hz and 7 kHz (Goertzel)
//! 4. Sum bins into `dimension` log-spaced bands and average the band magnitudes over frames
//! 5. L2-normalize the result

use crate::audio::format::{self, WAV_HEADER_LEN};
use crate::audio::pcm;
use crate::error::SpeechError;

/// Turns an audio buffer into a fixed-length vector.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, audio: &[u8]) -> Result<Vec<f32>, SpeechError>;

    fn dimension(&self) -> usize;
}

const FRAME_LEN: usize = 512;
const HOP_LEN: usize = 512;
const MIN_FREQ: f64 = 80.0;
const MAX_FREQ: f64 = 7000.0;

#[derive(Debug, Clone)]
pub struct SpectralEmbeddingModel {
    dimension: usize,
}

impl Default for SpectralEmbeddingModel {
    fn default() -> Self {
        Self::new(32)
    }
}

impl SpectralEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Inclusive DFT bin range for each band.
    fn band_bins(&self, sample_rate: u32) -> Vec<(usize, usize)> {
        let bin_hz = sample_rate as f64 / FRAME_LEN as f64;
        let top = MAX_FREQ.min(sample_rate as f64 / 2.0 - bin_hz);
        let ratio = (top / MIN_FREQ).powf(1.0 / self.dimension as f64);

        (0..self.dimension)
            .map(|band| {
                let low = MIN_FREQ * ratio.powi(band as i32);
                let high = low * ratio;
                let first = (low / bin_hz).round() as usize;
                let last = ((high / bin_hz).round() as usize).saturating_sub(1).max(first);
                (first.max(1), last.max(1))
            })
            .collect()
    }
}

impl EmbeddingModel for SpectralEmbeddingModel {
    fn embed(&self, audio: &[u8]) -> Result<Vec<f32>, SpeechError> {
        let header = format::parse_header(audio).map_err(SpeechError::validation)?;
        let fmt = header.format;
        let interleaved = pcm::decode(&audio[WAV_HEADER_LEN..], fmt.bit_depth);
        let channels = fmt.channels.max(1) as usize;
        let mono: Vec<f32> = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        if mono.len() < FRAME_LEN {
            return Err(SpeechError::validation("audio too short to embed"));
        }

        let bands = self.band_bins(fmt.sample_rate);
        let last_bin = bands.iter().map(|(_, last)| *last).max().unwrap_or(1);
        let coefficients: Vec<f64> = (0..=last_bin)
            .map(|k| 2.0 * (2.0 * std::f64::consts::PI * k as f64 / FRAME_LEN as f64).cos())
            .collect();
        let window: Vec<f64> = (0..FRAME_LEN)
            .map(|n| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / FRAME_LEN as f64).cos())
            .collect();

        let mut accumulated = vec![0.0f64; self.dimension];
        let mut frames = 0usize;
        let mut frame = vec![0.0f64; FRAME_LEN];
        let mut bin_power = vec![0.0f64; last_bin + 1];

        let mut start = 0;
        while start + FRAME_LEN <= mono.len() {
            for (n, slot) in frame.iter_mut().enumerate() {
                *slot = mono[start + n] as f64 * window[n];
            }
            for (k, power) in bin_power.iter_mut().enumerate().skip(1) {
                *power = goertzel_power(&frame, coefficients[k]);
            }
            for (band, (first, last)) in bands.iter().enumerate() {
                let energy: f64 = bin_power[*first..=*last].iter().sum();
                accumulated[band] += energy.sqrt();
            }
            frames += 1;
            start += HOP_LEN;
        }

        let mut embedding: Vec<f32> = accumulated
            .iter()
            .map(|total| (total / frames as f64) as f32)
            .collect();

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn goertzel_power(frame: &[f64], coefficient: f64) -> f64 {
    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    for sample in frame {
        let s0 = sample + coefficient * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    s1 * s1 + s2 * s2 - coefficient * s1 * s2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biometrics::similarity::cosine_similarity;
    use crate::testing::{synthetic_voice, VoiceSpec};

    #[test]
    fn test_embedding_has_fixed_dimension_and_unit_norm() {
        let model = SpectralEmbeddingModel::new(24);
        let embedding = model.embed(&synthetic_voice(&VoiceSpec::default(), 1.0, 1)).unwrap();
        assert_eq!(embedding.len(), 24);
        assert_eq!(model.dimension(), 24);
        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_same_voice_scores_high() {
        let model = SpectralEmbeddingModel::default();
        let spec = VoiceSpec::default();
        let a = model.embed(&synthetic_voice(&spec, 2.5, 1)).unwrap();
        let b = model.embed(&synthetic_voice(&spec, 2.5, 99)).unwrap();
        assert!(cosine_similarity(&a, &b) > 0.95);
    }

    #[test]
    fn test_different_voices_score_lower() {
        let model = SpectralEmbeddingModel::default();
        let low = model
            .embed(&synthetic_voice(&VoiceSpec::default().with_fundamental(110.0), 2.5, 1))
            .unwrap();
        let high = model
            .embed(&synthetic_voice(&VoiceSpec::default().with_fundamental(330.0), 2.5, 1))
            .unwrap();
        assert!(cosine_similarity(&low, &high) < 0.85);
    }

    #[test]
    fn test_rejects_tiny_audio() {
        let model = SpectralEmbeddingModel::default();
        let audio = synthetic_voice(&VoiceSpec::default(), 0.01, 1);
        assert!(matches!(model.embed(&audio), Err(SpeechError::Validation(_))));
    }
}
