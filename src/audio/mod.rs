//! # Audio Module
//!
//! Everything that touches raw audio bytes before they reach a speech provider or the
//! voice biometric model.
//!
//! ## Key Components:
//! - **format**: WAV header parsing, canonical header encoding, `FormatValidation`
//! - **pcm**: sample decoding/encoding for 8/16/32-bit PCM
//! - **transcoder**: pluggable rate/channel/depth conversion (native or ffmpeg)
//! - **processor**: the `AudioProcessor` façade used by the rest of the engine
//!
//! ## Canonical Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers in a 44-byte-header WAV container

pub mod format;
pub mod pcm;
pub mod processor;
pub mod transcoder;

pub use format::{AudioCodec, AudioFormat, FormatValidation};
pub use processor::{AudioProcessor, AudioPurpose, PurposeLimits};
pub use transcoder::{FfmpegTranscoder, PcmTranscoder, Transcoder};
