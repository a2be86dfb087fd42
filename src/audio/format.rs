//! # Audio Format Inspection
//!
//! Parses RIFF/WAVE PCM headers and describes audio buffers as [`AudioFormat`] values.
//!
//! ## Canonical Layout:
//! The engine works with the canonical 44-byte WAV header:
//!
//! | Offset | Size | Field            |
//! |--------|------|------------------|
//! | 0      | 4    | "RIFF"           |
//! | 8      | 4    | "WAVE"           |
//! | 12     | 4    | "fmt "           |
//! | 22     | 2    | channel count    |
//! | 24     | 4    | sample rate      |
//! | 34     | 2    | bits per sample  |
//! | 40     | 4    | data byte length |
//!
//! Everything after byte 44 is treated as interleaved little-endian PCM samples.
//! Transcoder output that carries extra chunks is rewritten to this layout by
//! [`canonicalize`].

use crate::error::SpeechError;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

/// Size of the canonical WAV header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Anything smaller than this cannot hold a useful amount of audio.
pub const MIN_AUDIO_BYTES: usize = 1024;

/// Audio codec / container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Wav,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Wav => "wav",
        }
    }
}

/// Codec, sample rate, channel count and bit depth of an audio buffer.
///
/// Used both to describe what a buffer *is* (validation result) and what it
/// *should become* (conversion target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl AudioFormat {
    pub fn wav(sample_rate: u32, channels: u16, bit_depth: u16) -> Self {
        Self {
            codec: AudioCodec::Wav,
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// 16 kHz, mono, 16-bit PCM. What speech models and the embedding model expect.
    pub fn speech() -> Self {
        Self::wav(16000, 1, 16)
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bit_depth / 8) as usize
    }

    /// Bytes per frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn byte_rate(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    pub fn duration_for(&self, data_bytes: usize) -> f64 {
        let rate = self.byte_rate();
        if rate == 0 {
            return 0.0;
        }
        data_bytes as f64 / rate as f64
    }

    /// Whether the bit depth is one the PCM codecs here can decode.
    pub fn is_supported_depth(&self) -> bool {
        matches!(self.bit_depth, 8 | 16 | 32)
    }
}

/// Result of checking an audio buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatValidation {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub format: Option<AudioFormat>,
    pub duration_secs: f64,
    pub size_bytes: usize,
}

impl FormatValidation {
    fn invalid(size_bytes: usize, issue: &str) -> Self {
        Self {
            is_valid: false,
            issues: vec![issue.to_string()],
            format: None,
            duration_secs: 0.0,
            size_bytes,
        }
    }

    /// First issue, or a generic message. Used when turning a failed validation into an error.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            "invalid audio".to_string()
        } else {
            self.issues.join("; ")
        }
    }
}

/// Header fields read from the fixed offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavHeader {
    pub format: AudioFormat,
    pub data_len: usize,
}

/// Read the canonical header. Returns the issue string on failure.
pub fn parse_header(data: &[u8]) -> Result<WavHeader, &'static str> {
    if data.len() < WAV_HEADER_LEN
        || &data[0..4] != b"RIFF"
        || &data[8..12] != b"WAVE"
        || &data[12..16] != b"fmt "
    {
        return Err("unsupported audio format, WAV required");
    }

    let channels = LittleEndian::read_u16(&data[22..24]);
    let sample_rate = LittleEndian::read_u32(&data[24..28]);
    let bit_depth = LittleEndian::read_u16(&data[34..36]);

    let format = AudioFormat::wav(sample_rate, channels, bit_depth);
    if channels == 0 || sample_rate == 0 || !format.is_supported_depth() {
        return Err("invalid audio header");
    }

    Ok(WavHeader {
        format,
        data_len: data.len() - WAV_HEADER_LEN,
    })
}

/// Validate an audio buffer against a preferred format.
///
/// ## Rules:
/// - `< 1024` bytes → invalid, "audio data too small"
/// - bad RIFF/WAVE/fmt signature → invalid, "unsupported audio format, WAV required"
/// - zero rate/channels or unsupported depth → invalid, "invalid audio header"
/// - rate differs from `preferred` → still valid, advisory issue
/// - more than one channel → still valid, advisory issue
pub fn inspect(data: &[u8], preferred: &AudioFormat) -> FormatValidation {
    if data.len() < MIN_AUDIO_BYTES {
        return FormatValidation::invalid(data.len(), "audio data too small");
    }

    let header = match parse_header(data) {
        Ok(header) => header,
        Err(issue) => return FormatValidation::invalid(data.len(), issue),
    };

    let mut issues = Vec::new();
    if header.format.sample_rate != preferred.sample_rate {
        issues.push(format!(
            "sample rate {} Hz not optimal, {} Hz recommended",
            header.format.sample_rate, preferred.sample_rate
        ));
    }
    if header.format.channels > 1 {
        issues.push("stereo audio detected, mono recommended for better accuracy".to_string());
    }

    FormatValidation {
        is_valid: true,
        issues,
        format: Some(header.format),
        duration_secs: header.format.duration_for(header.data_len),
        size_bytes: data.len(),
    }
}

/// Build a canonical 44-byte header for `data_len` bytes of PCM in `format`.
pub fn encode_header(format: &AudioFormat, data_len: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(WAV_HEADER_LEN);
    header.extend_from_slice(b"RIFF");
    // Writes into a Vec cannot fail.
    let _ = header.write_u32::<LittleEndian>((36 + data_len) as u32);
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    let _ = header.write_u32::<LittleEndian>(16);
    let _ = header.write_u16::<LittleEndian>(1); // PCM
    let _ = header.write_u16::<LittleEndian>(format.channels);
    let _ = header.write_u32::<LittleEndian>(format.sample_rate);
    let _ = header.write_u32::<LittleEndian>(format.byte_rate() as u32);
    let _ = header.write_u16::<LittleEndian>(format.block_align() as u16);
    let _ = header.write_u16::<LittleEndian>(format.bit_depth);
    header.extend_from_slice(b"data");
    let _ = header.write_u32::<LittleEndian>(data_len as u32);
    header
}

/// Wrap raw PCM bytes in a canonical WAV container.
pub fn wrap_pcm(format: &AudioFormat, pcm: &[u8]) -> Vec<u8> {
    let mut out = encode_header(format, pcm.len());
    out.extend_from_slice(pcm);
    out
}

/// Rewrite any RIFF/WAVE PCM file into the canonical 44-byte layout by walking its chunks.
///
/// External tools like to add `LIST` or `fact` chunks between `fmt ` and `data`, which
/// would break the fixed-offset reader above.
pub fn canonicalize(data: &[u8]) -> Result<Vec<u8>, SpeechError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(SpeechError::validation("unsupported audio format, WAV required"));
    }

    let mut format = None;
    let mut pcm: Option<&[u8]> = None;
    let mut offset = 12;

    while offset + 8 <= data.len() {
        let id = &data[offset..offset + 4];
        let size = LittleEndian::read_u32(&data[offset + 4..offset + 8]) as usize;
        let body_start = offset + 8;
        let body_end = (body_start + size).min(data.len());
        let body = &data[body_start..body_end];

        match id {
            b"fmt " if body.len() >= 16 => {
                let channels = LittleEndian::read_u16(&body[2..4]);
                let sample_rate = LittleEndian::read_u32(&body[4..8]);
                let bit_depth = LittleEndian::read_u16(&body[14..16]);
                format = Some(AudioFormat::wav(sample_rate, channels, bit_depth));
            }
            b"data" => {
                pcm = Some(body);
                break;
            }
            _ => {}
        }

        // Chunks are word aligned.
        offset = body_start + size + (size & 1);
    }

    match (format, pcm) {
        (Some(format), Some(pcm)) => {
            let usable = pcm.len() - pcm.len() % format.block_align().max(1);
            Ok(wrap_pcm(&format, &pcm[..usable]))
        }
        _ => Err(SpeechError::validation("invalid audio header")),
    }
}
