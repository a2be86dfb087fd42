//! PCM sample codecs.
//!
//! Samples are decoded to `f32` in roughly `[-1.0, 1.0]` relative to the largest positive
//! value of the bit depth (`2^(bits-1) - 1`):
//! - 8-bit: unsigned, centred on 128
//! - 16-bit / 32-bit: signed little-endian

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Largest positive sample value for a bit depth.
pub fn max_value(bit_depth: u16) -> f64 {
    match bit_depth {
        8 => 127.0,
        16 => i16::MAX as f64,
        32 => i32::MAX as f64,
        _ => 1.0,
    }
}

/// Decode interleaved PCM bytes into scaled samples. Trailing partial samples are ignored.
pub fn decode(data: &[u8], bit_depth: u16) -> Vec<f32> {
    let scale = max_value(bit_depth);
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / (bit_depth as usize / 8).max(1));

    match bit_depth {
        8 => {
            while let Ok(byte) = cursor.read_u8() {
                samples.push(((byte as f64 - 128.0) / scale) as f32);
            }
        }
        16 => {
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push((sample as f64 / scale) as f32);
            }
        }
        32 => {
            while let Ok(sample) = cursor.read_i32::<LittleEndian>() {
                samples.push((sample as f64 / scale) as f32);
            }
        }
        _ => {}
    }

    samples
}

/// Encode scaled samples back to PCM bytes, rounding and clamping to the depth's range.
pub fn encode(samples: &[f32], bit_depth: u16) -> Vec<u8> {
    let scale = max_value(bit_depth);
    let mut out = Vec::with_capacity(samples.len() * (bit_depth as usize / 8));

    for &sample in samples {
        let value = (sample as f64 * scale).round();
        // Writes into a Vec cannot fail.
        let _ = match bit_depth {
            8 => out.write_u8((value + 128.0).clamp(0.0, 255.0) as u8),
            16 => out.write_i16::<LittleEndian>(value.clamp(i16::MIN as f64, i16::MAX as f64) as i16),
            32 => out.write_i32::<LittleEndian>(value.clamp(i32::MIN as f64, i32::MAX as f64) as i32),
            _ => Ok(()),
        };
    }

    out
}

/// Peak absolute amplitude of decoded samples.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}
