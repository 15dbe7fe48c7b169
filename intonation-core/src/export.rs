//! # Loop Export
//!
//! Encodes captured audio as canonical RIFF/WAVE: mono, 16-bit signed PCM,
//! little-endian, behind the standard 44-byte header.

use std::io::Cursor;
use thiserror::Error;

/// Size of the canonical PCM WAV header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No captured audio between {start_ms:.0} ms and {end_ms:.0} ms")]
    EmptyRange { start_ms: f64, end_ms: f64 },
    #[error("Invalid sample rate {0}")]
    SampleRate(u32),
    #[error("Wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Converts a float sample to 16-bit PCM: clamp to [-1, 1], scale by 32767,
/// truncate toward zero.
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Encodes mono samples as WAV file bytes.
///
/// # Arguments
/// * `samples` - Mono samples, nominally in [-1, 1]
/// * `sample_rate` - Sample rate in Hz
///
/// # Returns
/// * `Ok(bytes)` - `44 + 2 * samples.len()` bytes of WAV data
/// * `Err(e)` - Zero sample rate or an encoder failure
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, ExportError> {
    if sample_rate == 0 {
        return Err(ExportError::SampleRate(sample_rate));
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(quantize(sample))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}
