//! WAV container I/O
//!
//! Encoding always produces 16-bit little-endian PCM with the canonical
//! 44-byte RIFF header. Decoding accepts whatever `hound` can read and
//! converts it to 32-bit float.
//!
//! Sample rate conversion uses linear interpolation.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{OverdubError, Result};

/// Size of the canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Bits per sample of every WAV this crate writes
pub const PCM_BITS: u16 = 16;

// ============================================================================
// Encoding
// ============================================================================

/// Build the 44-byte header for `data_len` bytes of 16-bit PCM
///
/// Layout (all little-endian): `RIFF`, `36 + data_len`, `WAVE`, `fmt `, 16,
/// format 1, channels, sample rate, byte rate, block align, 16, `data`,
/// `data_len`.
pub fn wav_header(channels: u16, sample_rate: u32, data_len: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align = channels * (PCM_BITS / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&PCM_BITS.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Convert a float sample to 16-bit PCM, clamping to full scale
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Encode interleaved float samples as raw little-endian 16-bit PCM
pub fn encode_pcm16(interleaved: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(interleaved.len() * 2);
    for &sample in interleaved {
        bytes.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    bytes
}

fn pcm_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: PCM_BITS,
        sample_format: SampleFormat::Int,
    }
}

/// Encode a buffer as an in-memory 16-bit PCM WAV file
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = pcm_spec(buffer.channels() as u16, buffer.sample_rate);
    let mut cursor = Cursor::new(Vec::with_capacity(
        WAV_HEADER_LEN + buffer.len() * buffer.channels() * 2,
    ));

    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in buffer.to_interleaved() {
            writer.write_sample(f32_to_i16(sample))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Write a buffer to a 16-bit PCM WAV file
pub fn export_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let spec = pcm_spec(buffer.channels() as u16, buffer.sample_rate);
    let mut writer = WavWriter::create(path, spec)?;
    for sample in buffer.to_interleaved() {
        writer.write_sample(f32_to_i16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode an in-memory WAV file, keeping its native sample rate
///
/// # Errors
/// * `DecodeFailed` - If the bytes are not a readable WAV file
/// * `UnsupportedFormat` - If the file has more than two channels or an
///   unusual bit depth
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| OverdubError::DecodeFailed {
        reason: format!("Failed to read WAV header: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    let layout = ChannelLayout::from_count(channels).ok_or_else(|| {
        OverdubError::UnsupportedFormat {
            format: format!("{}-channel audio (only mono/stereo supported)", channels),
        }
    })?;

    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let usable = samples.len() - samples.len() % channels;
    AudioBuffer::from_interleaved(&samples[..usable], layout, spec.sample_rate)
}

/// Import a WAV file from disk
pub fn import_wav(path: &Path) -> Result<AudioBuffer> {
    let bytes = std::fs::read(path)?;
    decode_wav(&bytes)
}

/// Read every sample as f32 in [-1, 1)
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits: u16,
    format: SampleFormat,
) -> Result<Vec<f32>> {
    let read = match format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<Vec<_>, _>>(),
        SampleFormat::Int if (8..=32).contains(&bits) => {
            // hound widens every integer depth up to 32 bits into i32
            let full_scale = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect()
        }
        SampleFormat::Int => {
            return Err(OverdubError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits),
            })
        }
    };

    read.map_err(|e| OverdubError::DecodeFailed {
        reason: format!("truncated or corrupt {}-bit sample data: {}", bits, e),
        source: Some(Box::new(e)),
    })
}

// ============================================================================
// Sample helpers
// ============================================================================

/// Split `[L, R, L, R, ...]` into per-channel vectors; a trailing
/// partial frame is dropped
pub fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    (0..channels)
        .map(|ch| {
            samples
                .chunks_exact(channels)
                .map(|frame| frame[ch])
                .collect()
        })
        .collect()
}

/// Bring a buffer to `target_rate` by linear interpolation
pub fn resample_buffer(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 {
        return buffer.clone();
    }
    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    AudioBuffer {
        samples: buffer
            .samples
            .iter()
            .map(|channel| resample_linear(channel, ratio))
            .collect(),
        sample_rate: target_rate,
    }
}

/// Stretch `samples` by `ratio` (output/input rate); the last sample is
/// held past the end of the input
pub fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    if ratio <= 0.0 || !ratio.is_finite() {
        return Vec::new();
    }

    let out_len = (samples.len() as f64 * ratio).ceil() as usize;
    (0..out_len)
        .map(|n| {
            let pos = n as f64 / ratio;
            let idx = pos as usize;
            let t = pos.fract() as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a + (b - a) * t,
                (Some(&a), None) => a,
                _ => last,
            }
        })
        .collect()
}

/// Mono sine at `amplitude`, for previews and tests
pub fn generate_test_tone(
    frequency: f32,
    amplitude: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> AudioBuffer {
    let frames = (duration_secs.max(0.0) * sample_rate as f32) as usize;
    let step = std::f32::consts::TAU * frequency / sample_rate.max(1) as f32;

    AudioBuffer {
        samples: vec![(0..frames).map(|n| amplitude * (step * n as f32).sin()).collect()],
        sample_rate,
    }
}

// ============================================================================
// Tests
// ============================================================================
