//! Offline mixer
//!
//! Additive mixing with hard clipping: `out = clamp(a + b, -1, 1)`. There
//! is no gain compensation, so two loud inputs will clip. The output is as
//! long as the longer input and as wide as the wider one; a narrower input
//! reuses its channels cyclically.

use log::info;

use crate::engine::buffer::AudioBuffer;
use crate::engine::decode::Decoder;
use crate::engine::io::{encode_wav, resample_buffer};
use crate::error::Result;

/// Mix two decoded buffers
///
/// Inputs at different sample rates are both brought to the higher rate
/// first, which keeps the operation commutative.
pub fn mix(a: &AudioBuffer, b: &AudioBuffer) -> AudioBuffer {
    let sample_rate = a.sample_rate.max(b.sample_rate);
    let a = resample_buffer(a, sample_rate);
    let b = resample_buffer(b, sample_rate);

    let frames = a.len().max(b.len());
    let channels = a.channels().max(b.channels());

    let samples = (0..channels)
        .map(|ch| {
            (0..frames)
                .map(|i| (sample_at(&a, ch, i) + sample_at(&b, ch, i)).clamp(-1.0, 1.0))
                .collect()
        })
        .collect();

    AudioBuffer {
        samples,
        sample_rate,
    }
}

/// Sample of `channel` (reused cyclically) at `index`, silence past the end
fn sample_at(buffer: &AudioBuffer, channel: usize, index: usize) -> f32 {
    if buffer.channels() == 0 {
        return 0.0;
    }
    buffer
        .get_sample(channel % buffer.channels(), index)
        .unwrap_or(0.0)
}

/// Decode two payloads and mix them
pub fn mix_encoded(a: &[u8], b: &[u8], decoder: &dyn Decoder) -> Result<AudioBuffer> {
    let a = decoder.decode(a)?;
    let b = decoder.decode(b)?;
    Ok(mix(&a, &b))
}

/// Mix a recorded take over its backing track and encode the result as WAV
pub fn export_overdub(base: &[u8], take: &[u8], decoder: &dyn Decoder) -> Result<Vec<u8>> {
    let mixed = mix_encoded(base, take, decoder)?;
    info!(
        "[MIXER] Overdub mixed: {:.2}s, {} ch",
        mixed.duration_secs(),
        mixed.channels()
    );
    encode_wav(&mixed)
}
