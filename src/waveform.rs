//! Waveform summaries for track lists
//!
//! Each bar blends the mean and the peak of its block so quiet passages
//! stay visible next to transients.

use crate::engine::buffer::AudioBuffer;

/// Bars drawn per track
pub const DEFAULT_BARS: usize = 150;

/// Height of every bar in the placeholder
pub const PLACEHOLDER_LEVEL: f32 = 0.1;

const MEAN_WEIGHT: f32 = 0.6;
const PEAK_WEIGHT: f32 = 0.4;

/// Summarise channel 0 of `buffer` into `bars` heights in [0, 1]
///
/// Trailing samples that do not fill a whole block are ignored. A buffer
/// shorter than `bars` frames, or a silent one, summarises to zeros.
pub fn summarize(buffer: &AudioBuffer, bars: usize) -> Vec<f32> {
    if bars == 0 {
        return Vec::new();
    }
    if buffer.channels() == 0 {
        return vec![0.0; bars];
    }

    let data = buffer.channel(0);
    let block = data.len() / bars;
    if block == 0 {
        return vec![0.0; bars];
    }

    let levels: Vec<f32> = data
        .chunks_exact(block)
        .take(bars)
        .map(|chunk| {
            let (sum, peak) = chunk.iter().fold((0.0f32, 0.0f32), |(sum, peak), s| {
                let a = s.abs();
                (sum + a, peak.max(a))
            });
            (sum / block as f32) * MEAN_WEIGHT + peak * PEAK_WEIGHT
        })
        .collect();

    let max = levels.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 || !max.is_finite() {
        return vec![0.0; bars];
    }
    levels.into_iter().map(|v| v / max).collect()
}

/// Flat line shown when a track cannot be decoded
pub fn placeholder(bars: usize) -> Vec<f32> {
    vec![PLACEHOLDER_LEVEL; bars]
}
