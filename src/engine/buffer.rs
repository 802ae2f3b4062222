//! Decoded audio buffers
//!
//! Linear PCM, non-interleaved 32-bit float. Everything that is scheduled,
//! rendered or mixed is an `AudioBuffer` at the internal sample rate.

use crate::error::{OverdubError, Result};

/// Rate every decoded payload is brought to
pub const INTERNAL_SAMPLE_RATE: u32 = 48000;

/// Mono or stereo; wider sources are truncated while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn count(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

/// Per-channel sample vectors plus their rate
///
/// # Example
/// ```
/// use overdub::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let click = AudioBuffer::new(480, ChannelLayout::Mono);
/// assert_eq!(click.duration_secs(), 0.01);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// `samples[channel][frame]`
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Silence at the internal rate
    pub fn new(frames: usize, layout: ChannelLayout) -> Self {
        Self {
            samples: vec![vec![0.0; frames]; layout.count()],
            sample_rate: INTERNAL_SAMPLE_RATE,
        }
    }

    /// Wrap per-channel vectors
    ///
    /// # Errors
    /// * `UnsupportedFormat` - For zero or more than two channels
    /// * `DecodeFailed` - If the channels differ in length
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if ChannelLayout::from_count(samples.len()).is_none() {
            return Err(OverdubError::UnsupportedFormat {
                format: format!("{} channels", samples.len()),
            });
        }
        let frames = samples[0].len();
        if samples.iter().any(|ch| ch.len() != frames) {
            return Err(OverdubError::decode("channels have different lengths"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Split frame-interleaved samples into channels
    ///
    /// # Errors
    /// * `DecodeFailed` - If the sample count is not a whole number of frames
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let width = layout.count();
        if interleaved.len() % width != 0 {
            return Err(OverdubError::decode(format!(
                "{} samples do not form whole {}-channel frames",
                interleaved.len(),
                width
            )));
        }

        let mut samples = vec![Vec::with_capacity(interleaved.len() / width); width];
        for frame in interleaved.chunks_exact(width) {
            for (channel, &sample) in samples.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Frame-interleaved copy, as written to PCM
    pub fn to_interleaved(&self) -> Vec<f32> {
        (0..self.len())
            .flat_map(|frame| self.samples.iter().map(move |ch| ch[frame]))
            .collect()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        match self.sample_rate {
            0 => 0.0,
            rate => self.len() as f64 / rate as f64,
        }
    }

    /// Samples of one channel; panics on a bad index
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    #[inline]
    pub fn get_sample(&self, channel: usize, frame: usize) -> Option<f32> {
        self.samples.get(channel)?.get(frame).copied()
    }

    /// Largest absolute sample over every channel
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flatten()
            .fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    /// Hard-clip into [-1, 1]
    pub fn clamp(&mut self) {
        self.samples
            .iter_mut()
            .flatten()
            .for_each(|s| *s = s.clamp(-1.0, 1.0));
    }
}
