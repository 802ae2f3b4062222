//! Engine configuration
//!
//! All timing constants of the scheduling core live here so they can be
//! tuned from a JSON file. Out-of-range values are normalised, never
//! rejected, with the single exception of a zero sample rate.

use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{OverdubError, Result};

/// Click sound parameters for one beat type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickTone {
    /// Oscillator frequency in Hz
    pub frequency: f32,
    /// Per-click gain before the metronome stage
    pub gain: f32,
}

/// Metronome click sound configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    /// Downbeat click (first beat of the bar)
    pub downbeat: ClickTone,
    /// All other beats
    pub regular: ClickTone,
    /// Audible length of one click in seconds
    pub duration_secs: f64,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            downbeat: ClickTone {
                frequency: 1760.0,
                gain: 0.7,
            },
            regular: ClickTone {
                frequency: 880.0,
                gain: 0.45,
            },
            duration_secs: 0.03,
        }
    }
}

/// Configuration for the audio engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Internal sample rate used for rendering and encoding
    pub sample_rate: u32,
    /// Wall-clock polling period of the metronome look-ahead loop
    pub lookahead_ms: u64,
    /// Audio-clock horizon scheduled on every poll
    pub schedule_ahead_secs: f64,
    /// Margin added to `now()` when starting anything, so nothing lands in the past
    pub start_margin_secs: f64,
    /// Beats per bar; beat `i` is a downbeat when `i % beats_per_bar == 0`
    pub beats_per_bar: u32,
    /// Initial metronome stage gain
    pub metronome_volume: f32,
    /// Initial monitor stage gain
    pub monitor_volume: f32,
    /// Initial master stage gain
    pub master_volume: f32,
    /// Initial microphone sensitivity
    pub sensitivity: f32,
    /// Click sounds
    pub click: ClickConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            lookahead_ms: 25,
            schedule_ahead_secs: 0.1,
            start_margin_secs: 0.05,
            beats_per_bar: 4,
            metronome_volume: 0.7,
            monitor_volume: 0.8,
            master_volume: 1.0,
            sensitivity: 1.0,
            click: ClickConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file and normalise it
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Clamp every field into its valid range
    ///
    /// # Errors
    /// * `Config` - If the sample rate is zero
    pub fn validate(mut self) -> Result<Self> {
        if self.sample_rate == 0 {
            return Err(OverdubError::Config {
                reason: "sample_rate must be greater than zero".to_string(),
            });
        }

        let original = self.clone();

        self.lookahead_ms = self.lookahead_ms.clamp(1, 1000);
        self.schedule_ahead_secs = finite_or(self.schedule_ahead_secs, 0.1).clamp(0.01, 2.0);
        self.start_margin_secs = finite_or(self.start_margin_secs, 0.05).clamp(0.0, 1.0);
        self.beats_per_bar = self.beats_per_bar.max(1);
        self.metronome_volume = finite_or(self.metronome_volume, 0.7).clamp(0.0, 1.0);
        self.monitor_volume = finite_or(self.monitor_volume, 0.8).clamp(0.0, 1.0);
        self.master_volume = finite_or(self.master_volume, 1.0).clamp(0.0, 1.0);
        self.sensitivity = finite_or(self.sensitivity, 1.0).clamp(0.1, 3.0);
        self.click.duration_secs = finite_or(self.click.duration_secs, 0.03).clamp(0.001, 0.5);
        for tone in [&mut self.click.downbeat, &mut self.click.regular] {
            tone.gain = finite_or(tone.gain, 0.5).clamp(0.0, 1.0);
            tone.frequency = finite_or(tone.frequency, 880.0).clamp(20.0, 20_000.0);
        }

        if self != original {
            warn!("[CONFIG] Out-of-range values were clamped");
        }

        Ok(self)
    }
}

fn finite_or<T: Into<f64> + Copy + From<f32>>(value: T, fallback: f32) -> T {
    if value.into().is_finite() {
        value
    } else {
        T::from(fallback)
    }
}
