//! Gain graph
//!
//! A fixed, acyclic routing of named gain stages:
//!
//! ```text
//! clicks ──► metronome ──┐
//! tracks ────────────────┼──► master ──► output
//! mic ──► sensitivity ─┬─► monitor ──┘
//!                      └─► capture (recorder)
//! ```
//!
//! Only the microphone edge is switchable; everything else is wired once.
//! Gain changes take effect for everything currently flowing through the
//! stage.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::{OverdubError, Result};

/// A named gain stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Master,
    Metronome,
    /// Live monitoring volume (what the performer hears)
    Monitor,
    /// Microphone input sensitivity (what is heard and recorded)
    Sensitivity,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Master,
        Stage::Metronome,
        Stage::Monitor,
        Stage::Sensitivity,
    ];

    /// Valid gain range for this stage
    pub fn range(&self) -> (f32, f32) {
        match self {
            Stage::Sensitivity => (0.1, 3.0),
            _ => (0.0, 1.0),
        }
    }

    /// Clamp a value into this stage's range; NaN maps to the lower bound
    pub fn clamp(&self, value: f32) -> f32 {
        let (min, max) = self.range();
        if value.is_nan() {
            return min;
        }
        value.clamp(min, max)
    }

    /// The stage this one feeds, or None for the output-facing stage
    pub fn downstream(&self) -> Option<Stage> {
        match self {
            Stage::Master => None,
            Stage::Metronome | Stage::Monitor => Some(Stage::Master),
            Stage::Sensitivity => Some(Stage::Monitor),
        }
    }

    fn index(&self) -> usize {
        match self {
            Stage::Master => 0,
            Stage::Metronome => 1,
            Stage::Monitor => 2,
            Stage::Sensitivity => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Master => write!(f, "master"),
            Stage::Metronome => write!(f, "metronome"),
            Stage::Monitor => write!(f, "monitor"),
            Stage::Sensitivity => write!(f, "sensitivity"),
        }
    }
}

impl FromStr for Stage {
    type Err = OverdubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(Stage::Master),
            "metronome" => Ok(Stage::Metronome),
            "monitor" | "microphone" => Ok(Stage::Monitor),
            "sensitivity" => Ok(Stage::Sensitivity),
            other => Err(OverdubError::Config {
                reason: format!("unknown gain stage '{}'", other),
            }),
        }
    }
}

/// The engine's gain stages and their fixed wiring
#[derive(Debug, Clone)]
pub struct GainGraph {
    gains: [f32; 4],
    /// Whether a microphone source is attached to the sensitivity stage
    input_connected: bool,
    /// Whether the graph drives a live output at all
    live: bool,
}

impl GainGraph {
    /// Create a live graph with the given initial gains (clamped)
    pub fn new(master: f32, metronome: f32, monitor: f32, sensitivity: f32) -> Self {
        let mut graph = Self {
            gains: [1.0, 1.0, 1.0, 1.0],
            input_connected: false,
            live: true,
        };
        graph.set_gain(Stage::Master, master);
        graph.set_gain(Stage::Metronome, metronome);
        graph.set_gain(Stage::Monitor, monitor);
        graph.set_gain(Stage::Sensitivity, sensitivity);
        graph
    }

    /// Set a stage gain, clamped into its range; returns the applied value
    pub fn set_gain(&mut self, stage: Stage, value: f32) -> f32 {
        let applied = stage.clamp(value);
        self.gains[stage.index()] = applied;
        debug!("[GRAPH] {} gain -> {:.3}", stage, applied);
        applied
    }

    /// Set a stage gain by name (`"master"`, `"metronome"`, `"monitor"`,
    /// `"sensitivity"`)
    pub fn set_gain_by_name(&mut self, name: &str, value: f32) -> Result<f32> {
        let stage: Stage = name.parse()?;
        Ok(self.set_gain(stage, value))
    }

    /// Current gain of a stage
    pub fn gain(&self, stage: Stage) -> f32 {
        self.gains[stage.index()]
    }

    /// Current gain of a stage by name
    pub fn gain_by_name(&self, name: &str) -> Result<f32> {
        let stage: Stage = name.parse()?;
        Ok(self.gain(stage))
    }

    /// Attach the microphone to the sensitivity stage
    pub fn connect_input(&mut self) {
        self.input_connected = true;
    }

    /// Detach the microphone
    pub fn disconnect_input(&mut self) {
        self.input_connected = false;
    }

    /// Whether a microphone is attached
    pub fn input_connected(&self) -> bool {
        self.input_connected
    }

    /// Tear the graph down; nothing is audible afterwards
    pub fn shutdown(&mut self) {
        self.live = false;
        self.input_connected = false;
    }

    /// Whether the graph drives an output
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Whether a signal entering `stage` has a path to the output
    pub fn is_audible(&self, stage: Stage) -> bool {
        if !self.live {
            return false;
        }
        match stage {
            Stage::Sensitivity => self.input_connected,
            _ => true,
        }
    }

    /// Product of gains along the path from `stage` to the output
    ///
    /// Zero when no path exists.
    pub fn path_gain(&self, stage: Stage) -> f32 {
        if !self.is_audible(stage) {
            return 0.0;
        }
        let mut gain = 1.0;
        let mut current = Some(stage);
        while let Some(s) = current {
            gain *= self.gain(s);
            current = s.downstream();
        }
        gain
    }

    /// Gain applied to what gets recorded; independent of monitor and master
    pub fn capture_gain(&self) -> f32 {
        self.gain(Stage::Sensitivity)
    }
}

impl Default for GainGraph {
    fn default() -> Self {
        Self::new(1.0, 0.7, 0.8, 1.0)
    }
}
