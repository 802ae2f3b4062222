//! Overdub - Real-time Audio Scheduling Core
//!
//! Overdub keeps time with a metronome, monitors a microphone with
//! adjustable sensitivity, plays saved tracks in sync and records a new
//! take that can be mixed over a previous one.
//!
//! # Architecture
//!
//! Everything audible is scheduled against a single monotonic clock:
//! - Metronome clicks are enqueued ahead of time from a polling loop
//! - Track playback starts every voice at one shared instant
//! - The microphone feeds both monitoring and the recorder
//!
//! Encoded recordings live in a `store::TrackStore`; the engine never talks
//! to storage except to load a track by id.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod waveform;

pub use config::EngineConfig;
pub use engine::AudioEngine;
pub use error::{OverdubError, Result};
