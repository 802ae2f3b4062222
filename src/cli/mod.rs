//! CLI Module
//!
//! Command-line interface for offline Overdub tasks: bouncing click tracks,
//! mixing takes, inspecting payloads and managing a local recordings store.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Overdub - metronome, monitoring and overdub mixing
#[derive(Parser, Debug)]
#[command(name = "overdub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a click track to WAV
    #[command(name = "click")]
    Click {
        /// Tempo in beats per minute
        #[arg(short, long, default_value_t = 120.0)]
        bpm: f64,

        /// Length of the click run in seconds
        #[arg(short, long, default_value_t = 4.0)]
        duration: f64,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Mix a take over a base track and write WAV
    #[command(name = "mix")]
    Mix {
        /// Base (backing) track
        base: PathBuf,

        /// Take to lay over it
        take: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Report the container format of an audio file
    #[command(name = "classify")]
    Classify {
        /// Audio file
        file: PathBuf,
    },

    /// Print a waveform summary
    #[command(name = "waveform")]
    Waveform {
        /// Audio file
        file: PathBuf,

        /// Number of bars
        #[arg(long, default_value_t = crate::waveform::DEFAULT_BARS)]
        bars: usize,
    },

    /// Upload a recording to a local store
    #[command(name = "upload")]
    Upload {
        /// Audio file
        file: PathBuf,

        /// Store directory
        #[arg(short, long)]
        store: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        bpm: Option<f64>,
    },

    /// List recordings in a local store
    #[command(name = "list")]
    List {
        /// Store directory
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Write a default configuration file
    #[command(name = "init-config")]
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}
