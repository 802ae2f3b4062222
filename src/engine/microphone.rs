//! Microphone monitoring pipeline
//!
//! Raw input blocks pass through the sensitivity stage once and then fan
//! out to two branches: the capture stream handed to the recorder, and the
//! monitor buffer rendered through the monitor and master stages. Monitor
//! volume therefore never changes what gets recorded.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use log::{debug, info, warn};

use crate::engine::graph::{GainGraph, Stage};
use crate::error::{OverdubError, Result};

/// Seconds of processed audio kept for live monitoring before the oldest
/// samples are dropped
const MONITOR_CAPACITY_SECS: usize = 2;

/// Raw microphone input: mono sample blocks as they arrive
#[derive(Debug)]
pub struct InputStream {
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
}

impl InputStream {
    pub fn new(receiver: Receiver<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            receiver,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Processed (post-sensitivity) audio, handed to the caller for recording
#[derive(Debug)]
pub struct CaptureStream {
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
    /// Blocks received while checking for the end of the stream
    stash: Vec<Vec<f32>>,
}

impl CaptureStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Take every block available right now, in arrival order
    pub fn drain(&mut self) -> Vec<Vec<f32>> {
        let mut blocks = std::mem::take(&mut self.stash);
        blocks.extend(self.receiver.try_iter());
        blocks
    }

    /// Whether the pipeline feeding this stream was torn down
    ///
    /// Blocks still buffered are returned by `drain` first.
    pub fn is_ended(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(block) => self.stash.push(block),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }
}

/// Platform microphone access
pub trait MicrophoneSource {
    /// Ask for the microphone; fails with `PermissionDenied` when refused
    fn open(&mut self) -> Result<InputStream>;
}

/// In-process microphone fed through a channel
///
/// `send` pushes blocks into the most recently opened stream.
#[derive(Debug)]
pub struct ChannelSource {
    sender: Option<Sender<Vec<f32>>>,
    sample_rate: u32,
    denied: Option<String>,
}

impl ChannelSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sender: None,
            sample_rate,
            denied: None,
        }
    }

    /// Make every later `open` fail with `PermissionDenied`
    pub fn deny(&mut self, reason: impl Into<String>) {
        self.denied = Some(reason.into());
    }

    /// Push one block of raw samples; false if no stream is listening
    pub fn send(&self, block: Vec<f32>) -> bool {
        match &self.sender {
            Some(sender) => sender.send(block).is_ok(),
            None => false,
        }
    }

    /// Simulate the device going away
    pub fn close(&mut self) {
        self.sender = None;
    }
}

impl MicrophoneSource for ChannelSource {
    fn open(&mut self) -> Result<InputStream> {
        if let Some(reason) = &self.denied {
            return Err(OverdubError::PermissionDenied {
                reason: reason.clone(),
            });
        }
        let (sender, receiver) = mpsc::channel();
        self.sender = Some(sender);
        Ok(InputStream::new(receiver, self.sample_rate))
    }
}

/// The live microphone path
#[derive(Debug, Default)]
pub struct MicPipeline {
    input: Option<InputStream>,
    capture: Option<Sender<Vec<f32>>>,
    monitor: VecDeque<f32>,
    monitor_capacity: usize,
    level: f32,
}

impl MicPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a raw input through the sensitivity stage
    ///
    /// Replaces any previous input. Returns the processed stream for
    /// recording.
    pub fn setup(&mut self, input: InputStream, graph: &mut GainGraph) -> CaptureStream {
        if self.is_active() {
            debug!("[MIC] Replacing previous input");
            self.teardown();
        }

        let sample_rate = input.sample_rate();
        let (sender, receiver) = mpsc::channel();
        self.monitor_capacity = sample_rate as usize * MONITOR_CAPACITY_SECS;
        self.input = Some(input);
        self.capture = Some(sender);
        graph.connect_input();

        info!("[MIC] Input connected @ {} Hz", sample_rate);
        CaptureStream {
            receiver,
            sample_rate,
            stash: Vec::new(),
        }
    }

    /// Move pending raw blocks through the sensitivity stage
    ///
    /// Returns the number of samples processed. The current sensitivity is
    /// applied to each block as it is processed.
    pub fn pump(&mut self, graph: &GainGraph) -> usize {
        let Some(input) = &self.input else {
            return 0;
        };

        let sensitivity = graph.capture_gain();
        let mut blocks = Vec::new();
        let mut ended = false;
        loop {
            match input.receiver.try_recv() {
                Ok(block) => blocks.push(block),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    ended = true;
                    break;
                }
            }
        }

        let mut processed_samples = 0;
        for block in blocks {
            let processed: Vec<f32> = block.iter().map(|s| s * sensitivity).collect();
            self.level = processed.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()));
            processed_samples += processed.len();

            self.monitor.extend(processed.iter().copied());
            let overflow = self.monitor.len().saturating_sub(self.monitor_capacity);
            self.monitor.drain(..overflow);

            if let Some(capture) = &self.capture {
                if capture.send(processed).is_err() {
                    // Nobody is recording; monitoring carries on
                    self.capture = None;
                }
            }
        }

        if ended {
            warn!("[MIC] Input stream ended");
            self.input = None;
            self.capture = None;
        }

        processed_samples
    }

    /// Take up to `frames` processed samples for the monitor branch
    pub fn take_monitor(&mut self, frames: usize) -> Vec<f32> {
        let count = frames.min(self.monitor.len());
        self.monitor.drain(..count).collect()
    }

    /// Tear the pipeline down; safe to call without a prior `setup`
    pub fn stop(&mut self, graph: &mut GainGraph) {
        if self.is_active() || self.capture.is_some() {
            info!("[MIC] Input disconnected");
        }
        self.teardown();
        graph.disconnect_input();
    }

    fn teardown(&mut self) {
        self.input = None;
        self.capture = None;
        self.monitor.clear();
        self.level = 0.0;
    }

    /// Peak of the most recently processed block
    pub fn input_level(&self) -> f32 {
        self.level
    }

    /// Whether an input is attached
    pub fn is_active(&self) -> bool {
        self.input.is_some()
    }

    /// Samples waiting in the monitor branch
    pub fn monitor_len(&self) -> usize {
        self.monitor.len()
    }

    /// Monitor-branch gain to the output for the current graph
    pub fn monitor_gain(graph: &GainGraph) -> f32 {
        if graph.is_audible(Stage::Sensitivity) {
            graph.path_gain(Stage::Monitor)
        } else {
            0.0
        }
    }
}
