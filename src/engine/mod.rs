//! Audio Engine Module
//!
//! The scheduling core of the overdub workflow:
//! - Clock source and gain graph
//! - Metronome look-ahead scheduler
//! - Track playback, microphone monitoring and recording
//! - Decoding, mixing and WAV I/O
//!
//! `AudioEngine` owns one instance of each component and is passed by
//! reference to whatever needs it. Its lifecycle is explicit: `create`, then
//! `dispose`.

pub mod buffer;
pub mod cache;
pub mod clock;
pub mod decode;
pub mod format;
pub mod graph;
pub mod io;
pub mod metronome;
pub mod microphone;
pub mod mixer;
pub mod playback;
pub mod recorder;
pub mod render;
pub mod timeline;
pub mod track;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::{debug, info, warn};

pub use buffer::{AudioBuffer, ChannelLayout, INTERNAL_SAMPLE_RATE};
pub use cache::BufferCache;
pub use clock::{Clock, ClockFactory, ClockSource, ClockState, ManualClock, ResumeOutcome, SystemClock};
pub use decode::{Decoder, DefaultDecoder};
pub use format::{
    classify, detect, select_recording_format, EncoderSupport, MediaFormat, PcmOnly,
    SupportedFormats,
};
pub use graph::{GainGraph, Stage};
pub use metronome::{Metronome, MetronomeState, MAX_BPM, MIN_BPM};
pub use microphone::{CaptureStream, ChannelSource, InputStream, MicPipeline, MicrophoneSource};
pub use mixer::{export_overdub, mix, mix_encoded};
pub use playback::{PlaybackBatch, TrackPlayback, Voice};
pub use recorder::{RecordedTake, Recorder, RecorderEvent, RecorderState, RecordingSpec};
pub use timeline::{EventId, EventKind, EventQueue, EventSource, ScheduledEvent};
pub use track::{Track, TrackInfo};

use crate::config::EngineConfig;
use crate::error::{OverdubError, Result};
use crate::store::TrackStore;

/// Events that finished more than this long ago are dropped on `tick`
const EVENT_RETENTION_SECS: f64 = 10.0;

/// Notifications for UI collaborators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// Something started sounding (or will at `at`)
    PlayStarted { at: f64 },
    /// Playback or the metronome was stopped at `at`
    PlayStopped { at: f64 },
}

/// The engine: one clock, one graph, and every scheduler hanging off them
pub struct AudioEngine {
    config: EngineConfig,
    clock: ClockSource,
    graph: GainGraph,
    queue: EventQueue,
    metronome: Metronome,
    mic: MicPipeline,
    playback: TrackPlayback,
    recorder: Recorder,
    cache: BufferCache,
    decoder: Box<dyn Decoder>,
    subscribers: Vec<Sender<EngineEvent>>,
    disposed: bool,
}

impl AudioEngine {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Build an engine; the clock is instantiated lazily on first use
    ///
    /// # Errors
    /// * `Config` - If the configuration is unusable
    pub fn create(config: EngineConfig, clock_factory: ClockFactory) -> Result<Self> {
        let config = config.validate()?;
        let graph = GainGraph::new(
            config.master_volume,
            config.metronome_volume,
            config.monitor_volume,
            config.sensitivity,
        );

        info!("[ENGINE] Created @ {} Hz", config.sample_rate);
        Ok(Self {
            clock: ClockSource::new(clock_factory),
            graph,
            queue: EventQueue::new(),
            metronome: Metronome::new(&config),
            mic: MicPipeline::new(),
            playback: TrackPlayback::new(config.start_margin_secs),
            recorder: Recorder::new(),
            cache: BufferCache::new(),
            decoder: Box::new(DefaultDecoder::new(config.sample_rate)),
            subscribers: Vec::new(),
            disposed: false,
            config,
        })
    }

    /// Build an engine on the platform clock
    pub fn with_system_clock(config: EngineConfig) -> Result<Self> {
        Self::create(
            config,
            Box::new(|| -> Box<dyn Clock> { Box::new(SystemClock::new()) }),
        )
    }

    /// Replace the payload decoder
    pub fn with_decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Stop everything, release the microphone and close the clock
    ///
    /// Calling it twice is harmless. Every other operation fails afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let now = self.clock.peek();
        self.metronome.stop(now, &mut self.queue);
        self.playback.stop_all(now, &mut self.queue);
        self.mic.stop(&mut self.graph);
        self.graph.shutdown();
        self.clock.close();
        self.subscribers.clear();
        self.disposed = true;
        info!("[ENGINE] Disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self, action: &str) -> Result<()> {
        if self.disposed {
            return Err(OverdubError::invalid_transition("disposed", action));
        }
        Ok(())
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Current audio-clock time in seconds
    pub fn now(&mut self) -> f64 {
        self.clock.now()
    }

    /// Try to unblock a suspended clock; a refusal is not an error
    pub fn resume(&mut self) -> Result<ResumeOutcome> {
        self.ensure_live("resume the clock")?;
        Ok(self.clock.resume())
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock.state()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Receive `PlayStarted` / `PlayStopped` notifications
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: EngineEvent) {
        debug!("[ENGINE] {:?}", event);
        self.subscribers.retain(|s| s.send(event).is_ok());
    }

    // ========================================================================
    // Gains
    // ========================================================================

    /// Set a stage gain by name; the value is clamped into the stage range
    pub fn set_gain(&mut self, name: &str, value: f32) -> Result<f32> {
        self.ensure_live("set gain")?;
        self.graph.set_gain_by_name(name, value)
    }

    pub fn set_stage_gain(&mut self, stage: Stage, value: f32) -> Result<f32> {
        self.ensure_live("set gain")?;
        Ok(self.graph.set_gain(stage, value))
    }

    pub fn set_master_volume(&mut self, value: f32) -> Result<f32> {
        self.set_stage_gain(Stage::Master, value)
    }

    pub fn set_metronome_volume(&mut self, value: f32) -> Result<f32> {
        self.set_stage_gain(Stage::Metronome, value)
    }

    pub fn set_monitor_volume(&mut self, value: f32) -> Result<f32> {
        self.set_stage_gain(Stage::Monitor, value)
    }

    pub fn set_sensitivity(&mut self, value: f32) -> Result<f32> {
        self.set_stage_gain(Stage::Sensitivity, value)
    }

    pub fn gain(&self, stage: Stage) -> f32 {
        self.graph.gain(stage)
    }

    pub fn graph(&self) -> &GainGraph {
        &self.graph
    }

    // ========================================================================
    // Metronome
    // ========================================================================

    /// Start the continuous metronome; returns the first click time
    ///
    /// Returns None if it was already running (only the tempo changes).
    pub fn start_metronome(&mut self, bpm: f64) -> Result<Option<f64>> {
        self.ensure_live("start the metronome")?;
        let now = self.clock.now();
        let first = self.metronome.start(bpm, now, &mut self.queue);
        if let Some(at) = first {
            self.emit(EngineEvent::PlayStarted { at });
        }
        Ok(first)
    }

    /// Change tempo without restarting
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        self.ensure_live("change tempo")?;
        let now = self.clock.now();
        self.metronome.set_bpm(bpm, now);
        Ok(())
    }

    /// Stop the metronome in either mode; false if nothing was running
    pub fn stop_metronome(&mut self) -> Result<bool> {
        self.ensure_live("stop the metronome")?;
        let now = self.clock.now();
        let stopped = self.metronome.stop(now, &mut self.queue);
        if stopped {
            self.emit(EngineEvent::PlayStopped { at: now });
        }
        Ok(stopped)
    }

    /// Schedule a fixed-duration click run; returns its start time
    pub fn play_metronome(&mut self, bpm: f64, duration_secs: f64, start_at: Option<f64>) -> Result<f64> {
        self.ensure_live("play the metronome")?;
        let now = self.clock.now();
        let start = self
            .metronome
            .play_for(bpm, duration_secs, start_at, now, &mut self.queue);
        self.emit(EngineEvent::PlayStarted { at: start });
        Ok(start)
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    /// One polling pass
    ///
    /// Enqueues due clicks, moves pending microphone input through the
    /// pipeline and forgets long-finished events. Drive it every
    /// `metronome().next_poll_in()`. Returns the number of clicks enqueued.
    pub fn tick(&mut self) -> Result<usize> {
        self.ensure_live("tick")?;
        let now = self.clock.now();
        let enqueued = self.metronome.tick(now, &mut self.queue);
        self.mic.pump(&self.graph);

        let horizon = now - EVENT_RETENTION_SECS;
        if horizon > 0.0 {
            self.queue.prune(horizon);
            self.playback.prune(horizon, &self.queue);
        }
        Ok(enqueued)
    }

    // ========================================================================
    // Microphone
    // ========================================================================

    /// Ask for the microphone and wire it through the sensitivity stage
    ///
    /// # Errors
    /// * `PermissionDenied` - If the source refuses access
    pub fn setup_microphone(&mut self, source: &mut dyn MicrophoneSource) -> Result<CaptureStream> {
        self.ensure_live("set up the microphone")?;
        let input = source.open().map_err(|e| {
            warn!("[ENGINE] Microphone unavailable: {}", e);
            e
        })?;
        Ok(self.mic.setup(input, &mut self.graph))
    }

    /// Release the microphone; safe without a prior setup
    pub fn stop_microphone(&mut self) {
        self.mic.stop(&mut self.graph);
    }

    /// Process pending microphone input now
    pub fn pump_microphone(&mut self) -> usize {
        self.mic.pump(&self.graph)
    }

    /// Peak of the last processed microphone block
    pub fn input_level(&self) -> f32 {
        self.mic.input_level()
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Decode a track into the cache (at most once per payload)
    pub fn decode_track(&mut self, track: &Track) -> Result<Arc<AudioBuffer>> {
        self.ensure_live("decode a track")?;
        self.cache.get_or_decode(track, self.decoder.as_ref())
    }

    /// Fetch a stored recording and decode it, ready for playback
    pub fn load_track(&mut self, store: &dyn TrackStore, id: &str) -> Result<Track> {
        self.ensure_live("load a track")?;
        let recording = store.get(id)?;
        let payload = store.fetch(id)?;
        let track = recording.to_track(payload);
        self.decode_track(&track)?;
        Ok(track)
    }

    /// Schedule a batch of tracks against one start time
    ///
    /// `master_gain` is clamped and applied to the master stage. Tracks
    /// without a decoded buffer are skipped.
    pub fn play_tracks(
        &mut self,
        tracks: &[Track],
        master_gain: f32,
        start_at: Option<f64>,
    ) -> Result<PlaybackBatch> {
        self.ensure_live("play tracks")?;
        self.graph.set_gain(Stage::Master, master_gain);
        let now = self.clock.now();
        let batch = self
            .playback
            .play_tracks(tracks, &self.cache, start_at, now, &mut self.queue);
        if !batch.voices.is_empty() {
            self.emit(EngineEvent::PlayStarted {
                at: batch.start_time,
            });
        }
        Ok(batch)
    }

    /// Stop every track voice; returns how many were cut short
    pub fn stop_tracks(&mut self) -> usize {
        let now = self.clock.peek();
        let stopped = self.playback.stop_all(now, &mut self.queue);
        if stopped > 0 {
            self.emit(EngineEvent::PlayStopped { at: now });
        }
        stopped
    }

    /// Stop the metronome and all tracks
    pub fn stop_all(&mut self) {
        let now = self.clock.peek();
        let clicks = self.metronome.stop(now, &mut self.queue);
        let voices = self.playback.stop_all(now, &mut self.queue);
        if clicks || voices > 0 {
            self.emit(EngineEvent::PlayStopped { at: now });
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Start recording the processed microphone stream
    ///
    /// The container is the first one `support` accepts in preference
    /// order, falling back to PCM WAV. Only WAV sessions are encoded here;
    /// for any other container the caller's encoder consumes `capture` and
    /// hands its output to `recorder_mut().push_chunk`.
    pub fn start_recording(
        &mut self,
        capture: &CaptureStream,
        support: &dyn EncoderSupport,
    ) -> Result<MediaFormat> {
        self.ensure_live("start recording")?;
        let format = select_recording_format(support);
        let now = self.clock.now();
        self.recorder
            .start(RecordingSpec::new(format, capture.sample_rate()), now)?;
        Ok(format)
    }

    /// Pump the microphone and append whatever it produced to the recording
    ///
    /// Returns the number of blocks encoded, which is always zero for
    /// sessions fed by an external encoder.
    pub fn record_from(&mut self, capture: &mut CaptureStream) -> Result<usize> {
        self.ensure_live("record")?;
        self.mic.pump(&self.graph);
        if !self.recorder.has_builtin_encoder() {
            return Ok(0);
        }
        self.recorder.pull(capture)
    }

    /// Stop and finalize the current recording
    ///
    /// # Errors
    /// * `EmptyRecording` - If no audio was captured
    /// * `InvalidTransition` - If nothing was being recorded
    pub fn stop_recording(&mut self, capture: &mut CaptureStream) -> Result<RecordedTake> {
        self.ensure_live("stop recording")?;
        self.recorder.request_stop()?;
        // Final flush of anything still in flight
        self.mic.pump(&self.graph);
        if self.recorder.has_builtin_encoder() {
            if let Err(e) = self.recorder.pull(capture) {
                warn!("[ENGINE] Final flush failed, finalizing what was captured: {}", e);
            }
        }
        // Always leave Processing, even when the take turns out empty
        self.recorder.finalize()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    // ========================================================================
    // Rendering and inspection
    // ========================================================================

    /// Render `frames` of output starting at clock time `start`
    ///
    /// Consumes monitor samples from the microphone pipeline.
    pub fn render(&mut self, start: f64, frames: usize) -> AudioBuffer {
        let monitor = self.mic.take_monitor(frames);
        render::render_block(
            start,
            frames,
            self.config.sample_rate,
            &self.queue,
            &self.playback,
            &self.graph,
            &monitor,
        )
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub fn playback(&self) -> &TrackPlayback {
        &self.playback
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("clock", &self.clock)
            .field("metronome", &self.metronome.state())
            .field("recorder", &self.recorder.state())
            .field("events", &self.queue.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
