//! Recorder state machine
//!
//! ```text
//! Idle ──Start──► Recording ──Stop──► Processing ──Finalized──► Idle
//! ```
//!
//! Every transition goes through `handle`, which validates the event
//! against the current state. Chunks are kept in arrival order, untouched.
//! A late chunk may still arrive while processing (the encoder's final
//! flush) and is appended too.

use std::fmt;

use log::{debug, error, info, warn};

use crate::engine::format::MediaFormat;
use crate::engine::io::{encode_pcm16, wav_header, PCM_BITS, WAV_HEADER_LEN};
use crate::engine::microphone::CaptureStream;
use crate::error::{OverdubError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Processing,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderState::Idle => write!(f, "idle"),
            RecorderState::Recording => write!(f, "recording"),
            RecorderState::Processing => write!(f, "processing"),
        }
    }
}

/// Encoding parameters of one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSpec {
    pub format: MediaFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RecordingSpec {
    pub fn new(format: MediaFormat, sample_rate: u32) -> Self {
        Self {
            format,
            sample_rate,
            channels: 1,
        }
    }
}

/// Named recorder events
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Begin a session at clock time `at`
    Start { spec: RecordingSpec, at: f64 },
    /// One encoded chunk from the encoder
    DataAvailable(Vec<u8>),
    /// The caller asked to stop; the encoder is flushing
    Stop,
    /// The encoder has flushed; build the take
    Finalized,
}

impl RecorderEvent {
    fn action(&self) -> &'static str {
        match self {
            RecorderEvent::Start { .. } => "start recording",
            RecorderEvent::DataAvailable(_) => "accept data",
            RecorderEvent::Stop => "stop recording",
            RecorderEvent::Finalized => "finalize recording",
        }
    }
}

/// A finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTake {
    /// One encoded object in a single container
    pub data: Vec<u8>,
    pub format: MediaFormat,
    /// Clock time at which recording started
    pub started_at: f64,
    pub chunk_count: usize,
    /// Known up front only for PCM; compressed takes report None until decoded
    pub duration_secs: Option<f64>,
}

impl RecordedTake {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Turns processed capture blocks into 16-bit PCM chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmChunkEncoder;

impl PcmChunkEncoder {
    pub fn encode(&self, block: &[f32]) -> Vec<u8> {
        encode_pcm16(block)
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    state: RecorderState,
    spec: Option<RecordingSpec>,
    started_at: f64,
    chunks: Vec<Vec<u8>>,
    encoder: PcmChunkEncoder,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event
    ///
    /// Returns the finished take on `Finalized`.
    ///
    /// # Errors
    /// * `InvalidTransition` - If the event is not valid in the current state
    /// * `EmptyRecording` - If finalizing a session that captured no data
    pub fn handle(&mut self, event: RecorderEvent) -> Result<Option<RecordedTake>> {
        match (self.state, event) {
            (RecorderState::Idle, RecorderEvent::Start { spec, at }) => {
                self.state = RecorderState::Recording;
                self.spec = Some(spec);
                self.started_at = at;
                self.chunks.clear();
                info!("[RECORDER] Recording {} from {:.3}s", spec.format, at);
                Ok(None)
            }
            (
                RecorderState::Recording | RecorderState::Processing,
                RecorderEvent::DataAvailable(chunk),
            ) => {
                if !chunk.is_empty() {
                    debug!("[RECORDER] Chunk {} ({} bytes)", self.chunks.len(), chunk.len());
                    self.chunks.push(chunk);
                }
                Ok(None)
            }
            (RecorderState::Recording, RecorderEvent::Stop) => {
                self.state = RecorderState::Processing;
                debug!("[RECORDER] Stopping, {} chunk(s) so far", self.chunks.len());
                Ok(None)
            }
            (RecorderState::Processing, RecorderEvent::Finalized) => {
                self.state = RecorderState::Idle;
                self.build_take().map(Some)
            }
            (state, event) => {
                error!("[RECORDER] Cannot {} while {}", event.action(), state);
                Err(OverdubError::invalid_transition(state, event.action()))
            }
        }
    }

    fn build_take(&mut self) -> Result<RecordedTake> {
        let chunks = std::mem::take(&mut self.chunks);
        let spec = self
            .spec
            .take()
            .ok_or_else(|| OverdubError::invalid_transition(self.state, "finalize recording"))?;

        let data_len: usize = chunks.iter().map(Vec::len).sum();
        if data_len == 0 {
            warn!("[RECORDER] Recording produced no data");
            return Err(OverdubError::EmptyRecording);
        }

        let chunk_count = chunks.len();
        let (data, duration_secs) = match spec.format {
            MediaFormat::Wav => {
                let mut data = Vec::with_capacity(WAV_HEADER_LEN + data_len);
                data.extend_from_slice(&wav_header(spec.channels, spec.sample_rate, data_len as u32));
                for chunk in &chunks {
                    data.extend_from_slice(chunk);
                }
                let frame_bytes = spec.channels as usize * (PCM_BITS as usize / 8);
                let frames = data_len / frame_bytes.max(1);
                (data, Some(frames as f64 / spec.sample_rate as f64))
            }
            _ => (chunks.concat(), None),
        };

        info!(
            "[RECORDER] Take ready: {} bytes of {} from {} chunk(s)",
            data.len(),
            spec.format,
            chunk_count
        );
        Ok(RecordedTake {
            data,
            format: spec.format,
            started_at: self.started_at,
            chunk_count,
            duration_secs,
        })
    }

    // ========================================================================
    // Convenience wrappers
    // ========================================================================

    pub fn start(&mut self, spec: RecordingSpec, at: f64) -> Result<()> {
        self.handle(RecorderEvent::Start { spec, at }).map(|_| ())
    }

    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> Result<()> {
        self.handle(RecorderEvent::DataAvailable(chunk)).map(|_| ())
    }

    /// Enter processing without finalizing; late chunks are still accepted
    pub fn request_stop(&mut self) -> Result<()> {
        self.handle(RecorderEvent::Stop).map(|_| ())
    }

    /// Finish a stop started with `request_stop`
    pub fn finalize(&mut self) -> Result<RecordedTake> {
        self.handle(RecorderEvent::Finalized)?
            .ok_or(OverdubError::EmptyRecording)
    }

    /// Stop and finalize in one go
    pub fn stop(&mut self) -> Result<RecordedTake> {
        self.request_stop()?;
        self.finalize()
    }

    /// Encode and append every processed block waiting in `capture`
    ///
    /// Only PCM sessions can be fed this way; other containers need an
    /// external encoder pushing chunks. Returns the number of blocks taken.
    pub fn pull(&mut self, capture: &mut CaptureStream) -> Result<usize> {
        if self.state == RecorderState::Idle {
            return Ok(0);
        }
        match self.spec {
            Some(spec) if spec.format == MediaFormat::Wav => {}
            Some(spec) => {
                return Err(OverdubError::UnsupportedFormat {
                    format: format!("{} (no built-in encoder)", spec.format),
                })
            }
            None => return Ok(0),
        }

        let blocks = capture.drain();
        let count = blocks.len();
        for block in blocks {
            let chunk = self.encoder.encode(&block);
            self.push_chunk(chunk)?;
        }
        Ok(count)
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Whether `pull` can encode this session's audio itself
    pub fn has_builtin_encoder(&self) -> bool {
        self.spec.map_or(false, |spec| spec.format == MediaFormat::Wav)
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// Chunks captured in the current session
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Format of the current session
    pub fn format(&self) -> Option<MediaFormat> {
        self.spec.map(|spec| spec.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wav_spec() -> RecordingSpec {
        RecordingSpec::new(MediaFormat::Wav, 48000)
    }

    #[test]
    fn test_full_cycle() {
        let mut recorder = Recorder::new();
        recorder.start(wav_spec(), 1.0).unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);

        recorder.push_chunk(vec![1, 0, 2, 0]).unwrap();
        recorder.push_chunk(vec![3, 0]).unwrap();
        let take = recorder.stop().unwrap();

        assert_eq!(recorder.state(), RecorderState::Idle);
        assert_eq!(take.format, MediaFormat::Wav);
        assert_eq!(take.chunk_count, 2);
        assert_eq!(take.started_at, 1.0);
        assert_eq!(&take.data[WAV_HEADER_LEN..], &[1, 0, 2, 0, 3, 0]);
        assert_eq!(&take.data[..WAV_HEADER_LEN], &wav_header(1, 48000, 6));
    }

    #[test]
    fn test_stop_without_data_fails() {
        let mut recorder = Recorder::new();
        recorder.start(wav_spec(), 0.0).unwrap();
        assert!(matches!(recorder.stop(), Err(OverdubError::EmptyRecording)));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_zero_size_chunks_are_ignored() {
        let mut recorder = Recorder::new();
        recorder.start(wav_spec(), 0.0).unwrap();
        recorder.push_chunk(Vec::new()).unwrap();
        assert_eq!(recorder.chunk_count(), 0);
        assert!(matches!(recorder.stop(), Err(OverdubError::EmptyRecording)));
    }

    #[test]
    fn test_double_start_is_rejected() {
        let mut recorder = Recorder::new();
        recorder.start(wav_spec(), 0.0).unwrap();
        let err = recorder.start(wav_spec(), 0.5).unwrap_err();
        assert!(matches!(err, OverdubError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Cannot start recording while recording");
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_events_invalid_while_idle() {
        let mut recorder = Recorder::new();
        assert!(recorder.push_chunk(vec![1]).is_err());
        assert!(recorder.request_stop().is_err());
        assert!(recorder.finalize().is_err());
    }

    #[test]
    fn test_late_chunk_during_processing() {
        let mut recorder = Recorder::new();
        recorder
            .start(RecordingSpec::new(MediaFormat::WebmOpus, 48000), 0.0)
            .unwrap();
        recorder.push_chunk(b"first".to_vec()).unwrap();
        recorder.request_stop().unwrap();
        assert_eq!(recorder.state(), RecorderState::Processing);
        assert!(recorder.start(wav_spec(), 1.0).is_err());

        recorder.handle(RecorderEvent::DataAvailable(b"-last".to_vec())).unwrap();
        let take = recorder.finalize().unwrap();
        assert_eq!(take.data, b"first-last".to_vec());
        assert_eq!(take.duration_secs, None);
        assert_eq!(take.mime_type(), "audio/webm;codecs=opus");
    }

    #[test]
    fn test_builtin_encoder_only_for_wav() {
        let mut recorder = Recorder::new();
        assert!(!recorder.has_builtin_encoder());

        recorder
            .start(RecordingSpec::new(MediaFormat::WebmOpus, 48000), 0.0)
            .unwrap();
        assert!(!recorder.has_builtin_encoder());
        recorder.push_chunk(b"opus".to_vec()).unwrap();
        recorder.stop().unwrap();

        recorder.start(wav_spec(), 1.0).unwrap();
        assert!(recorder.has_builtin_encoder());
    }

    #[test]
    fn test_wav_duration() {
        let mut recorder = Recorder::new();
        recorder.start(wav_spec(), 0.0).unwrap();
        recorder.push_chunk(vec![0u8; 48000 * 2]).unwrap();
        let take = recorder.stop().unwrap();
        assert_eq!(take.duration_secs, Some(1.0));
    }

    #[test]
    fn test_can_record_again_after_finalize() {
        let mut recorder = Recorder::new();
        recorder.start(wav_spec(), 0.0).unwrap();
        recorder.push_chunk(vec![1, 2]).unwrap();
        recorder.stop().unwrap();

        recorder.start(wav_spec(), 5.0).unwrap();
        assert_eq!(recorder.chunk_count(), 0);
    }
}
