//! Track playback scheduler
//!
//! All tracks of one batch share a single reference start time, so their
//! relative alignment depends only on their offsets. Every voice is kept
//! so a later stop can silence all of them.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::engine::buffer::AudioBuffer;
use crate::engine::cache::BufferCache;
use crate::engine::timeline::{EventId, EventKind, EventQueue, EventSource, TrackStart};
use crate::engine::track::Track;

/// One scheduled track
#[derive(Debug, Clone)]
pub struct Voice {
    pub event: EventId,
    pub track_id: String,
    /// Absolute clock time at which the track starts sounding
    pub start_time: f64,
    pub buffer: Arc<AudioBuffer>,
}

/// Result of scheduling a batch of tracks
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBatch {
    /// Shared reference time of the batch
    pub start_time: f64,
    /// Events of the voices that were scheduled, in track order
    pub voices: Vec<EventId>,
    /// Tracks skipped because no decoded buffer was available
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub struct TrackPlayback {
    voices: Vec<Voice>,
    start_margin: f64,
}

impl TrackPlayback {
    pub fn new(start_margin: f64) -> Self {
        Self {
            voices: Vec::new(),
            start_margin,
        }
    }

    /// Schedule `tracks` against one common start time
    ///
    /// Each track sounds at `start_time + track.offset()`. Tracks without a
    /// cached buffer contribute nothing.
    pub fn play_tracks(
        &mut self,
        tracks: &[Track],
        cache: &BufferCache,
        start_at: Option<f64>,
        now: f64,
        queue: &mut EventQueue,
    ) -> PlaybackBatch {
        let start_time = start_at.unwrap_or(now + self.start_margin);
        let mut batch = PlaybackBatch {
            start_time,
            voices: Vec::with_capacity(tracks.len()),
            skipped: Vec::new(),
        };

        for track in tracks {
            let Some(buffer) = cache.get_for(track) else {
                warn!("[PLAYBACK] Track {} has no decoded buffer, skipping", track.id());
                batch.skipped.push(track.id().to_string());
                continue;
            };

            let at = start_time + track.offset();
            let event = queue.enqueue(
                at,
                EventKind::TrackStart(TrackStart {
                    track_id: track.id().to_string(),
                    offset_secs: track.offset(),
                    duration_secs: buffer.duration_secs(),
                }),
            );
            debug!("[PLAYBACK] Track {} at {:.3}s", track.id(), at);

            self.voices.push(Voice {
                event,
                track_id: track.id().to_string(),
                start_time: at,
                buffer,
            });
            batch.voices.push(event);
        }

        info!(
            "[PLAYBACK] Batch of {} track(s) at {:.3}s ({} skipped)",
            batch.voices.len(),
            start_time,
            batch.skipped.len()
        );
        batch
    }

    /// Stop every voice that has not finished; returns how many were cut
    ///
    /// Voices that already ended naturally are ignored.
    pub fn stop_all(&mut self, now: f64, queue: &mut EventQueue) -> usize {
        let stopped = queue.stop_source(EventSource::Playback, now);
        if stopped > 0 {
            info!("[PLAYBACK] Stopped {} voice(s)", stopped);
        }
        self.voices.clear();
        stopped
    }

    /// Every voice scheduled since the last stop
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Voices sounding or still pending at `now`
    pub fn active_voices<'a>(
        &'a self,
        now: f64,
        queue: &'a EventQueue,
    ) -> impl Iterator<Item = &'a Voice> + 'a {
        self.voices.iter().filter(move |voice| {
            queue
                .get(voice.event)
                .map(|event| !event.is_cancelled() && event.end() > now)
                .unwrap_or(false)
        })
    }

    /// Look up the voice behind an event
    pub fn voice(&self, event: EventId) -> Option<&Voice> {
        self.voices.iter().find(|voice| voice.event == event)
    }

    /// Forget voices that finished before `now`
    pub fn prune(&mut self, now: f64, queue: &EventQueue) {
        self.voices.retain(|voice| {
            queue
                .get(voice.event)
                .map(|event| event.end() >= now)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;
    use approx::assert_abs_diff_eq;

    fn cached(cache: &mut BufferCache, name: &str, seconds: f64, offset: f64) -> Track {
        let track = Track::new(name, name.as_bytes().to_vec()).with_offset(offset);
        let frames = (seconds * 48000.0) as usize;
        cache.insert(track.content_id(), AudioBuffer::new(frames, ChannelLayout::Stereo));
        track
    }

    #[test]
    fn test_batch_shares_start_time() {
        let mut cache = BufferCache::new();
        let tracks = vec![
            cached(&mut cache, "drums", 2.0, 0.0),
            cached(&mut cache, "bass", 2.0, 0.5),
        ];
        let mut playback = TrackPlayback::new(0.05);
        let mut queue = EventQueue::new();

        let batch = playback.play_tracks(&tracks, &cache, Some(10.0), 1.0, &mut queue);

        assert_eq!(batch.start_time, 10.0);
        let starts: Vec<f64> = batch
            .voices
            .iter()
            .map(|id| queue.get(*id).unwrap().at)
            .collect();
        assert_eq!(starts, vec![10.0, 10.5]);
    }

    #[test]
    fn test_default_start_uses_margin() {
        let mut cache = BufferCache::new();
        let tracks = vec![cached(&mut cache, "keys", 1.0, 0.0)];
        let mut playback = TrackPlayback::new(0.05);
        let mut queue = EventQueue::new();

        let batch = playback.play_tracks(&tracks, &cache, None, 3.0, &mut queue);
        assert_abs_diff_eq!(batch.start_time, 3.05, epsilon = 1e-9);
    }

    #[test]
    fn test_undecoded_tracks_are_skipped() {
        let mut cache = BufferCache::new();
        let ready = cached(&mut cache, "ready", 1.0, 0.0);
        let missing = Track::new("missing", vec![7u8; 8]);
        let mut playback = TrackPlayback::new(0.05);
        let mut queue = EventQueue::new();

        let batch = playback.play_tracks(&[missing.clone(), ready], &cache, Some(1.0), 0.0, &mut queue);
        assert_eq!(batch.voices.len(), 1);
        assert_eq!(batch.skipped, vec![missing.id().to_string()]);
    }

    #[test]
    fn test_stop_all_and_double_stop() {
        let mut cache = BufferCache::new();
        let tracks = vec![
            cached(&mut cache, "short", 0.5, 0.0),
            cached(&mut cache, "long", 5.0, 0.0),
        ];
        let mut playback = TrackPlayback::new(0.05);
        let mut queue = EventQueue::new();
        playback.play_tracks(&tracks, &cache, Some(0.0), 0.0, &mut queue);

        // The short track already finished on its own
        assert_eq!(playback.active_voices(1.0, &queue).count(), 1);
        assert_eq!(playback.stop_all(1.0, &mut queue), 1);
        assert_eq!(playback.stop_all(1.1, &mut queue), 0);
        assert!(playback.voices().is_empty());
    }
}
