//! Decoded buffer cache
//!
//! Decoding is the expensive part of loading a track, so results are
//! memoised by content identity. A payload is decoded at most once no
//! matter how many tracks share it, and a cached buffer is never replaced or
//! evicted. Failures are not cached; a later attempt decodes again.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::engine::buffer::AudioBuffer;
use crate::engine::decode::Decoder;
use crate::engine::track::Track;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct BufferCache {
    buffers: HashMap<String, Arc<AudioBuffer>>,
    decodes: usize,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached buffer for a content id
    pub fn get(&self, content_id: &str) -> Option<Arc<AudioBuffer>> {
        self.buffers.get(content_id).cloned()
    }

    /// Cached buffer for a track
    pub fn get_for(&self, track: &Track) -> Option<Arc<AudioBuffer>> {
        self.get(track.content_id())
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.buffers.contains_key(content_id)
    }

    /// Return the cached buffer for `track`, decoding it on first use
    pub fn get_or_decode(&mut self, track: &Track, decoder: &dyn Decoder) -> Result<Arc<AudioBuffer>> {
        if let Some(buffer) = self.get_for(track) {
            debug!("[CACHE] Hit for track {}", track.id());
            return Ok(buffer);
        }

        let buffer = decoder.decode(track.payload()).map_err(|e| {
            warn!("[CACHE] Decode failed for track {}: {}", track.id(), e);
            e
        })?;
        self.decodes += 1;

        let buffer = Arc::new(buffer);
        self.buffers
            .insert(track.content_id().to_string(), Arc::clone(&buffer));
        debug!(
            "[CACHE] Decoded track {} ({:.2}s)",
            track.id(),
            buffer.duration_secs()
        );
        Ok(buffer)
    }

    /// Insert an already decoded buffer
    ///
    /// Entries are never replaced: if `content_id` is already cached the
    /// existing buffer is returned and `buffer` is dropped.
    pub fn insert(&mut self, content_id: impl Into<String>, buffer: AudioBuffer) -> Arc<AudioBuffer> {
        let content_id = content_id.into();
        if self.buffers.contains_key(&content_id) {
            debug!("[CACHE] {} already cached, keeping first buffer", content_id);
        }
        Arc::clone(
            self.buffers
                .entry(content_id)
                .or_insert_with(|| Arc::new(buffer)),
        )
    }

    /// Number of successful decodes performed so far
    pub fn decode_count(&self) -> usize {
        self.decodes
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
