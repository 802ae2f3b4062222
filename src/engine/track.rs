//! Backing tracks
//!
//! A track is an encoded payload plus metadata. The payload is immutable
//! and shared; its SHA-256 is the content identity used by the buffer
//! cache, so two tracks with the same bytes decode once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::engine::format::{classify, MediaFormat};

/// Hex SHA-256 of a payload
pub fn content_id(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Serializable part of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub bpm: f64,
    /// Start offset within a playback batch, seconds (never negative)
    pub offset: f64,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// A backing track: metadata and encoded audio
#[derive(Debug, Clone)]
pub struct Track {
    info: TrackInfo,
    payload: Arc<[u8]>,
    content_id: String,
}

impl Track {
    /// Create a track with a fresh id and zero offset
    pub fn new(name: impl Into<String>, payload: impl Into<Arc<[u8]>>) -> Self {
        let payload = payload.into();
        let info = TrackInfo {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            bpm: 120.0,
            offset: 0.0,
            author: "Anonymous".to_string(),
            created_at: Utc::now(),
        };
        Self::from_parts(info, payload)
    }

    /// Rebuild a track from stored metadata and payload
    pub fn from_parts(mut info: TrackInfo, payload: impl Into<Arc<[u8]>>) -> Self {
        let payload = payload.into();
        info.offset = clamp_offset(info.offset);
        let content_id = content_id(&payload);
        Self {
            info,
            payload,
            content_id,
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.set_offset(offset);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.info.author = author.into();
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.info.bpm = bpm;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    /// Set the start offset; negative or non-finite values become zero
    pub fn set_offset(&mut self, offset: f64) {
        self.info.offset = clamp_offset(offset);
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn offset(&self) -> f64 {
        self.info.offset
    }

    pub fn bpm(&self) -> f64 {
        self.info.bpm
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle to the encoded bytes
    pub fn payload_arc(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }

    /// Content identity (SHA-256 of the payload)
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Container sniffed from the payload
    pub fn format(&self) -> MediaFormat {
        classify(&self.payload)
    }
}

fn clamp_offset(offset: f64) -> f64 {
    if offset.is_finite() {
        offset.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_is_never_negative() {
        let mut track = Track::new("bass", vec![1u8, 2, 3]).with_offset(-2.0);
        assert_eq!(track.offset(), 0.0);
        track.set_offset(f64::NAN);
        assert_eq!(track.offset(), 0.0);
        track.set_offset(1.5);
        assert_eq!(track.offset(), 1.5);
    }

    #[test]
    fn test_same_payload_same_content_id() {
        let a = Track::new("a", vec![9u8; 64]);
        let b = Track::new("b", vec![9u8; 64]);
        let c = Track::new("c", vec![8u8; 64]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.content_id(), b.content_id());
        assert_ne!(a.content_id(), c.content_id());
    }

    #[test]
    fn test_content_id_is_sha256_hex() {
        assert_eq!(
            content_id(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_from_parts_clamps_offset() {
        let info = TrackInfo {
            id: "t1".to_string(),
            name: "drums".to_string(),
            description: String::new(),
            bpm: 90.0,
            offset: -1.0,
            author: "me".to_string(),
            created_at: Utc::now(),
        };
        let track = Track::from_parts(info, vec![0u8; 4]);
        assert_eq!(track.offset(), 0.0);
        assert_eq!(track.id(), "t1");
    }
}
