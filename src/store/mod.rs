//! Track storage
//!
//! The storage collaborator is a simple object store: it accepts an encoded
//! recording plus metadata and hands back a stable id and retrieval URL.
//! Core code never retries uploads.
//!
//! Implementations:
//! - `MemoryStore`: in-process, for tests and previews
//! - `DirectoryStore`: audio files plus JSON sidecars on disk
//! - `HttpStore`: the recordings HTTP API (feature `http-store`)

mod directory;
#[cfg(feature = "http-store")]
mod http;

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::format::{classify, MediaFormat};
use crate::engine::track::{Track, TrackInfo};
use crate::error::{OverdubError, Result};

pub use directory::DirectoryStore;
#[cfg(feature = "http-store")]
pub use http::HttpStore;

/// Largest accepted upload (50 MiB)
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Metadata supplied with an upload; blanks fall back to defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub title: String,
    pub author: String,
    pub description: String,
    pub bpm: f64,
}

impl Default for UploadMetadata {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            author: "Anonymous".to_string(),
            description: String::new(),
            bpm: 120.0,
        }
    }
}

impl UploadMetadata {
    /// Replace blank or invalid fields with their defaults
    pub fn normalised(self) -> Self {
        let defaults = Self::default();
        Self {
            title: non_blank(self.title, defaults.title),
            author: non_blank(self.author, defaults.author),
            description: self.description.trim().to_string(),
            bpm: if self.bpm.is_finite() && self.bpm > 0.0 {
                self.bpm
            } else {
                defaults.bpm
            },
        }
    }
}

fn non_blank(value: String, fallback: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed.to_string()
    }
}

/// A stored recording as reported by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecording {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub author: String,
    pub bpm: f64,
    pub filename: String,
    pub size: usize,
    #[serde(rename = "mimetype")]
    pub mime_type: String,
    #[serde(rename = "uploadDate")]
    pub uploaded_at: DateTime<Utc>,
    pub url: String,
}

impl StoredRecording {
    /// Build the record for a freshly accepted upload
    fn new(payload: &[u8], metadata: UploadMetadata) -> Self {
        let format = classify(payload);
        let metadata = metadata.normalised();
        let uploaded_at = Utc::now();
        let filename = format!(
            "recording-{}-{}.{}",
            uploaded_at.timestamp_millis(),
            Uuid::new_v4().simple(),
            format.extension()
        );

        Self {
            id: Uuid::new_v4().to_string(),
            title: metadata.title,
            description: metadata.description,
            author: metadata.author,
            bpm: metadata.bpm,
            url: format!("/uploads/{}", filename),
            filename,
            size: payload.len(),
            mime_type: format.container().mime_type().to_string(),
            uploaded_at,
        }
    }

    /// Turn the record and its payload into a playable track
    pub fn to_track(&self, payload: impl Into<std::sync::Arc<[u8]>>) -> Track {
        let info = TrackInfo {
            id: self.id.clone(),
            name: self.title.clone(),
            description: self.description.clone(),
            bpm: self.bpm,
            offset: 0.0,
            author: self.author.clone(),
            created_at: self.uploaded_at,
        };
        Track::from_parts(info, payload)
    }

    /// Container sniffed at upload time
    pub fn format(&self) -> Option<MediaFormat> {
        self.mime_type.parse().ok()
    }
}

/// Reject payloads the store would not accept
pub fn check_upload(payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(OverdubError::UploadRejected {
            reason: "audio payload is empty".to_string(),
        });
    }
    if payload.len() > MAX_UPLOAD_BYTES {
        return Err(OverdubError::UploadRejected {
            reason: format!(
                "file too large ({} bytes, limit {} bytes)",
                payload.len(),
                MAX_UPLOAD_BYTES
            ),
        });
    }
    Ok(())
}

/// The storage collaborator
pub trait TrackStore {
    /// Store an encoded recording; returns its record (id and URL)
    fn upload(&self, payload: &[u8], metadata: UploadMetadata) -> Result<StoredRecording>;

    /// Encoded bytes of a recording
    fn fetch(&self, id: &str) -> Result<Vec<u8>>;

    /// Record of a recording
    fn get(&self, id: &str) -> Result<StoredRecording>;

    /// Every record, oldest first
    fn list(&self) -> Result<Vec<StoredRecording>>;

    /// Remove a recording and its payload
    fn delete(&self, id: &str) -> Result<()>;
}

// ============================================================================
// Memory store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryEntries {
    records: Vec<StoredRecording>,
    payloads: BTreeMap<String, Vec<u8>>,
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<MemoryEntries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryEntries>> {
        self.entries.lock().map_err(|_| OverdubError::Storage {
            reason: "memory store lock poisoned".to_string(),
        })
    }
}

impl TrackStore for MemoryStore {
    fn upload(&self, payload: &[u8], metadata: UploadMetadata) -> Result<StoredRecording> {
        check_upload(payload)?;
        let record = StoredRecording::new(payload, metadata);

        let mut entries = self.lock()?;
        entries.payloads.insert(record.id.clone(), payload.to_vec());
        entries.records.push(record.clone());
        info!("[STORE] Stored {} ({} bytes)", record.id, record.size);
        Ok(record)
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        self.lock()?
            .payloads
            .get(id)
            .cloned()
            .ok_or_else(|| OverdubError::TrackNotFound { id: id.to_string() })
    }

    fn get(&self, id: &str) -> Result<StoredRecording> {
        self.lock()?
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| OverdubError::TrackNotFound { id: id.to_string() })
    }

    fn list(&self) -> Result<Vec<StoredRecording>> {
        Ok(self.lock()?.records.clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.lock()?;
        let before = entries.records.len();
        entries.records.retain(|r| r.id != id);
        if entries.records.len() == before {
            return Err(OverdubError::TrackNotFound { id: id.to_string() });
        }
        entries.payloads.remove(id);
        info!("[STORE] Deleted {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::{AudioBuffer, ChannelLayout};
    use crate::engine::io::encode_wav;

    fn wav_payload() -> Vec<u8> {
        encode_wav(&AudioBuffer::new(480, ChannelLayout::Mono)).unwrap()
    }

    #[test]
    fn test_metadata_defaults() {
        let metadata = UploadMetadata {
            title: "  ".to_string(),
            author: String::new(),
            description: " riff ".to_string(),
            bpm: f64::NAN,
        }
        .normalised();

        assert_eq!(metadata.title, "Untitled");
        assert_eq!(metadata.author, "Anonymous");
        assert_eq!(metadata.description, "riff");
        assert_eq!(metadata.bpm, 120.0);
    }

    #[test]
    fn test_upload_classifies_payload() {
        let store = MemoryStore::new();
        let record = store.upload(&wav_payload(), UploadMetadata::default()).unwrap();

        assert_eq!(record.mime_type, "audio/wav");
        assert!(record.filename.ends_with(".wav"));
        assert_eq!(record.url, format!("/uploads/{}", record.filename));
        assert_eq!(record.format(), Some(MediaFormat::Wav));
    }

    #[test]
    fn test_unknown_payload_stored_as_mp4() {
        let store = MemoryStore::new();
        let record = store
            .upload(&[0x11u8; 64], UploadMetadata::default())
            .unwrap();
        assert_eq!(record.mime_type, "audio/mp4");
        assert!(record.filename.ends_with(".mp4"));
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        assert!(matches!(
            check_upload(&[]),
            Err(OverdubError::UploadRejected { .. })
        ));
        let oversized = vec![0u8; MAX_UPLOAD_BYTES + 1];
        assert!(check_upload(&oversized).is_err());
    }

    #[test]
    fn test_fetch_get_list_delete() {
        let store = MemoryStore::new();
        let payload = wav_payload();
        let record = store.upload(&payload, UploadMetadata::default()).unwrap();

        assert_eq!(store.fetch(&record.id).unwrap(), payload);
        assert_eq!(store.get(&record.id).unwrap(), record);
        assert_eq!(store.list().unwrap().len(), 1);

        store.delete(&record.id).unwrap();
        assert!(matches!(
            store.fetch(&record.id),
            Err(OverdubError::TrackNotFound { .. })
        ));
        assert!(store.delete(&record.id).is_err());
    }

    #[test]
    fn test_record_to_track() {
        let store = MemoryStore::new();
        let payload = wav_payload();
        let record = store
            .upload(
                &payload,
                UploadMetadata {
                    title: "Take 1".to_string(),
                    bpm: 96.0,
                    ..UploadMetadata::default()
                },
            )
            .unwrap();

        let track = record.to_track(payload);
        assert_eq!(track.id(), record.id);
        assert_eq!(track.name(), "Take 1");
        assert_eq!(track.bpm(), 96.0);
    }

    #[test]
    fn test_record_json_uses_api_field_names() {
        let store = MemoryStore::new();
        let record = store.upload(&wav_payload(), UploadMetadata::default()).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("mimetype").is_some());
        assert!(json.get("uploadDate").is_some());
        let back: StoredRecording = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
