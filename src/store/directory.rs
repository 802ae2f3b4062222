//! Directory-backed store
//!
//! Layout under the root:
//! - `uploads/<filename>`: the encoded audio
//! - `recordings/<id>.json`: the record

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::{check_upload, StoredRecording, TrackStore, UploadMetadata};
use crate::error::{OverdubError, Result};

const UPLOADS_DIR: &str = "uploads";
const RECORDS_DIR: &str = "recordings";

/// Store recordings as files under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(UPLOADS_DIR))?;
        fs::create_dir_all(root.join(RECORDS_DIR))?;
        debug!("[STORE] Opened directory store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        // ids are uuids; anything with a path separator is not ours
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(OverdubError::TrackNotFound { id: id.to_string() });
        }
        Ok(self.root.join(RECORDS_DIR).join(format!("{}.json", id)))
    }

    fn upload_path(&self, record: &StoredRecording) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(&record.filename)
    }
}

impl TrackStore for DirectoryStore {
    fn upload(&self, payload: &[u8], metadata: UploadMetadata) -> Result<StoredRecording> {
        check_upload(payload)?;
        let record = StoredRecording::new(payload, metadata);

        fs::write(self.upload_path(&record), payload)?;
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(self.record_path(&record.id)?, json)?;

        info!(
            "[STORE] Saved {} as {} ({} bytes)",
            record.id, record.filename, record.size
        );
        Ok(record)
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let record = self.get(id)?;
        fs::read(self.upload_path(&record)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OverdubError::TrackNotFound { id: id.to_string() },
            _ => OverdubError::Io(e),
        })
    }

    fn get(&self, id: &str) -> Result<StoredRecording> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Err(OverdubError::TrackNotFound { id: id.to_string() });
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn list(&self) -> Result<Vec<StoredRecording>> {
        let mut records = Vec::new();

        for entry in WalkDir::new(self.root.join(RECORDS_DIR))
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let parsed = fs::read_to_string(path)
                .map_err(OverdubError::from)
                .and_then(|json| Ok(serde_json::from_str::<StoredRecording>(&json)?));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("[STORE] Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        records.sort_by_key(|r| r.uploaded_at);
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let record = self.get(id)?;
        let audio = self.upload_path(&record);
        if audio.exists() {
            fs::remove_file(audio)?;
        }
        fs::remove_file(self.record_path(id)?)?;
        info!("[STORE] Deleted {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_upload_writes_audio_and_record() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        let record = store
            .upload(b"RIFF\0\0\0\0WAVEfmt rest", UploadMetadata::default())
            .unwrap();

        assert!(dir.path().join("uploads").join(&record.filename).exists());
        assert!(dir
            .path()
            .join("recordings")
            .join(format!("{}.json", record.id))
            .exists());
        assert_eq!(store.fetch(&record.id).unwrap(), b"RIFF\0\0\0\0WAVEfmt rest");
    }

    #[test]
    fn test_list_survives_reopen() {
        let dir = tempdir().unwrap();
        let first = {
            let store = DirectoryStore::open(dir.path()).unwrap();
            store.upload(&[1u8; 32], UploadMetadata::default()).unwrap()
        };

        let reopened = DirectoryStore::open(dir.path()).unwrap();
        let second = reopened.upload(&[2u8; 32], UploadMetadata::default()).unwrap();
        let ids: Vec<String> = reopened.list().unwrap().into_iter().map(|r| r.id).collect();

        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id));
        assert!(ids.contains(&second.id));
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        store.upload(&[1u8; 32], UploadMetadata::default()).unwrap();
        fs::write(dir.path().join("recordings").join("broken.json"), "{").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_and_missing_ids() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        let record = store.upload(&[1u8; 32], UploadMetadata::default()).unwrap();

        store.delete(&record.id).unwrap();
        assert!(!dir.path().join("uploads").join(&record.filename).exists());
        assert!(matches!(
            store.get(&record.id),
            Err(OverdubError::TrackNotFound { .. })
        ));
        assert!(store.get("../escape").is_err());
    }
}
