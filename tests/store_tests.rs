//! Store Integration Tests
//!
//! Recordings going through a store and back into the engine.

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use overdub::engine::io::{decode_wav, encode_wav, generate_test_tone};
use overdub::engine::{export_overdub, AudioEngine, DefaultDecoder, ManualClock, MediaFormat};
use overdub::store::{DirectoryStore, MemoryStore, TrackStore, UploadMetadata};
use overdub::waveform::{summarize, DEFAULT_BARS};
use overdub::{EngineConfig, OverdubError};

fn tone_wav(frequency: f32, duration: f32) -> Vec<u8> {
    encode_wav(&generate_test_tone(frequency, 0.4, duration, 48000)).unwrap()
}

fn engine() -> AudioEngine {
    let clock = ManualClock::new();
    AudioEngine::create(EngineConfig::default(), clock.factory()).unwrap()
}

#[test]
fn test_load_track_from_memory_store() {
    let store = MemoryStore::new();
    let record = store
        .upload(
            &tone_wav(220.0, 0.5),
            UploadMetadata {
                title: "Backing".to_string(),
                bpm: 100.0,
                ..UploadMetadata::default()
            },
        )
        .unwrap();

    let mut engine = engine();
    let track = engine.load_track(&store, &record.id).unwrap();

    assert_eq!(track.id(), record.id);
    assert_eq!(track.name(), "Backing");
    assert_eq!(track.format(), MediaFormat::Wav);
    assert_eq!(engine.cache().decode_count(), 1);

    let batch = engine.play_tracks(&[track], 1.0, None).unwrap();
    assert_eq!(batch.voices.len(), 1);
}

#[test]
fn test_load_missing_track() {
    let store = MemoryStore::new();
    let mut engine = engine();

    let err = engine.load_track(&store, "no-such-id").unwrap_err();
    assert!(matches!(err, OverdubError::TrackNotFound { .. }));
}

#[test]
fn test_corrupt_payload_fails_to_decode() {
    let store = MemoryStore::new();
    let record = store
        .upload(b"RIFF\x10\x00\x00\x00WAVEjunkjunkjunk", UploadMetadata::default())
        .unwrap();

    let mut engine = engine();
    let err = engine.load_track(&store, &record.id).unwrap_err();
    assert!(matches!(err, OverdubError::DecodeFailed { .. }));
    assert!(engine.cache().is_empty());
}

#[test]
fn test_overdub_roundtrip_through_directory_store() {
    let dir = tempdir().unwrap();
    let store = DirectoryStore::open(dir.path()).unwrap();

    let base = store
        .upload(&tone_wav(220.0, 1.0), UploadMetadata::default())
        .unwrap();
    let take = tone_wav(330.0, 0.5);

    let base_bytes = store.fetch(&base.id).unwrap();
    let mixed = export_overdub(&base_bytes, &take, &DefaultDecoder::default()).unwrap();
    let overdub = store
        .upload(
            &mixed,
            UploadMetadata {
                title: "Overdub".to_string(),
                ..UploadMetadata::default()
            },
        )
        .unwrap();

    let listed: Vec<String> = store.list().unwrap().into_iter().map(|r| r.title).collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&"Overdub".to_string()));

    let decoded = decode_wav(&store.fetch(&overdub.id).unwrap()).unwrap();
    assert_eq!(decoded.len(), 48000);
    assert!(decoded.peak() <= 1.0);

    let bars = summarize(&decoded, DEFAULT_BARS);
    assert_eq!(bars.len(), DEFAULT_BARS);
    assert!(bars.iter().any(|b| *b == 1.0));
}

#[test]
fn test_store_files_are_named_after_format() {
    let dir = tempdir().unwrap();
    let store = DirectoryStore::open(dir.path()).unwrap();
    let record = store
        .upload(&tone_wav(440.0, 0.1), UploadMetadata::default())
        .unwrap();

    assert!(record.filename.starts_with("recording-"));
    assert!(record.filename.ends_with(".wav"));

    let on_disk = fs::read(dir.path().join("uploads").join(&record.filename)).unwrap();
    assert_eq!(on_disk.len(), record.size);
}
