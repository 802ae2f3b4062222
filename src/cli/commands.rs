//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::config::EngineConfig;
use crate::engine::decode::{Decoder, DefaultDecoder};
use crate::engine::format::{classify, detect};
use crate::engine::io::export_wav;
use crate::engine::metronome::fixed_beat_count;
use crate::engine::mixer::export_overdub;
use crate::engine::{AudioEngine, ManualClock};
use crate::error::Result;
use crate::store::{DirectoryStore, TrackStore, UploadMetadata};
use crate::waveform::{placeholder, summarize};

/// Trailing silence after the last click so it can ring out
const CLICK_TAIL_SECS: f64 = 0.25;

/// Load the configuration file if given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::default().validate(),
    }
}

/// Render a fixed click run to a WAV file.
pub fn click(config: EngineConfig, bpm: f64, duration: f64, output: &Path) -> Result<()> {
    info!("Rendering click track: {:.1} BPM for {:.2}s", bpm, duration);

    let sample_rate = config.sample_rate;
    let clock = ManualClock::new();
    let mut engine = AudioEngine::create(config, clock.factory())?;
    let start = engine.play_metronome(bpm, duration, Some(0.0))?;

    let length = start + duration.max(0.0) + CLICK_TAIL_SECS;
    let frames = (length * sample_rate as f64).ceil() as usize;
    let rendered = engine.render(0.0, frames);
    engine.dispose();

    export_wav(&rendered, output)?;
    println!(
        "Wrote {} clicks ({:.2}s) to {}",
        fixed_beat_count(bpm, duration),
        rendered.duration_secs(),
        output.display()
    );

    Ok(())
}

/// Mix a take over a base track.
pub fn mix(config: &EngineConfig, base: &Path, take: &Path, output: &Path) -> Result<()> {
    info!("Mixing {} over {}", take.display(), base.display());

    let decoder = DefaultDecoder::new(config.sample_rate);
    let base_bytes = fs::read(base)?;
    let take_bytes = fs::read(take)?;

    let wav = export_overdub(&base_bytes, &take_bytes, &decoder)?;
    fs::write(output, &wav)?;

    println!("Overdub written: {} ({} bytes)", output.display(), wav.len());

    Ok(())
}

/// Print the detected container format.
pub fn classify_file(path: &Path) -> Result<()> {
    let bytes = fs::read(path)?;
    let format = classify(&bytes);

    match detect(&bytes) {
        Some(_) => println!("{}: {} (.{})", path.display(), format, format.extension()),
        None => println!(
            "{}: unrecognised, treated as {} (.{})",
            path.display(),
            format,
            format.extension()
        ),
    }

    Ok(())
}

/// Print a waveform summary as one bar per line.
pub fn waveform(config: &EngineConfig, path: &Path, bars: usize) -> Result<()> {
    let bytes = fs::read(path)?;
    let decoder = DefaultDecoder::new(config.sample_rate);

    let levels = match decoder.decode(&bytes) {
        Ok(buffer) => summarize(&buffer, bars),
        Err(e) => {
            warn!("Could not decode {}: {}", path.display(), e);
            placeholder(bars)
        }
    };

    for level in levels {
        let width = (level * 40.0).round() as usize;
        println!("{:>5.3} {}", level, "#".repeat(width));
    }

    Ok(())
}

/// Store a recording in a local directory store.
pub fn upload(
    path: &Path,
    store_dir: &Path,
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    bpm: Option<f64>,
) -> Result<()> {
    let store = DirectoryStore::open(store_dir)?;
    let payload = fs::read(path)?;

    let defaults = UploadMetadata::default();
    let title = title.or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    });
    let metadata = UploadMetadata {
        title: title.unwrap_or(defaults.title),
        author: author.unwrap_or(defaults.author),
        description: description.unwrap_or(defaults.description),
        bpm: bpm.unwrap_or(defaults.bpm),
    };

    let record = store.upload(&payload, metadata)?;

    println!("Uploaded: {}", record.id);
    println!("  Title:  {}", record.title);
    println!("  Type:   {}", record.mime_type);
    println!("  URL:    {}", record.url);

    Ok(())
}

/// List the recordings in a local directory store.
pub fn list(store_dir: &Path) -> Result<()> {
    let store = DirectoryStore::open(store_dir)?;
    let records = store.list()?;

    if records.is_empty() {
        println!("No recordings.");
        return Ok(());
    }

    println!("Recordings:");
    println!("{:-<60}", "");
    for record in records {
        println!(
            "{}  {:<24} {:>6.1} BPM  {:>9} bytes  {}",
            record.uploaded_at.format("%Y-%m-%d %H:%M"),
            record.title,
            record.bpm,
            record.size,
            record.id
        );
    }

    Ok(())
}

/// Write the default configuration.
pub fn init_config(path: &Path) -> Result<()> {
    EngineConfig::default().save(path)?;
    println!("Configuration written: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::{decode_wav, encode_wav, generate_test_tone};
    use tempfile::tempdir;

    #[test]
    fn test_click_writes_audible_wav() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("click.wav");

        click(EngineConfig::default(), 120.0, 1.0, &output).unwrap();

        let rendered = decode_wav(&fs::read(&output).unwrap()).unwrap();
        assert!(rendered.peak() > 0.0);
        assert!(rendered.duration_secs() >= 1.0);
    }

    #[test]
    fn test_mix_command() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("base.wav");
        let take = dir.path().join("take.wav");
        let output = dir.path().join("out.wav");
        fs::write(&base, encode_wav(&generate_test_tone(220.0, 0.3, 0.5, 48000)).unwrap()).unwrap();
        fs::write(&take, encode_wav(&generate_test_tone(440.0, 0.3, 0.25, 48000)).unwrap()).unwrap();

        mix(&EngineConfig::default(), &base, &take, &output).unwrap();

        let mixed = decode_wav(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(mixed.len(), 24000);
    }

    #[test]
    fn test_upload_then_list() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("riff.wav");
        fs::write(&file, encode_wav(&generate_test_tone(220.0, 0.3, 0.1, 48000)).unwrap()).unwrap();
        let store_dir = dir.path().join("store");

        upload(&file, &store_dir, None, None, None, Some(90.0)).unwrap();

        let records = DirectoryStore::open(&store_dir).unwrap().list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "riff");
        assert_eq!(records[0].bpm, 90.0);
        list(&store_dir).unwrap();
    }

    #[test]
    fn test_init_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overdub.json");
        init_config(&path).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), EngineConfig::default());
    }
}
