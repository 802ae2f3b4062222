//! Payload decoding
//!
//! Turns an encoded payload into an `AudioBuffer` at the internal sample
//! rate with at most two channels. WAV goes through `hound`; every other
//! container is probed and decoded with `symphonia`.

use std::io::Cursor;

use log::debug;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::engine::buffer::{AudioBuffer, INTERNAL_SAMPLE_RATE};
use crate::engine::format::{detect, MediaFormat};
use crate::engine::io::{decode_wav, deinterleave, resample_buffer};
use crate::error::{OverdubError, Result};

/// Something that can turn encoded bytes into PCM
pub trait Decoder {
    fn decode(&self, payload: &[u8]) -> Result<AudioBuffer>;
}

/// Decoder used by the engine
///
/// symphonia ships no Opus codec, so WebM/Opus takes (the preferred
/// recording container) are rejected with a recoverable
/// `UnsupportedFormat`, or `DecodeFailed` when the container itself cannot
/// be read. Such takes can still be stored and listed but not decoded or
/// mixed; record with `PcmOnly` when an overdub is planned.
#[derive(Debug, Clone, Copy)]
pub struct DefaultDecoder {
    target_rate: u32,
}

impl DefaultDecoder {
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

impl Default for DefaultDecoder {
    fn default() -> Self {
        Self::new(INTERNAL_SAMPLE_RATE)
    }
}

impl Decoder for DefaultDecoder {
    fn decode(&self, payload: &[u8]) -> Result<AudioBuffer> {
        if payload.is_empty() {
            return Err(OverdubError::decode("empty payload"));
        }

        let detected = detect(payload);
        let decoded = match detected {
            Some(MediaFormat::Wav) => decode_wav(payload)?,
            other => decode_compressed(payload, other)?,
        };

        if decoded.is_empty() {
            return Err(OverdubError::decode("payload contains no audio frames"));
        }

        debug!(
            "[DECODE] {} frames, {} ch @ {} Hz",
            decoded.len(),
            decoded.channels(),
            decoded.sample_rate
        );
        Ok(resample_buffer(&decoded, self.target_rate))
    }
}

/// Decode a compressed container with symphonia
fn decode_compressed(payload: &[u8], format: Option<MediaFormat>) -> Result<AudioBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(payload.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(format) = format {
        hint.with_extension(format.extension());
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(symphonia_error("probe container"))?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| OverdubError::decode("no default audio track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| OverdubError::decode("unknown sample rate"))?;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| match e {
            SymphoniaError::Unsupported(what) => OverdubError::UnsupportedFormat {
                format: format!("{} (no decoder for codec {:?})", what, track.codec_params.codec),
            },
            other => symphonia_error("create codec")(other),
        })?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = 0usize;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(symphonia_error("read packet")(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                channels = decoded.spec().channels.count();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            // Corrupt packets are skipped
            Err(SymphoniaError::DecodeError(reason)) => {
                debug!("[DECODE] Skipping bad packet: {}", reason);
            }
            Err(e) => return Err(symphonia_error("decode packet")(e)),
        }
    }

    if channels == 0 {
        return Err(OverdubError::decode("stream produced no samples"));
    }

    let mut planar = deinterleave(&interleaved, channels);
    // Keep the first two channels of anything wider than stereo
    planar.truncate(2);
    AudioBuffer::from_channels(planar, sample_rate)
}

fn symphonia_error(stage: &'static str) -> impl Fn(SymphoniaError) -> OverdubError {
    move |e| OverdubError::DecodeFailed {
        reason: format!("failed to {}: {}", stage, e),
        source: Some(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::{encode_wav, generate_test_tone};

    #[test]
    fn test_wav_is_resampled_to_target_rate() {
        let tone = generate_test_tone(440.0, 0.5, 0.25, 24000);
        let payload = encode_wav(&tone).unwrap();

        let decoded = DefaultDecoder::default().decode(&payload).unwrap();
        assert_eq!(decoded.sample_rate, INTERNAL_SAMPLE_RATE);
        assert_eq!(decoded.len(), 12000);
        assert!(decoded.peak() > 0.45);
    }

    #[test]
    fn test_empty_payload_fails() {
        let result = DefaultDecoder::default().decode(&[]);
        assert!(matches!(result, Err(OverdubError::DecodeFailed { .. })));
    }

    /// EBML element with an 8-byte size field
    fn ebml(id: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.push(0x01);
        out.extend_from_slice(&(body.len() as u64).to_be_bytes()[1..]);
        out.extend_from_slice(body);
        out
    }

    /// Minimal WebM with one Opus track and no clusters
    fn webm_opus_header() -> Vec<u8> {
        let header = ebml(
            &[0x1A, 0x45, 0xDF, 0xA3],
            &[ebml(&[0x42, 0x82], b"webm"), ebml(&[0x42, 0x87], &[4])].concat(),
        );
        let audio = ebml(
            &[0xE1],
            &[
                ebml(&[0xB5], &48000.0f64.to_be_bytes()),
                ebml(&[0x9F], &[1]),
            ]
            .concat(),
        );
        let entry = ebml(
            &[0xAE],
            &[
                ebml(&[0xD7], &[1]),
                ebml(&[0x83], &[2]),
                ebml(&[0x86], b"A_OPUS"),
                audio,
            ]
            .concat(),
        );
        let info = ebml(&[0x15, 0x49, 0xA9, 0x66], &ebml(&[0x2A, 0xD7, 0xB1], &[0x0F, 0x42, 0x40]));
        let tracks = ebml(&[0x16, 0x54, 0xAE, 0x6B], &entry);
        let segment = ebml(&[0x18, 0x53, 0x80, 0x67], &[info, tracks].concat());
        [header, segment].concat()
    }

    #[test]
    fn test_webm_opus_is_a_recoverable_failure() {
        let payload = webm_opus_header();
        assert_eq!(detect(&payload), Some(MediaFormat::Webm));

        let err = DefaultDecoder::default().decode(&payload).unwrap_err();
        assert!(matches!(
            err,
            OverdubError::UnsupportedFormat { .. } | OverdubError::DecodeFailed { .. }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_garbage_payload_fails() {
        let result = DefaultDecoder::default().decode(&[0x42; 256]);
        assert!(result.is_err());
    }
}
