//! Container formats
//!
//! Recording format negotiation and content-based classification of
//! uploaded payloads. Classification never trusts file names or declared
//! MIME types, only the leading bytes.

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};

use crate::error::{OverdubError, Result};

/// Number of leading bytes inspected by `detect`
pub const SNIFF_LEN: usize = 20;

/// EBML magic that opens every Matroska/WebM file
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// A recording/upload container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    /// WebM with an Opus stream
    WebmOpus,
    Webm,
    Mp4,
    /// 16-bit PCM WAV written by this crate
    Wav,
}

impl MediaFormat {
    /// Recording preference order; the first supported format wins
    pub const PREFERENCE: [MediaFormat; 4] = [
        MediaFormat::WebmOpus,
        MediaFormat::Webm,
        MediaFormat::Mp4,
        MediaFormat::Wav,
    ];

    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaFormat::WebmOpus => "audio/webm;codecs=opus",
            MediaFormat::Webm => "audio/webm",
            MediaFormat::Mp4 => "audio/mp4",
            MediaFormat::Wav => "audio/wav",
        }
    }

    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::WebmOpus | MediaFormat::Webm => "webm",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Wav => "wav",
        }
    }

    /// Container family, dropping codec parameters
    pub fn container(&self) -> MediaFormat {
        match self {
            MediaFormat::WebmOpus => MediaFormat::Webm,
            other => *other,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

impl FromStr for MediaFormat {
    type Err = OverdubError;

    fn from_str(s: &str) -> Result<Self> {
        let normalised: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalised.as_str() {
            "audio/webm;codecs=opus" | "webm;codecs=opus" | "opus" => Ok(MediaFormat::WebmOpus),
            "audio/webm" | "webm" => Ok(MediaFormat::Webm),
            "audio/mp4" | "mp4" | "m4a" => Ok(MediaFormat::Mp4),
            "audio/wav" | "audio/wave" | "audio/x-wav" | "wav" => Ok(MediaFormat::Wav),
            _ => Err(OverdubError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Encoder support
// ============================================================================

/// What the platform's encoder can produce
pub trait EncoderSupport {
    fn supports(&self, format: MediaFormat) -> bool;
}

/// Only the built-in PCM WAV writer is available
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmOnly;

impl EncoderSupport for PcmOnly {
    fn supports(&self, format: MediaFormat) -> bool {
        format == MediaFormat::Wav
    }
}

/// A fixed list of supported formats, e.g. as reported by a platform probe
#[derive(Debug, Clone, Default)]
pub struct SupportedFormats(pub Vec<MediaFormat>);

impl EncoderSupport for SupportedFormats {
    fn supports(&self, format: MediaFormat) -> bool {
        self.0.contains(&format)
    }
}

/// Pick the first supported format in preference order
///
/// WAV is always available, so this never fails.
pub fn select_recording_format(support: &dyn EncoderSupport) -> MediaFormat {
    for format in MediaFormat::PREFERENCE {
        if format == MediaFormat::Wav || support.supports(format) {
            if format == MediaFormat::Wav {
                warn!("[FORMAT] No compressed container available, recording PCM WAV");
            } else {
                debug!("[FORMAT] Recording as {}", format);
            }
            return format;
        }
    }
    MediaFormat::Wav
}

// ============================================================================
// Content classification
// ============================================================================

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Identify a container from its leading bytes
///
/// Returns None when nothing matches (including payloads of four bytes or
/// fewer).
pub fn detect(bytes: &[u8]) -> Option<MediaFormat> {
    if bytes.len() <= 4 {
        return None;
    }
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];

    if contains(head, b"ftypmp4") || contains(head, b"ftypisom") || contains(head, b"ftypM4A") {
        Some(MediaFormat::Mp4)
    } else if contains(head, b"webm") || contains(head, b"matroska") || head.starts_with(&EBML_MAGIC)
    {
        Some(MediaFormat::Webm)
    } else if contains(head, b"RIFF") && contains(head, b"WAVE") {
        Some(MediaFormat::Wav)
    } else {
        None
    }
}

/// Identify a container, defaulting to MP4 when unknown
pub fn classify(bytes: &[u8]) -> MediaFormat {
    detect(bytes).unwrap_or_else(|| {
        debug!("[FORMAT] Unknown container, assuming mp4");
        MediaFormat::Mp4
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn padded(head: &[u8]) -> Vec<u8> {
        let mut bytes = head.to_vec();
        bytes.resize(32, 0);
        bytes
    }

    #[test_case(b"\0\0\0\x20ftypisom\0\0\0\0", MediaFormat::Mp4 ; "isom brand")]
    #[test_case(b"\0\0\0\x1cftypM4A \0\0\0\0", MediaFormat::Mp4 ; "m4a brand")]
    #[test_case(b"\0\0\0\x18ftypmp42\0\0\0\0", MediaFormat::Mp4 ; "mp42 brand")]
    #[test_case(b"\x1a\x45\xdf\xa3\x9f\x42\x86\x81", MediaFormat::Webm ; "ebml magic")]
    #[test_case(b"\x1a\x45\xdf\xa3\x42\x82\x84webm", MediaFormat::Webm ; "webm doctype")]
    #[test_case(b"RIFF\x24\0\0\0WAVEfmt ", MediaFormat::Wav ; "riff wave")]
    fn test_classify(head: &[u8], expected: MediaFormat) {
        assert_eq!(classify(&padded(head)), expected);
        assert_eq!(detect(&padded(head)), Some(expected));
    }

    #[test]
    fn test_unknown_defaults_to_mp4() {
        assert_eq!(detect(b"ID3\x04\0\0\0\0\0\0"), None);
        assert_eq!(classify(b"ID3\x04\0\0\0\0\0\0"), MediaFormat::Mp4);
    }

    #[test]
    fn test_short_payload_defaults_to_mp4() {
        assert_eq!(detect(b"RIFF"), None);
        assert_eq!(classify(b""), MediaFormat::Mp4);
    }

    #[test]
    fn test_markers_beyond_sniff_window_are_ignored() {
        let mut bytes = vec![0u8; 24];
        bytes.extend_from_slice(b"RIFF....WAVE");
        assert_eq!(detect(&bytes), None);
    }

    #[test]
    fn test_preference_order() {
        let all = SupportedFormats(MediaFormat::PREFERENCE.to_vec());
        assert_eq!(select_recording_format(&all), MediaFormat::WebmOpus);

        let mp4_only = SupportedFormats(vec![MediaFormat::Mp4]);
        assert_eq!(select_recording_format(&mp4_only), MediaFormat::Mp4);

        let nothing = SupportedFormats(Vec::new());
        assert_eq!(select_recording_format(&nothing), MediaFormat::Wav);
        assert_eq!(select_recording_format(&PcmOnly), MediaFormat::Wav);
    }

    #[test]
    fn test_mime_and_extension() {
        assert_eq!(MediaFormat::WebmOpus.mime_type(), "audio/webm;codecs=opus");
        assert_eq!(MediaFormat::WebmOpus.extension(), "webm");
        assert_eq!(MediaFormat::Mp4.extension(), "mp4");
        assert_eq!("audio/webm; codecs=opus".parse::<MediaFormat>().unwrap(), MediaFormat::WebmOpus);
        assert_eq!("WAV".parse::<MediaFormat>().unwrap(), MediaFormat::Wav);
        assert!("audio/flac".parse::<MediaFormat>().is_err());
    }
}
