//! Encoding and delimiter detection
//!
//! Detection never consumes the input. Rejections happen in a fixed order:
//! empty file, header-only file, then a header line without any candidate
//! delimiter.

use encoding_rs::Encoding;
use std::borrow::Cow;
use tracing::debug;

use crate::config::FormatConfig;
use crate::error::{IngestError, IngestResult};

/// Candidate delimiters; ties resolve in this order
pub const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Encodings tried when detection is not confident
pub const FALLBACK_ENCODINGS: [TextEncoding; 3] = [
    TextEncoding::Utf8,
    TextEncoding::Latin1,
    TextEncoding::Windows1252,
];

/// A text encoding the reader can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value
    Latin1,
    Windows1252,
    Other(&'static Encoding),
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Other(encoding) => encoding.name(),
        }
    }

    fn from_encoding(encoding: &'static Encoding) -> Self {
        if encoding == encoding_rs::UTF_8 {
            TextEncoding::Utf8
        } else if encoding == encoding_rs::WINDOWS_1252 {
            TextEncoding::Windows1252
        } else {
            TextEncoding::Other(encoding)
        }
    }

    /// Strict decode; `None` if any byte sequence is malformed
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            TextEncoding::Utf8 => {
                let body = strip_bom(bytes, encoding_rs::UTF_8);
                std::str::from_utf8(body).ok().map(Cow::Borrowed)
            }
            TextEncoding::Latin1 => Some(Cow::Owned(bytes.iter().map(|&b| b as char).collect())),
            TextEncoding::Windows1252 => encoding_rs::WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes),
            TextEncoding::Other(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(strip_bom(bytes, *encoding)),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of format detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFormat {
    pub encoding: TextEncoding,
    pub delimiter: u8,
    /// Encoding detector confidence in [0, 1]
    pub confidence: f32,
}

impl DetectedFormat {
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> IngestResult<Cow<'a, str>> {
        self.encoding.decode(bytes).ok_or_else(|| {
            IngestError::ParseCorruption(format!("content is not valid {}", self.encoding))
        })
    }
}

/// Detect text encoding and field delimiter
pub fn detect(bytes: &[u8], config: &FormatConfig) -> IngestResult<DetectedFormat> {
    if bytes.is_empty() {
        return Err(IngestError::EmptyFile);
    }

    if bytes.len() < config.header_only_threshold {
        let lossy = String::from_utf8_lossy(bytes);
        if lossy.lines().filter(|line| !line.trim().is_empty()).count() <= 1 {
            return Err(IngestError::HeaderOnly);
        }
    }

    let (encoding, confidence, text) = detect_encoding(bytes, config)?;

    let header = text
        .trim_start_matches('\u{feff}')
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default();
    let delimiter = detect_delimiter(header)?;

    debug!(
        encoding = %encoding,
        confidence,
        delimiter = %char::from(delimiter).escape_default(),
        "Detected file format"
    );

    Ok(DetectedFormat {
        encoding,
        delimiter,
        confidence,
    })
}

/// Count each candidate in the header line and take the most frequent
pub fn detect_delimiter(header: &str) -> IngestResult<u8> {
    let mut best = (0usize, DELIMITERS[0]);
    for candidate in DELIMITERS {
        let count = header.bytes().filter(|b| *b == candidate).count();
        if count > best.0 {
            best = (count, candidate);
        }
    }

    if best.0 == 0 {
        return Err(IngestError::DelimiterNotFound {
            header: header.to_string(),
        });
    }
    Ok(best.1)
}

fn detect_encoding<'a>(
    bytes: &'a [u8],
    config: &FormatConfig,
) -> IngestResult<(TextEncoding, f32, Cow<'a, str>)> {
    let sample = &bytes[..bytes.len().min(config.encoding_sample_bytes)];
    let (guess, confidence) = guess_encoding(sample);

    if confidence >= config.encoding_confidence {
        if let Some(text) = guess.decode(bytes) {
            return Ok((guess, confidence, text));
        }
        debug!(encoding = %guess, "Detected encoding failed on full content, probing fallbacks");
    } else {
        debug!(
            encoding = %guess,
            confidence,
            threshold = config.encoding_confidence,
            "Low encoding confidence, probing fallbacks"
        );
    }

    try_fallbacks(bytes)
        .map(|(encoding, text)| (encoding, confidence, text))
        .ok_or_else(|| {
            IngestError::ParseCorruption(
                "content could not be decoded with any supported encoding".to_string(),
            )
        })
}

/// First fallback encoding that decodes the whole input strictly
fn try_fallbacks(bytes: &[u8]) -> Option<(TextEncoding, Cow<'_, str>)> {
    FALLBACK_ENCODINGS
        .iter()
        .find_map(|encoding| encoding.decode(bytes).map(|text| (*encoding, text)))
}

fn guess_encoding(sample: &[u8]) -> (TextEncoding, f32) {
    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return (TextEncoding::from_encoding(encoding), 1.0);
    }

    match std::str::from_utf8(sample) {
        Ok(_) => return (TextEncoding::Utf8, 1.0),
        // A sample cut inside a multi-byte sequence is still UTF-8
        Err(e) if e.error_len().is_none() => return (TextEncoding::Utf8, 1.0),
        Err(_) => {}
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(sample, true);
    let encoding = detector.guess(None, true);

    let (decoded, _) = encoding.decode_without_bom_handling(sample);
    (TextEncoding::from_encoding(encoding), plausibility(&decoded))
}

/// Share of decoded characters that are printable text
fn plausibility(text: &str) -> f32 {
    let mut total = 0usize;
    let mut suspicious = 0usize;
    for c in text.chars() {
        total += 1;
        if c == '\u{fffd}' || (c.is_control() && !matches!(c, '\t' | '\n' | '\r')) {
            suspicious += 1;
        }
    }

    if total == 0 {
        return 0.0;
    }
    1.0 - suspicious as f32 / total as f32
}

fn strip_bom<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> &'a [u8] {
    match Encoding::for_bom(bytes) {
        Some((found, len)) if found == encoding => &bytes[len..],
        _ => bytes,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn detect_default(bytes: &[u8]) -> IngestResult<DetectedFormat> {
        detect(bytes, &FormatConfig::default())
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(detect_default(b""), Err(IngestError::EmptyFile)));
    }

    #[test]
    fn test_header_only_file() {
        assert!(matches!(
            detect_default(b"email,name,phone\n"),
            Err(IngestError::HeaderOnly)
        ));
        assert!(matches!(
            detect_default(b"email,name\n\n   \n"),
            Err(IngestError::HeaderOnly)
        ));
    }

    #[test]
    fn test_large_single_line_is_not_header_only() {
        let config = FormatConfig {
            header_only_threshold: 8,
            ..FormatConfig::default()
        };
        let detected = detect(b"email,name,phone\n", &config).unwrap();
        assert_eq!(detected.delimiter, b',');
    }

    #[test]
    fn test_delimiters() {
        assert_eq!(detect_default(b"email,name\na@b.io,A\n").unwrap().delimiter, b',');
        assert_eq!(detect_default(b"email\tname\na@b.io\tA\n").unwrap().delimiter, b'\t');
        assert_eq!(detect_default(b"email;name\na@b.io;A\n").unwrap().delimiter, b';');
        assert_eq!(detect_default(b"email|name\na@b.io|A\n").unwrap().delimiter, b'|');
    }

    #[test]
    fn test_delimiter_tie_uses_candidate_order() {
        assert_eq!(detect_delimiter("a;b,c").unwrap(), b',');
        assert_eq!(detect_delimiter("a|b\tc").unwrap(), b'\t');
        assert_eq!(detect_delimiter("a;b;c,d").unwrap(), b';');
    }

    #[test]
    fn test_missing_delimiter() {
        let err = detect_default(b"email\na@b.io\n").unwrap_err();
        assert!(matches!(err, IngestError::DelimiterNotFound { ref header } if header == "email"));
    }

    #[test]
    fn test_utf8_with_bom() {
        let detected = detect_default(b"\xef\xbb\xbfemail,name\na@b.io,Jos\xc3\xa9\n").unwrap();
        assert_eq!(detected.encoding, TextEncoding::Utf8);
        assert_eq!(detected.confidence, 1.0);

        let text = detected.decode(b"\xef\xbb\xbfemail,name\n").unwrap();
        assert_eq!(text, "email,name\n");
    }

    #[test]
    fn test_single_byte_encoding() {
        let bytes = b"email;name;city\njose@x.com;Jos\xe9;S\xe3o Paulo\nana@x.com;Ana;M\xfcnchen\n";
        let detected = detect_default(bytes).unwrap();

        assert_ne!(detected.encoding, TextEncoding::Utf8);
        assert_eq!(detected.delimiter, b';');
        let text = detected.decode(bytes).unwrap();
        assert!(text.contains("José"));
        assert!(text.contains("München"));
    }

    #[test]
    fn test_fallback_order() {
        let (encoding, _) = try_fallbacks(b"email,name\na@b.io,Ann\n").unwrap();
        assert_eq!(encoding, TextEncoding::Utf8);

        let bytes = b"email,name\na@b.io,Jos\xe9\n";
        let (encoding, text) = try_fallbacks(bytes).unwrap();
        assert_eq!(encoding, TextEncoding::Latin1);
        assert!(text.contains("José"));
    }

    #[test]
    fn test_latin1_decodes_every_byte() {
        let all: Vec<u8> = (0..=255).collect();
        let text = TextEncoding::Latin1.decode(&all).unwrap();
        assert_eq!(text.chars().count(), 256);
    }
}
