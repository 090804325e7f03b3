//! Recognizers: pluggable matchers that locate records in buffered bytes
//!
//! Two kinds are provided:
//! - [`TextRecognizer`] - a regex over the raw bytes (line protocols)
//! - [`BinaryRecognizer`] - a one-byte tag, fixed frame length and checksum

use std::fmt;
use std::ops::Range;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::checksum::ChecksumType;
use crate::core::error::ConfigError;

/// Index of a recognizer in its [`StreamBuffer`](super::StreamBuffer), in
/// registration order
pub type RecognizerId = usize;

/// A located record, offsets relative to the searched slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    /// Byte range of the whole record
    pub range: Range<usize>,
    /// Capture group ranges (group 1 onwards), relative to `range.start`
    pub groups: Vec<Option<Range<usize>>>,
}

/// Result of a recognizer scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A full record
    Complete(Found),
    /// A record may start here but its bytes have not all arrived
    Incomplete {
        /// Offset of the partial record
        start: usize,
    },
}

impl Candidate {
    /// Offset where the candidate begins
    pub fn start(&self) -> usize {
        match self {
            Self::Complete(found) => found.range.start,
            Self::Incomplete { start } => *start,
        }
    }
}

/// A named matcher over buffered bytes. Immutable once configured.
pub trait Recognizer: Send + Sync + fmt::Debug {
    /// Name used in logs and routing
    fn name(&self) -> &str;

    /// Find the earliest candidate in `haystack`.
    ///
    /// `at_eof` tells the recognizer no more bytes will follow, so partial
    /// records can never complete.
    fn find(&self, haystack: &[u8], at_eof: bool) -> Option<Candidate>;
}

/// Regex recognizer for ASCII line protocols
#[derive(Debug, Clone)]
pub struct TextRecognizer {
    name: String,
    regex: Regex,
}

impl TextRecognizer {
    /// Compile a text recognizer
    pub fn new(name: &str, pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        Ok(Self { name: name.to_string(), regex })
    }

    /// Number of capture groups, excluding the implicit whole-match group
    pub fn group_count(&self) -> usize {
        self.regex.captures_len() - 1
    }
}

impl Recognizer for TextRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, haystack: &[u8], _at_eof: bool) -> Option<Candidate> {
        // An empty match would never advance the stream
        let caps = self
            .regex
            .captures_iter(haystack)
            .find(|caps| caps.get(0).is_some_and(|m| !m.is_empty()))?;
        let whole = caps.get(0)?;
        let base = whole.start();
        let groups = caps
            .iter()
            .skip(1)
            .map(|g| g.map(|m| (m.start() - base)..(m.end() - base)))
            .collect();
        Some(Candidate::Complete(Found { range: whole.range(), groups }))
    }
}

/// Binary frame recognizer: `tag` + payload + checksum trailer, `frame_len`
/// bytes in total.
///
/// A tag whose frame fails the checksum is a false positive; scanning resumes
/// at the next byte so a garbled frame never hides the one behind it.
#[derive(Debug, Clone)]
pub struct BinaryRecognizer {
    name: String,
    tag: u8,
    frame_len: usize,
    checksum: ChecksumType,
}

impl BinaryRecognizer {
    /// Create a binary recognizer
    pub fn new(
        name: &str,
        tag: u8,
        frame_len: usize,
        checksum: ChecksumType,
    ) -> Result<Self, ConfigError> {
        if frame_len <= checksum.size() + 1 {
            return Err(ConfigError::InvalidValue(format!(
                "{name}: frame_len {frame_len} leaves no room for tag and {} checksum",
                checksum.name()
            )));
        }
        Ok(Self { name: name.to_string(), tag, frame_len, checksum })
    }

    /// Total frame length
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

impl Recognizer for BinaryRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, haystack: &[u8], at_eof: bool) -> Option<Candidate> {
        let mut from = 0;
        while let Some(offset) = haystack[from..].iter().position(|&b| b == self.tag) {
            let start = from + offset;
            let end = start + self.frame_len;
            if end > haystack.len() {
                if !at_eof {
                    return Some(Candidate::Incomplete { start });
                }
            } else if self.checksum.verify_frame(&haystack[start..end]) {
                return Some(Candidate::Complete(Found { range: start..end, groups: Vec::new() }));
            } else {
                trace!(recognizer = %self.name, start, "checksum mismatch, resyncing");
            }
            from = start + 1;
        }
        None
    }
}

/// Serializable recognizer definition, generic over what the owner does with
/// a match (a parser role or a driver route)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognizerSpec<R> {
    /// Regex over text
    Text {
        /// Recognizer name
        name: String,
        /// Regex pattern (bytes regex, `(?m)` for line anchors)
        pattern: String,
        /// What the owner does with a match
        role: R,
    },
    /// Tagged binary frame
    Binary {
        /// Recognizer name
        name: String,
        /// Leading tag byte
        tag: u8,
        /// Total frame length including tag and checksum
        frame_len: usize,
        /// Checksum algorithm
        #[serde(default)]
        checksum: ChecksumType,
        /// What the owner does with a match
        role: R,
    },
}

impl<R: Clone> RecognizerSpec<R> {
    /// Recognizer name
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::Binary { name, .. } => name,
        }
    }

    /// Role or route attached to the recognizer
    pub fn role(&self) -> &R {
        match self {
            Self::Text { role, .. } | Self::Binary { role, .. } => role,
        }
    }

    /// Compile into a recognizer
    pub fn build(&self) -> Result<Box<dyn Recognizer>, ConfigError> {
        match self {
            Self::Text { name, pattern, .. } => Ok(Box::new(TextRecognizer::new(name, pattern)?)),
            Self::Binary { name, tag, frame_len, checksum, .. } => {
                Ok(Box::new(BinaryRecognizer::new(name, *tag, *frame_len, *checksum)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![tag];
        f.extend_from_slice(payload);
        ChecksumType::Sum16.seal(&mut f);
        f
    }

    #[test]
    fn test_text_groups_are_relative() {
        let rec = TextRecognizer::new("data", r"(?m)^(\d+\.\d+)\t(\d+\.\d+)\r?\n").unwrap();
        let hay = b"junk\n100.0\t1.1\n";
        let Some(Candidate::Complete(found)) = rec.find(hay, false) else {
            panic!("expected a match");
        };
        assert_eq!(found.range, 5..15);
        assert_eq!(found.groups, vec![Some(0..5), Some(6..9)]);
        assert_eq!(rec.group_count(), 2);
    }

    #[test]
    fn test_text_rejects_empty_match() {
        let rec = TextRecognizer::new("empty", r"x*").unwrap();
        assert_eq!(rec.find(b"abc", true), None);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = TextRecognizer::new("bad", r"(unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_binary_match() {
        let rec = BinaryRecognizer::new("accel", 0xCB, 6, ChecksumType::Sum16).unwrap();
        let mut hay = vec![0x00, 0x01];
        hay.extend(frame(0xCB, &[1, 2, 3]));
        let Some(Candidate::Complete(found)) = rec.find(&hay, false) else {
            panic!("expected a frame");
        };
        assert_eq!(found.range, 2..8);
    }

    #[test]
    fn test_binary_resyncs_one_byte_at_a_time() {
        let rec = BinaryRecognizer::new("accel", 0xCB, 6, ChecksumType::Sum16).unwrap();
        // Garbled frame whose body contains another tag byte two bytes in
        let mut hay = vec![0xCB, 0x00];
        hay.extend(frame(0xCB, &[9, 9, 9]));
        let Some(Candidate::Complete(found)) = rec.find(&hay, false) else {
            panic!("expected a frame");
        };
        assert_eq!(found.range, 2..8);
    }

    #[test]
    fn test_binary_incomplete_until_eof() {
        let rec = BinaryRecognizer::new("accel", 0xCB, 6, ChecksumType::Sum16).unwrap();
        let hay = [0x11, 0xCB, 0x01];
        assert_eq!(rec.find(&hay, false), Some(Candidate::Incomplete { start: 1 }));
        assert_eq!(rec.find(&hay, true), None);
    }

    #[test]
    fn test_binary_frame_too_short() {
        assert!(BinaryRecognizer::new("tiny", 0xCB, 3, ChecksumType::Sum16).is_err());
    }

    #[test]
    fn test_spec_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            recognizers: Vec<RecognizerSpec<String>>,
        }
        let w: Wrapper = toml::from_str(
            r#"
            [[recognizers]]
            kind = "text"
            name = "header"
            pattern = '(?m)^([^:\r\n]+):[ \t]*([^\r\n]*)\r?\n'
            role = "header"

            [[recognizers]]
            kind = "binary"
            name = "accel"
            tag = 203
            frame_len = 43
            role = "data"
            "#,
        )
        .unwrap();
        assert_eq!(w.recognizers.len(), 2);
        assert_eq!(w.recognizers[1].name(), "accel");
        assert!(w.recognizers.iter().all(|r| r.build().is_ok()));
    }
}
