//! Stream recognition
//!
//! Provides the chunker that segments a noisy byte stream into records:
//! - [`StreamBuffer`] - byte accumulator producing matched / non-data chunks
//! - [`Recognizer`] implementations for text (regex) and binary (tag + checksum)
//! - Checksum algorithms for binary frames

pub mod buffer;
pub mod checksum;
pub mod recognizer;

pub use buffer::{Chunk, ChunkKind, Match, StreamBuffer, DEFAULT_MAX_PENDING};
pub use checksum::ChecksumType;
pub use recognizer::{
    BinaryRecognizer, Candidate, Found, Recognizer, RecognizerId, RecognizerSpec, TextRecognizer,
};
