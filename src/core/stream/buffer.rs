//! Stream chunker
//!
//! Accumulates raw bytes and splits them into chunks: ranges claimed by a
//! recognizer ([`ChunkKind::Matched`]) and the gaps in front of them
//! ([`ChunkKind::NonData`]). Gaps are always handed back to the caller,
//! never dropped.

use std::ops::Range;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::recognizer::{Candidate, Found, Recognizer, RecognizerId};

/// Default ceiling on unmatched bytes held while waiting for a record
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Chunk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Claimed by a recognizer
    Matched(RecognizerId),
    /// Bytes in front of the next match that nothing claimed
    NonData,
}

/// A classified byte range of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Stream offset of the first byte
    pub start: u64,
    /// Stream offset one past the last byte
    pub end: u64,
    /// The bytes
    pub bytes: Bytes,
    /// Classification
    pub kind: ChunkKind,
    groups: Vec<Option<Range<usize>>>,
}

impl Chunk {
    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-length chunk
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Recognizer that claimed this chunk
    pub fn recognizer(&self) -> Option<RecognizerId> {
        match self.kind {
            ChunkKind::Matched(id) => Some(id),
            ChunkKind::NonData => None,
        }
    }

    /// Capture group `index` (1-based, like regex groups)
    pub fn group(&self, index: usize) -> Option<&[u8]> {
        let range = self.groups.get(index.checked_sub(1)?)?.clone()?;
        self.bytes.get(range)
    }

    /// Capture group `index` as trimmed text
    pub fn group_str(&self, index: usize) -> Option<String> {
        self.group(index).map(|g| String::from_utf8_lossy(g).trim().to_string())
    }

    /// Bytes as lossy UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Next match located in the buffer, offsets absolute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Recognizer that found it
    pub recognizer: RecognizerId,
    /// Stream offset of the match start
    pub start: u64,
    /// Stream offset one past the match end
    pub end: u64,
    groups: Vec<Option<Range<usize>>>,
}

/// Outcome of scanning every recognizer
enum Scan {
    Found(RecognizerId, Found),
    /// Earliest candidate is a partial record at this buffer index
    Waiting(usize),
    Nothing,
}

/// Byte accumulator with a set of recognizers
#[derive(Debug)]
pub struct StreamBuffer {
    buffer: BytesMut,
    /// Stream offset of `buffer[0]`
    offset: u64,
    recognizers: Vec<Box<dyn Recognizer>>,
    max_pending: usize,
}

impl StreamBuffer {
    /// Create an empty buffer with the given recognizers, in priority order
    pub fn new(recognizers: Vec<Box<dyn Recognizer>>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            offset: 0,
            recognizers,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    /// Set the unmatched-bytes ceiling
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Registered recognizers
    pub fn recognizers(&self) -> &[Box<dyn Recognizer>] {
        &self.recognizers
    }

    /// Name of a recognizer
    pub fn recognizer_name(&self, id: RecognizerId) -> &str {
        self.recognizers.get(id).map_or("?", |r| r.name())
    }

    /// Append bytes to the tail
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Stream offset of the first buffered byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Earliest match across all recognizers, without consuming it.
    ///
    /// Lowest start offset wins; on a tie the first-registered recognizer
    /// wins. Returns `None` when nothing matches or when a partial record
    /// starts ahead of every complete one.
    pub fn next_match(&self, at_eof: bool) -> Option<Match> {
        match self.scan(at_eof) {
            Scan::Found(recognizer, found) => Some(Match {
                recognizer,
                start: self.offset + found.range.start as u64,
                end: self.offset + found.range.end as u64,
                groups: found.groups,
            }),
            Scan::Waiting(_) | Scan::Nothing => None,
        }
    }

    /// Buffered bytes strictly before `before_start` (a stream offset)
    pub fn next_non_data(&self, before_start: u64) -> &[u8] {
        let end = self.index_of(before_start);
        &self.buffer[..end]
    }

    /// Drop buffered bytes up to stream offset `offset` (exclusive)
    pub fn discard_through(&mut self, offset: u64) {
        let n = self.index_of(offset);
        let _ = self.buffer.split_to(n);
        self.offset += n as u64;
    }

    /// Forget everything; the next byte appended is stream offset 0
    pub fn reset(&mut self) {
        self.reset_at(0);
    }

    /// Forget everything; the next byte appended is stream offset `offset`
    pub fn reset_at(&mut self, offset: u64) {
        self.buffer.clear();
        self.offset = offset;
    }

    /// Consume the next chunk.
    ///
    /// Gaps in front of a match come out first as [`ChunkKind::NonData`].
    /// With no match, the remaining bytes come out as non-data only once they
    /// can never become part of a record: at end of input, or when they
    /// outgrow the pending ceiling.
    pub fn next_chunk(&mut self, at_eof: bool) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }

        match self.scan(at_eof) {
            Scan::Found(recognizer, found) => {
                if found.range.start > 0 {
                    return Some(self.take(found.range.start, ChunkKind::NonData, Vec::new()));
                }
                trace!(
                    recognizer = self.recognizer_name(recognizer),
                    len = found.range.end,
                    "matched"
                );
                Some(self.take(found.range.end, ChunkKind::Matched(recognizer), found.groups))
            }
            Scan::Waiting(start) => {
                if start > 0 {
                    Some(self.take(start, ChunkKind::NonData, Vec::new()))
                } else if self.buffer.len() > self.max_pending {
                    // A partial record that never completes must not pin memory
                    let len = self.buffer.len();
                    Some(self.take(len, ChunkKind::NonData, Vec::new()))
                } else {
                    None
                }
            }
            Scan::Nothing => {
                if at_eof || self.buffer.len() > self.max_pending {
                    let len = self.buffer.len();
                    Some(self.take(len, ChunkKind::NonData, Vec::new()))
                } else {
                    None
                }
            }
        }
    }

    fn scan(&self, at_eof: bool) -> Scan {
        let mut best: Option<(RecognizerId, Candidate)> = None;
        for (id, recognizer) in self.recognizers.iter().enumerate() {
            if let Some(candidate) = recognizer.find(&self.buffer, at_eof) {
                let better = best
                    .as_ref()
                    .map_or(true, |(_, current)| candidate.start() < current.start());
                if better {
                    best = Some((id, candidate));
                }
            }
        }
        match best {
            Some((id, Candidate::Complete(found))) => Scan::Found(id, found),
            Some((_, Candidate::Incomplete { start })) => Scan::Waiting(start),
            None => Scan::Nothing,
        }
    }

    fn take(&mut self, len: usize, kind: ChunkKind, groups: Vec<Option<Range<usize>>>) -> Chunk {
        let start = self.offset;
        let bytes = self.buffer.split_to(len).freeze();
        self.offset += len as u64;
        Chunk { start, end: self.offset, bytes, kind, groups }
    }

    fn index_of(&self, offset: u64) -> usize {
        let rel = offset.saturating_sub(self.offset);
        usize::try_from(rel).unwrap_or(usize::MAX).min(self.buffer.len())
    }
}

impl Match {
    /// Match length in bytes
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// True for a zero-length match
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Number of capture groups recorded
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::checksum::ChecksumType;
    use crate::core::stream::recognizer::{BinaryRecognizer, TextRecognizer};

    fn line_buffer() -> StreamBuffer {
        StreamBuffer::new(vec![
            Box::new(TextRecognizer::new("header", r"(?m)^([A-Za-z][^:\r\n]*):[ \t]*([^\r\n]*)\r?\n").unwrap()),
            Box::new(TextRecognizer::new("data", r"(?m)^(\d+\.\d+)\t(\d+\.\d+)\r?\n").unwrap()),
        ])
    }

    #[test]
    fn test_gap_comes_before_match() {
        let mut buf = line_buffer();
        buf.append(b"garbage\n100.0\t1.1\n");

        let gap = buf.next_chunk(false).unwrap();
        assert_eq!(gap.kind, ChunkKind::NonData);
        assert_eq!(&gap.bytes[..], b"garbage\n");
        assert_eq!((gap.start, gap.end), (0, 8));

        let data = buf.next_chunk(false).unwrap();
        assert_eq!(data.kind, ChunkKind::Matched(1));
        assert_eq!(data.group_str(1).as_deref(), Some("100.0"));
        assert_eq!(data.group_str(2).as_deref(), Some("1.1"));
        assert_eq!((data.start, data.end), (8, 18));

        assert!(buf.next_chunk(false).is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_more() {
        let mut buf = line_buffer();
        buf.append(b"100.0\t1.");
        assert!(buf.next_chunk(false).is_none());
        buf.append(b"1\n");
        let data = buf.next_chunk(false).unwrap();
        assert_eq!(data.kind, ChunkKind::Matched(1));
    }

    #[test]
    fn test_leftover_is_non_data_at_eof() {
        let mut buf = line_buffer();
        buf.append(b"no newline");
        assert!(buf.next_chunk(false).is_none());
        let tail = buf.next_chunk(true).unwrap();
        assert_eq!(tail.kind, ChunkKind::NonData);
        assert_eq!(tail.len(), 10);
    }

    #[test]
    fn test_pending_ceiling_flushes() {
        let mut buf = line_buffer().with_max_pending(8);
        buf.append(b"0123456789");
        let junk = buf.next_chunk(false).unwrap();
        assert_eq!(junk.kind, ChunkKind::NonData);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let mut buf = StreamBuffer::new(vec![
            Box::new(TextRecognizer::new("first", r"abc\n").unwrap()),
            Box::new(TextRecognizer::new("second", r"ab").unwrap()),
        ]);
        buf.append(b"abc\n");
        let m = buf.next_match(false).unwrap();
        assert_eq!(m.recognizer, 0);
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn test_lowest_start_wins() {
        let mut buf = StreamBuffer::new(vec![
            Box::new(TextRecognizer::new("late", r"XYZ").unwrap()),
            Box::new(TextRecognizer::new("early", r"ab").unwrap()),
        ]);
        buf.append(b"..ab..XYZ");
        let m = buf.next_match(false).unwrap();
        assert_eq!(m.recognizer, 1);
        assert_eq!(m.start, 2);
        assert_eq!(buf.next_non_data(m.start), b"..");
    }

    #[test]
    fn test_discard_and_reset_track_offsets() {
        let mut buf = line_buffer();
        buf.append(b"abcdef");
        buf.discard_through(4);
        assert_eq!(buf.offset(), 4);
        assert_eq!(buf.len(), 2);

        buf.reset_at(100);
        assert!(buf.is_empty());
        buf.append(b"100.0\t1.1\n");
        let chunk = buf.next_chunk(false).unwrap();
        assert_eq!((chunk.start, chunk.end), (100, 110));

        buf.reset();
        assert_eq!(buf.offset(), 0);
    }

    #[test]
    fn test_incomplete_frame_blocks_later_text() {
        let mut frame = vec![0xCB, 0x01, 0x02];
        ChecksumType::Sum16.seal(&mut frame);
        let mut buf = StreamBuffer::new(vec![
            Box::new(BinaryRecognizer::new("frame", 0xCB, 5, ChecksumType::Sum16).unwrap()),
            Box::new(TextRecognizer::new("line", r"ok\n").unwrap()),
        ]);
        buf.append(&frame[..2]);
        assert!(buf.next_chunk(false).is_none());
        buf.append(&frame[2..]);
        buf.append(b"ok\n");
        assert_eq!(buf.next_chunk(false).unwrap().kind, ChunkKind::Matched(0));
        assert_eq!(buf.next_chunk(false).unwrap().kind, ChunkKind::Matched(1));
    }
}
