//! Resumable record parser
//!
//! Pulls chunks out of a [`StreamBuffer`] fed from a seekable source,
//! accumulates header fields, and emits one metadata record plus a data
//! record per recognized data chunk. The parse position is checkpointed
//! byte-exactly so a parser can be rebuilt and resumed from any record.

pub mod checkpoint;
pub mod factory;
pub mod header;
pub mod record;

pub use checkpoint::Checkpoint;
pub use factory::{
    DelimitedParticleFactory, FieldKind, FieldSpec, ParticleFactory, ParticleLayout,
    RawFrameFactory,
};
pub use header::HeaderState;
pub use record::{Particle, ParticleValue, Record};

use std::io::{self, Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ParserConfig;
use crate::core::error::{ConfigError, ParseError};
use crate::core::stream::{Chunk, ChunkKind, StreamBuffer};

/// What the parser does with a recognizer's matches, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordRole {
    /// `key: value` header line; capture groups 1 and 2
    Header,
    /// Data record
    Data,
    /// Expected banner or noise line, skipped
    Ignore,
}

/// Side-channel for recovered parse errors
pub type ErrorCallback = Box<dyn FnMut(&ParseError) + Send>;

/// Resumable parser over a `Read + Seek` source
pub struct RecordParser<R> {
    source: R,
    buffer: StreamBuffer,
    /// Role per recognizer id
    roles: Vec<RecordRole>,
    header: HeaderState,
    factory: Box<dyn ParticleFactory>,
    checkpoint: Checkpoint,
    eof: bool,
    read_size: usize,
    missing_reported: bool,
    on_error: Option<ErrorCallback>,
}

impl<R: Read + Seek> RecordParser<R> {
    /// Build a parser using the particle layout from the config
    pub fn new(config: &ParserConfig, source: R) -> Result<Self, ConfigError> {
        let layout = config
            .particles
            .clone()
            .ok_or_else(|| ConfigError::InvalidValue("no particle layout configured".into()))?;
        Self::with_factory(config, source, Box::new(DelimitedParticleFactory::new(layout)))
    }

    /// Build a parser with a caller-supplied particle factory
    pub fn with_factory(
        config: &ParserConfig,
        source: R,
        factory: Box<dyn ParticleFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        // Registration order doubles as classification priority
        let mut specs: Vec<_> = config.recognizers.iter().collect();
        specs.sort_by_key(|spec| *spec.role());

        let mut recognizers = Vec::with_capacity(specs.len());
        let mut roles = Vec::with_capacity(specs.len());
        for spec in specs {
            recognizers.push(spec.build()?);
            roles.push(*spec.role());
        }

        Ok(Self {
            source,
            buffer: StreamBuffer::new(recognizers).with_max_pending(config.max_pending),
            roles,
            header: HeaderState::new(config.required_header_keys.iter().cloned()),
            factory,
            checkpoint: Checkpoint::default(),
            eof: false,
            read_size: config.read_size,
            missing_reported: false,
            on_error: None,
        })
    }

    /// Report recovered parse errors to `callback`
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(&ParseError) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    /// Current checkpoint
    pub fn get_state(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Accumulated header
    pub fn header(&self) -> &HeaderState {
        &self.header
    }

    /// Give back the source
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Resume from `checkpoint`: seek the source, drop buffered bytes and
    /// replace the checkpoint. The header is kept; missing header fields are
    /// reported again.
    pub fn set_state(&mut self, checkpoint: Checkpoint) -> io::Result<()> {
        self.source.seek(SeekFrom::Start(checkpoint.position))?;
        self.buffer.reset_at(checkpoint.position);
        self.checkpoint = checkpoint;
        self.eof = false;
        self.missing_reported = false;
        debug!(
            position = checkpoint.position,
            metadata_extracted = checkpoint.metadata_extracted,
            "parser state restored"
        );
        Ok(())
    }

    /// Produce up to `max_data` data records.
    ///
    /// Returns fewer when the source runs out. A newly derived metadata record
    /// is placed first, on top of the data records, so the batch that carries
    /// it holds `max_data + 1` records.
    pub fn get_records(&mut self, max_data: usize) -> io::Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut data_count = 0;

        while data_count < max_data {
            let Some(chunk) = self.buffer.next_chunk(self.eof) else {
                if self.eof {
                    break;
                }
                self.refill()?;
                continue;
            };

            let start = self.checkpoint.position;
            self.checkpoint.position += chunk.len() as u64;

            match chunk.kind {
                ChunkKind::NonData => {
                    self.report(ParseError::UnexpectedData { position: start, bytes: chunk.bytes.to_vec() });
                }
                ChunkKind::Matched(id) => match self.roles[id] {
                    RecordRole::Header => self.handle_header(&chunk, start),
                    RecordRole::Data => {
                        if self.handle_data(&chunk, start, &mut records) {
                            data_count += 1;
                        }
                    }
                    RecordRole::Ignore => {
                        self.report(ParseError::Recoverable {
                            position: start,
                            reason: format!("ignored {} line", self.buffer.recognizer_name(id)),
                            bytes: chunk.bytes.to_vec(),
                        });
                    }
                },
            }
        }

        debug!(
            records = records.len(),
            position = self.checkpoint.position,
            "batch complete"
        );
        Ok(records)
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = vec![0u8; self.read_size];
        let n = loop {
            match self.source.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.buffer.append(&chunk[..n]);
        }
        Ok(())
    }

    fn handle_header(&mut self, chunk: &Chunk, start: u64) {
        match (chunk.group_str(1), chunk.group_str(2)) {
            (Some(key), Some(value)) => {
                if self.header.record(&key, &value) {
                    debug!(key = %key, value = %value, "header field");
                } else {
                    debug!(key = %key, "header key not required, skipped");
                }
            }
            _ => self.report(ParseError::Recoverable {
                position: start,
                reason: "header line without key/value".into(),
                bytes: chunk.bytes.to_vec(),
            }),
        }
    }

    /// Returns true when a data record was produced
    fn handle_data(&mut self, chunk: &Chunk, start: u64, records: &mut Vec<Record>) -> bool {
        let particle = match self.factory.data(chunk) {
            Ok(p) => p,
            Err(e) => {
                self.report(ParseError::Recoverable {
                    position: start,
                    reason: e.to_string(),
                    bytes: chunk.bytes.to_vec(),
                });
                return false;
            }
        };

        // Without required header keys the stream has no metadata record
        if !self.checkpoint.metadata_extracted && !self.header.required().is_empty() {
            self.try_metadata(chunk, start, records);
        }

        records.push(Record::Data { particle, checkpoint: self.checkpoint });
        true
    }

    fn try_metadata(&mut self, chunk: &Chunk, start: u64, records: &mut Vec<Record>) {
        if !self.header.is_complete() {
            if !self.missing_reported {
                self.missing_reported = true;
                self.report(ParseError::MissingHeaderField { missing: self.header.missing() });
            }
            return;
        }

        match self.factory.metadata(&self.header, chunk) {
            Ok(particle) => {
                self.checkpoint.metadata_extracted = true;
                debug!(stream = %particle.stream, "metadata derived");
                records.insert(0, Record::Metadata { particle, checkpoint: Checkpoint::METADATA });
            }
            Err(e) => self.report(ParseError::Recoverable {
                position: start,
                reason: format!("metadata: {e}"),
                bytes: chunk.bytes.to_vec(),
            }),
        }
    }

    fn report(&mut self, error: ParseError) {
        warn!("{error}");
        if let Some(callback) = self.on_error.as_mut() {
            callback(&error);
        }
    }
}
