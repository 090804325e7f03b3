//! Record output for ingestion runs

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::core::error::ParseError;
use crate::core::parser::{Checkpoint, Record};

/// Output format for records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

/// Writes records to a sink, counting what went by
pub struct RecordWriter<W: Write> {
    out: W,
    format: OutputFormat,
    summary: IngestSummary,
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Metadata records written
    pub metadata: usize,
    /// Data records written
    pub data: usize,
    /// Parse errors reported
    pub parse_errors: usize,
    /// Checkpoint after the last record
    pub checkpoint: Checkpoint,
}

impl<W: Write> RecordWriter<W> {
    /// Create a writer
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format, summary: IngestSummary::default() }
    }

    /// Write one record
    pub fn write(&mut self, record: &Record) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, record)?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => {
                let kind = if record.is_metadata() { "metadata" } else { "data" };
                let particle = record.particle();
                let fields = particle
                    .values
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(
                    self.out,
                    "{:>10}  {:<8} {}  {}",
                    record.checkpoint().position,
                    kind,
                    particle.stream,
                    fields
                )?;
            }
        }

        if record.is_metadata() {
            self.summary.metadata += 1;
        } else {
            self.summary.data += 1;
            self.summary.checkpoint = record.checkpoint();
        }
        Ok(())
    }

    /// Count a parse error
    pub fn note_parse_errors(&mut self, count: usize) {
        self.summary.parse_errors += count;
    }

    /// Record the final checkpoint
    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.summary.checkpoint = checkpoint;
    }

    /// Flush and return the counters
    pub fn finish(mut self) -> io::Result<IngestSummary> {
        self.out.flush()?;
        Ok(self.summary)
    }
}

/// One-line description of a parse error, with control bytes escaped
pub fn describe_parse_error(error: &ParseError) -> String {
    match error {
        ParseError::Recoverable { bytes, .. } | ParseError::UnexpectedData { bytes, .. } => {
            format!("{error}: \"{}\"", escaped(bytes))
        }
        ParseError::MissingHeaderField { .. } => error.to_string(),
    }
}

fn escaped(data: &[u8]) -> String {
    data.iter()
        .map(|&b| match b {
            0x00 => "\\0".to_string(),
            0x09 => "\\t".to_string(),
            0x0a => "\\n".to_string(),
            0x0d => "\\r".to_string(),
            0x1b => "\\e".to_string(),
            0x20..=0x7e => (b as char).to_string(),
            _ => format!("\\x{b:02x}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::Particle;

    fn data(position: u64) -> Record {
        Record::Data {
            particle: Particle::new("tilt").with("ts", 100.0).with("val", 1.1),
            checkpoint: Checkpoint::new(position, true),
        }
    }

    #[test]
    fn test_json_lines() {
        let mut writer = RecordWriter::new(Vec::new(), OutputFormat::Json);
        writer
            .write(&Record::Metadata {
                particle: Particle::new("tilt_metadata").with("source_file", "foo.dat"),
                checkpoint: Checkpoint::METADATA,
            })
            .unwrap();
        writer.write(&data(110)).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.metadata, 1);
        assert_eq!(summary.data, 1);
        assert_eq!(summary.checkpoint.position, 110);
    }

    #[test]
    fn test_text_line() {
        let mut out = Vec::new();
        {
            let mut writer = RecordWriter::new(&mut out, OutputFormat::Text);
            writer.write(&data(10)).unwrap();
            writer.finish().unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("data"));
        assert!(text.contains("ts=100"));
    }

    #[test]
    fn test_escaped_error() {
        let error = ParseError::UnexpectedData { position: 3, bytes: b"\x01ab\r\n".to_vec() };
        let line = describe_parse_error(&error);
        assert!(line.ends_with("\"\\x01ab\\r\\n\""));
    }
}
