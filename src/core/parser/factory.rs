//! Particle builders
//!
//! A [`ParticleFactory`] turns a data chunk into a data particle and, once per
//! session, a complete header plus the first qualifying data chunk into the
//! metadata particle. Instrument-specific unit conversions live outside this
//! crate; the factories here only map captured fields to typed values.

use serde::{Deserialize, Serialize};

use super::header::{normalize_key, HeaderState};
use super::record::{Particle, ParticleValue};
use crate::core::error::RecordError;
use crate::core::stream::Chunk;

/// Builds particles from recognized chunks
pub trait ParticleFactory: Send {
    /// Data particle for one data chunk
    fn data(&self, chunk: &Chunk) -> Result<Particle, RecordError>;

    /// Metadata particle from the completed header and the data chunk that
    /// triggered its emission
    fn metadata(&self, header: &HeaderState, chunk: &Chunk) -> Result<Particle, RecordError>;
}

/// Field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// `f64`
    #[default]
    Float,
    /// `i64`
    Int,
    /// Trimmed text
    Text,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Text => "text",
        }
    }

    /// Convert field text
    pub fn convert(self, field: &str, raw: &str) -> Result<ParticleValue, RecordError> {
        let invalid = || RecordError::InvalidField {
            field: field.to_string(),
            value: raw.to_string(),
            kind: self.name(),
        };
        match self {
            Self::Float => raw.parse::<f64>().map(ParticleValue::Float).map_err(|_| invalid()),
            Self::Int => raw.parse::<i64>().map(ParticleValue::Int).map_err(|_| invalid()),
            Self::Text => Ok(ParticleValue::Text(raw.to_string())),
        }
    }
}

/// A named field taken from a capture group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Particle field name
    pub name: String,
    /// Capture group (1-based). Defaults to the field's position + 1.
    #[serde(default)]
    pub group: Option<usize>,
    /// Value type
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Field from a capture group
    pub fn new(name: &str, group: usize, kind: FieldKind) -> Self {
        Self { name: name.to_string(), group: Some(group), kind }
    }
}

/// Serializable layout for [`DelimitedParticleFactory`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleLayout {
    /// Data particle stream name
    pub data_stream: String,
    /// Metadata particle stream name
    pub metadata_stream: String,
    /// Data fields
    pub fields: Vec<FieldSpec>,
    /// Metadata fields sourced from the first data match
    #[serde(default)]
    pub derived: Vec<FieldSpec>,
}

/// Maps regex capture groups of delimited text records to typed fields
#[derive(Debug, Clone)]
pub struct DelimitedParticleFactory {
    layout: ParticleLayout,
}

impl DelimitedParticleFactory {
    /// Create from a layout
    pub fn new(layout: ParticleLayout) -> Self {
        Self { layout }
    }

    fn extract(
        fields: &[FieldSpec],
        chunk: &Chunk,
        particle: &mut Particle,
    ) -> Result<(), RecordError> {
        for (i, field) in fields.iter().enumerate() {
            let group = field.group.unwrap_or(i + 1);
            let raw = chunk.group_str(group).ok_or_else(|| RecordError::MissingGroup {
                field: field.name.clone(),
                group,
            })?;
            particle.insert(field.name.clone(), field.kind.convert(&field.name, &raw)?);
        }
        Ok(())
    }
}

impl ParticleFactory for DelimitedParticleFactory {
    fn data(&self, chunk: &Chunk) -> Result<Particle, RecordError> {
        let mut particle = Particle::new(&self.layout.data_stream);
        Self::extract(&self.layout.fields, chunk, &mut particle)?;
        Ok(particle)
    }

    fn metadata(&self, header: &HeaderState, chunk: &Chunk) -> Result<Particle, RecordError> {
        let mut particle = Particle::new(&self.layout.metadata_stream);
        for (key, value) in header.fields() {
            particle.insert(normalize_key(key), value);
        }
        Self::extract(&self.layout.derived, chunk, &mut particle)?;
        Ok(particle)
    }
}

/// Publishes binary frames as `{tag, payload}` with the payload hex-encoded.
///
/// The payload is the frame between the tag and a `trailer`-byte checksum.
#[derive(Debug, Clone)]
pub struct RawFrameFactory {
    data_stream: String,
    metadata_stream: String,
    trailer: usize,
}

impl RawFrameFactory {
    /// Create a factory for frames with a `trailer`-byte checksum
    pub fn new(data_stream: &str, metadata_stream: &str, trailer: usize) -> Self {
        Self {
            data_stream: data_stream.to_string(),
            metadata_stream: metadata_stream.to_string(),
            trailer,
        }
    }

    fn payload<'a>(&self, chunk: &'a Chunk) -> Result<(u8, &'a [u8]), RecordError> {
        let bytes = &chunk.bytes[..];
        if bytes.len() < 1 + self.trailer {
            return Err(RecordError::ShortFrame { len: bytes.len() });
        }
        Ok((bytes[0], &bytes[1..bytes.len() - self.trailer]))
    }
}

impl ParticleFactory for RawFrameFactory {
    fn data(&self, chunk: &Chunk) -> Result<Particle, RecordError> {
        let (tag, payload) = self.payload(chunk)?;
        Ok(Particle::new(&self.data_stream)
            .with("tag", i64::from(tag))
            .with("payload", hex::encode(payload)))
    }

    fn metadata(&self, header: &HeaderState, chunk: &Chunk) -> Result<Particle, RecordError> {
        let (tag, _) = self.payload(chunk)?;
        let mut particle = Particle::new(&self.metadata_stream).with("frame_tag", i64::from(tag));
        for (key, value) in header.fields() {
            particle.insert(normalize_key(key), value);
        }
        Ok(particle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::{StreamBuffer, TextRecognizer};

    fn chunk(pattern: &str, input: &[u8]) -> Chunk {
        let mut buf = StreamBuffer::new(vec![Box::new(TextRecognizer::new("t", pattern).unwrap())]);
        buf.append(input);
        buf.next_chunk(true).unwrap()
    }

    fn layout() -> ParticleLayout {
        ParticleLayout {
            data_stream: "tilt_data".into(),
            metadata_stream: "tilt_metadata".into(),
            fields: vec![
                FieldSpec { name: "ts".into(), group: None, kind: FieldKind::Float },
                FieldSpec { name: "val".into(), group: None, kind: FieldKind::Float },
            ],
            derived: vec![FieldSpec::new("first_ts", 1, FieldKind::Float)],
        }
    }

    #[test]
    fn test_data_fields() {
        let factory = DelimitedParticleFactory::new(layout());
        let c = chunk(r"(\S+)\t(\S+)\n", b"100.0\t1.1\n");
        let p = factory.data(&c).unwrap();
        assert_eq!(p.stream, "tilt_data");
        assert_eq!(p.get("ts"), Some(&ParticleValue::Float(100.0)));
        assert_eq!(p.get("val"), Some(&ParticleValue::Float(1.1)));
    }

    #[test]
    fn test_bad_field_is_an_error() {
        let factory = DelimitedParticleFactory::new(layout());
        let c = chunk(r"(\S+)\t(\S+)\n", b"abc\t1.1\n");
        let err = factory.data(&c).unwrap_err();
        assert!(matches!(err, RecordError::InvalidField { ref field, .. } if field == "ts"));
    }

    #[test]
    fn test_metadata_uses_header_and_match() {
        let factory = DelimitedParticleFactory::new(layout());
        let mut header = HeaderState::new(["Source File"]);
        header.record("Source File", "foo.dat");
        let c = chunk(r"(\S+)\t(\S+)\n", b"100.0\t1.1\n");
        let p = factory.metadata(&header, &c).unwrap();
        assert_eq!(p.stream, "tilt_metadata");
        assert_eq!(p.get("source_file"), Some(&ParticleValue::Text("foo.dat".into())));
        assert_eq!(p.get("first_ts"), Some(&ParticleValue::Float(100.0)));
    }

    #[test]
    fn test_raw_frame_payload() {
        let factory = RawFrameFactory::new("accel", "accel_meta", 2);
        let c = chunk(r"(?s-u)\xCB.{4}", &[0xCB, 0x0A, 0x0B, 0x00, 0xE0]);
        let p = factory.data(&c).unwrap();
        assert_eq!(p.get("tag"), Some(&ParticleValue::Int(0xCB)));
        assert_eq!(p.get("payload"), Some(&ParticleValue::Text("0a0b".into())));
    }
}
