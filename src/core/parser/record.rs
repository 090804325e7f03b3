//! Parser output: typed particles wrapped in metadata / data records

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::checkpoint::Checkpoint;

/// A particle field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParticleValue {
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
}

impl ParticleValue {
    /// Numeric view
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParticleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParticleValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParticleValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParticleValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParticleValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Named stream of typed values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Stream name
    pub stream: String,
    /// Field values by name
    pub values: BTreeMap<String, ParticleValue>,
}

impl Particle {
    /// Create an empty particle
    pub fn new(stream: impl Into<String>) -> Self {
        Self { stream: stream.into(), values: BTreeMap::new() }
    }

    /// Add a value
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParticleValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParticleValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get a value
    pub fn get(&self, name: &str) -> Option<&ParticleValue> {
        self.values.get(name)
    }
}

/// Parser output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    /// Emitted once per session, derived from the header
    Metadata {
        /// Metadata particle
        particle: Particle,
        /// Always [`Checkpoint::METADATA`]
        checkpoint: Checkpoint,
    },
    /// One per recognized data record
    Data {
        /// Data particle
        particle: Particle,
        /// Parser state right after this record
        checkpoint: Checkpoint,
    },
}

impl Record {
    /// The particle
    pub fn particle(&self) -> &Particle {
        match self {
            Self::Metadata { particle, .. } | Self::Data { particle, .. } => particle,
        }
    }

    /// Checkpoint to resume after this record
    pub fn checkpoint(&self) -> Checkpoint {
        match self {
            Self::Metadata { checkpoint, .. } | Self::Data { checkpoint, .. } => *checkpoint,
        }
    }

    /// True for the metadata record
    pub fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let record = Record::Data {
            particle: Particle::new("tilt").with("ts", 100.0).with("count", 3i64),
            checkpoint: Checkpoint::new(10, true),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "data");
        assert_eq!(json["particle"]["values"]["ts"], 100.0);
        assert_eq!(json["particle"]["values"]["count"], 3);
        assert_eq!(json["checkpoint"]["position"], 10);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(ParticleValue::Int(2).as_f64(), Some(2.0));
        assert_eq!(ParticleValue::from("x").as_str(), Some("x"));
        assert_eq!(ParticleValue::Float(1.5).to_string(), "1.5");
    }
}
