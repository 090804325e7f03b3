//! Error taxonomy for the protocol core
//!
//! Parse-time problems are recovered locally and reported through a
//! side-channel callback. Only command, state-transition and configuration
//! failures propagate to the caller.

use std::time::Duration;
use thiserror::Error;

use super::state_machine::{ProtocolEvent, ProtocolState};
use super::transport::TransportError;

/// Problems found while turning stream bytes into records.
///
/// None of these abort a parse pass: the parser logs them, hands them to the
/// error callback and keeps going with `position` advanced past the bytes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// An ignorable line or a malformed data record
    #[error("recoverable parse error at byte {position}: {reason}")]
    Recoverable {
        /// Source offset of the first byte of the offending chunk
        position: u64,
        /// What went wrong
        reason: String,
        /// The offending bytes
        bytes: Vec<u8>,
    },

    /// Bytes that matched no recognizer
    #[error("unexpected data at byte {position} ({} bytes)", bytes.len())]
    UnexpectedData {
        /// Source offset of the first unmatched byte
        position: u64,
        /// The unmatched bytes
        bytes: Vec<u8>,
    },

    /// Metadata could not be derived yet because header fields are missing
    #[error("metadata suppressed, missing header fields: {}", missing.join(", "))]
    MissingHeaderField {
        /// Required header keys without a value
        missing: Vec<String>,
    },
}

impl ParseError {
    /// Source offset the error refers to, when it has one
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::Recoverable { position, .. } | Self::UnexpectedData { position, .. } => {
                Some(*position)
            }
            Self::MissingHeaderField { .. } => None,
        }
    }
}

/// Failure of a particle builder on a single chunk
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Capture group the layout refers to did not participate in the match
    #[error("field `{field}`: capture group {group} is missing")]
    MissingGroup {
        /// Field name
        field: String,
        /// Capture group index
        group: usize,
    },

    /// Field text could not be converted to the configured type
    #[error("field `{field}`: cannot parse {value:?} as {kind}")]
    InvalidField {
        /// Field name
        field: String,
        /// Raw field text
        value: String,
        /// Expected type
        kind: &'static str,
    },

    /// Frame too short for the layout
    #[error("frame of {len} bytes is too short")]
    ShortFrame {
        /// Frame length
        len: usize,
    },
}

/// Errors from the command/response layer and the protocol state machine
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Expected response did not arrive in time
    #[error("command {command:?} timed out after {}ms waiting for {expected:?}", timeout.as_millis())]
    CommandTimeout {
        /// Command text as sent
        command: String,
        /// Expected response pattern
        expected: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// No handler exists for the event in the current state
    #[error("no transition for event {event:?} in state {state:?}")]
    InvalidStateTransition {
        /// State when the event was handled
        state: ProtocolState,
        /// The event
        event: ProtocolEvent,
    },

    /// Operation not allowed in the current state
    #[error("operation not allowed in state {0:?}")]
    InvalidState(ProtocolState),

    /// The transport collaborator failed to write
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The dispatcher task is gone
    #[error("driver stopped")]
    DriverStopped,
}

/// Construction-time configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A recognizer needed for a role or route is not configured
    #[error("missing required recognizer: {0}")]
    MissingRecognizer(String),

    /// A command the state machine issues is not configured
    #[error("missing command definition: {0}")]
    MissingCommand(String),

    /// A timeout is absent or zero
    #[error("missing or zero timeout: {0}")]
    MissingTimeout(String),

    /// A recognizer or response pattern failed to compile
    #[error("invalid pattern for {name}: {source}")]
    InvalidPattern {
        /// Owner of the pattern
        name: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// A value is out of range
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Config file could not be deserialized
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_position() {
        let err = ParseError::UnexpectedData { position: 12, bytes: b"junk".to_vec() };
        assert_eq!(err.position(), Some(12));
        assert!(err.to_string().contains("4 bytes"));

        let err = ParseError::MissingHeaderField { missing: vec!["Start Date".into()] };
        assert_eq!(err.position(), None);
        assert!(err.to_string().contains("Start Date"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ProtocolError::CommandTimeout {
            command: "DATA_ON".into(),
            expected: "DATA_ON".into(),
            timeout: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1500ms"));
    }
}
