//! # Oceanlink Core Library
//!
//! Protocol plumbing for oceanographic instrument drivers:
//! - Stream recognition for ASCII line protocols and checksummed binary frames
//! - Resumable record parsing of recorded instrument files
//! - Command/response matching with per-command timeouts
//! - A serialized protocol state machine with scheduled jobs
//!
//! ## Features
//!
//! - Byte-exact checkpoints (`{position, metadataExtracted}`) for replay
//! - Pluggable checksum algorithms for binary recognizers
//! - TOML / YAML configuration, validated before anything is built
//! - Simulated instrument for exercising drivers without hardware
//! - CLI with exit codes and JSON-lines output
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::path::Path;
//! use oceanlink_core::{ParserConfig, RecordParser};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ParserConfig::load(Path::new("parser.toml"))?;
//!     let mut parser = RecordParser::new(&config, File::open("tilt.dat")?)?;
//!     parser.on_error(|e| eprintln!("skipped: {e}"));
//!
//!     loop {
//!         let records = parser.get_records(100)?;
//!         if records.is_empty() {
//!             break;
//!         }
//!         for record in &records {
//!             println!("{}", serde_json::to_string(record)?);
//!         }
//!     }
//!     println!("resume from {:?}", parser.get_state());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{CommandTable, DriverConfig, ParserConfig};
pub use crate::core::command::{CommandKind, CommandResponseMatcher, CommandSpec, PendingCommand, ResponseBuffer};
pub use crate::core::dispatcher::{EventDispatcher, Origin};
pub use crate::core::driver::{DriverEvent, DriverHandle, InstrumentDriver, Route};
pub use crate::core::error::{ConfigError, ParseError, ProtocolError, RecordError};
pub use crate::core::parser::{Checkpoint, Particle, ParticleValue, Record, RecordParser, RecordRole};
pub use crate::core::scheduler::{Scheduler, Trigger};
pub use crate::core::simulator::{LineMatcher, MatchCondition, ResponseAction, ResponseRule, SimulatedInstrument};
pub use crate::core::state_machine::{ProtocolEvent, ProtocolState, ProtocolStateMachine};
pub use crate::core::stream::{ChecksumType, Chunk, ChunkKind, RecognizerSpec, StreamBuffer};
pub use crate::core::transport::{Connection, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
