//! Core module containing the protocol machinery
//!
//! This module provides:
//! - Stream recognition (text regex and binary tag + checksum recognizers)
//! - Resumable record parsing with byte-exact checkpoints
//! - Command/response matching over a transport seam
//! - Scheduled jobs and serialized event dispatch
//! - Protocol state machine and the instrument driver built on it
//! - A simulated instrument for exercising drivers without hardware

pub mod command;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod parser;
pub mod scheduler;
pub mod simulator;
pub mod state_machine;
pub mod stream;
pub mod transport;
