//! CLI Module
//!
//! Provides command-line interface support:
//! - Exit codes for automation
//! - JSON-lines record output for ingestion runs

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{describe_parse_error, IngestSummary, OutputFormat, RecordWriter};
