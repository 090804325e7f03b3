//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use std::process::ExitCode;

use crate::core::error::{ConfigError, ProtocolError};

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Command timeout
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Input had parse errors and `--strict` was given
    pub const PARSE_ERRORS: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Every code, in table order
    pub const ALL: [u8; 10] = [0, 1, 2, 4, 6, 7, 8, 9, 17, 127];

    /// Exit code for an error bubbled up to `main`
    pub fn for_error(err: &anyhow::Error) -> u8 {
        if let Some(e) = err.downcast_ref::<ConfigError>() {
            return match e {
                ConfigError::Io(io) => Self::for_io(io),
                _ => Self::CONFIG_ERROR,
            };
        }
        if let Some(e) = err.downcast_ref::<ProtocolError>() {
            return match e {
                ProtocolError::CommandTimeout { .. } => Self::TIMEOUT,
                _ => Self::PROTOCOL_ERROR,
            };
        }
        if let Some(e) = err.downcast_ref::<std::io::Error>() {
            return Self::for_io(e);
        }
        Self::ERROR
    }

    fn for_io(err: &std::io::Error) -> u8 {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => Self::PERMISSION_DENIED,
            ErrorKind::TimedOut => Self::TIMEOUT,
            _ => Self::ERROR,
        }
    }
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a summary line
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<anyhow::Error> for CliResult {
    fn from(err: anyhow::Error) -> Self {
        Self::Error(ExitCodes::for_error(&err), format!("{err:#}"))
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        4 => "Command timeout",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        17 => "Input contained parse errors",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
