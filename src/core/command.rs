//! Command/response matching
//!
//! Writes a command to the device (optionally one byte at a time for
//! instruments with slow input buffers), then polls the response buffer at a
//! fixed interval until the expected pattern shows up or the timeout expires.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::error::{ConfigError, ProtocolError};
use super::transport::Connection;

/// Default response poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default ceiling on buffered response bytes
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 8 * 1024;

/// Commands the protocol state machine issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Status query used by discovery
    Status,
    /// Start streaming samples
    DataOn,
    /// Stop streaming samples
    DataOff,
    /// Start leveling
    LevelOn,
    /// Stop leveling
    LevelOff,
}

impl CommandKind {
    /// Every command kind
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Status,
        CommandKind::DataOn,
        CommandKind::DataOff,
        CommandKind::LevelOn,
        CommandKind::LevelOff,
    ];

    /// Config key
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Status => "status",
            CommandKind::DataOn => "data_on",
            CommandKind::DataOff => "data_off",
            CommandKind::LevelOn => "level_on",
            CommandKind::LevelOff => "level_off",
        }
    }
}

/// Serializable command definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Bytes to write, as text (`"DATA_ON\r\n"`)
    pub command: String,
    /// Regex the response must match
    pub expected: String,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Delay after each written byte, 0 writes the command in one go
    #[serde(default)]
    pub write_delay_ms: u64,
}

impl CommandSpec {
    /// Compile into a sendable command
    pub fn compile(&self, name: &str) -> Result<PendingCommand, ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::MissingTimeout(name.to_string()));
        }
        Ok(PendingCommand::new(
            self.command.clone().into_bytes(),
            name,
            &self.expected,
            Duration::from_millis(self.timeout_ms),
        )?
        .with_write_delay(Duration::from_millis(self.write_delay_ms)))
    }
}

/// A command ready to send. Lives for one exchange.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Bytes to write
    pub bytes: Bytes,
    /// Expected response pattern
    pub expected: Regex,
    /// How long to wait for the response
    pub timeout: Duration,
    /// Pause after each written byte
    pub write_delay: Duration,
}

impl PendingCommand {
    /// Create a command, compiling the expected pattern
    pub fn new(
        bytes: impl Into<Bytes>,
        name: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let expected = Regex::new(expected).map_err(|source| ConfigError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        Ok(Self { bytes: bytes.into(), expected, timeout, write_delay: Duration::ZERO })
    }

    /// Pace the write byte by byte
    #[must_use]
    pub fn with_write_delay(mut self, write_delay: Duration) -> Self {
        self.write_delay = write_delay;
        self
    }

    /// Command as printable text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim_end().to_string()
    }
}

/// Bytes routed to the response consumer, shared between the inbound I/O
/// callback and whoever waits for a reply
#[derive(Debug)]
pub struct ResponseBuffer {
    inner: Mutex<BytesMut>,
    max_len: usize,
}

impl ResponseBuffer {
    /// Create with a size ceiling; older bytes are dropped past it
    pub fn new(max_len: usize) -> Self {
        Self { inner: Mutex::new(BytesMut::new()), max_len: max_len.max(1) }
    }

    /// Append response bytes
    pub fn push(&self, data: &[u8]) {
        let mut buf = self.inner.lock();
        buf.extend_from_slice(data);
        if buf.len() > self.max_len {
            let excess = buf.len() - self.max_len;
            let _ = buf.split_to(excess);
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Bytes held
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// If `pattern` matches, consume the buffer through the end of the match
    /// and return the consumed text
    pub fn take_match(&self, pattern: &Regex) -> Option<String> {
        let mut buf = self.inner.lock();
        let end = pattern.find(&buf)?.end();
        let taken = buf.split_to(end);
        Some(String::from_utf8_lossy(&taken).into_owned())
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESPONSE_LEN)
    }
}

/// Sends commands and waits for their responses
pub struct CommandResponseMatcher {
    connection: Arc<dyn Connection>,
    responses: Arc<ResponseBuffer>,
    poll_interval: Duration,
    /// One exchange at a time so replies are not stolen
    exchange: tokio::sync::Mutex<()>,
}

impl CommandResponseMatcher {
    /// Create a matcher over a connection and the shared response buffer
    pub fn new(
        connection: Arc<dyn Connection>,
        responses: Arc<ResponseBuffer>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connection,
            responses,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            exchange: tokio::sync::Mutex::new(()),
        }
    }

    /// The response buffer this matcher reads
    pub fn responses(&self) -> &Arc<ResponseBuffer> {
        &self.responses
    }

    /// Send a command and wait for its response.
    ///
    /// Stale response bytes are discarded before writing. On timeout the
    /// error is returned to this caller only; nothing else changes.
    pub async fn send_command(&self, cmd: &PendingCommand) -> Result<String, ProtocolError> {
        let _exchange = self.exchange.lock().await;

        self.responses.clear();
        self.write(cmd).await?;
        debug!(command = %cmd.text(), "command sent");

        let deadline = Instant::now() + cmd.timeout;
        loop {
            if let Some(response) = self.responses.take_match(&cmd.expected) {
                debug!(command = %cmd.text(), response = %response.trim_end(), "response matched");
                return Ok(response);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(command = %cmd.text(), "command timed out");
                return Err(ProtocolError::CommandTimeout {
                    command: cmd.text(),
                    expected: cmd.expected.as_str().to_string(),
                    timeout: cmd.timeout,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn write(&self, cmd: &PendingCommand) -> Result<(), ProtocolError> {
        if cmd.write_delay.is_zero() {
            self.connection.send(&cmd.bytes).await?;
            return Ok(());
        }
        for byte in cmd.bytes.iter() {
            self.connection.send(std::slice::from_ref(byte)).await?;
            sleep(cmd.write_delay).await;
        }
        Ok(())
    }
}
