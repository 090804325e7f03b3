//! Transport seam
//!
//! Serial and TCP I/O belong to the host framework. The driver only needs a
//! way to write bytes; inbound bytes arrive through
//! [`DriverHandle::got_data`](crate::core::driver::DriverHandle::got_data).

use async_trait::async_trait;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Outbound half of a device link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write bytes to the device
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;
}
