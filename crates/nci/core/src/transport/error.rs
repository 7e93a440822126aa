//! Error types specific to the controller transport

use thiserror::Error;

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to controller")]
    Connection,

    /// The transport has not been opened
    #[error("Transport is not open")]
    NotOpen,

    /// Transmission error
    #[error("Failed to transmit packet")]
    Transmission,

    /// Device error
    #[error("Controller device error")]
    Device,

    /// Driver error (with code)
    #[error("Driver error code: {0}")]
    Driver(i32),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new driver error
    pub const fn driver(code: i32) -> Self {
        Self::Driver(code)
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Returns true if the link itself is gone rather than a single write failing
    pub const fn is_link_down(&self) -> bool {
        matches!(self, Self::Connection | Self::NotOpen | Self::Device)
    }
}
