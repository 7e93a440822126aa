//! Transport traits for NCI communication with a controller
//!
//! This module provides the abstraction over the physical link (UART, SPI,
//! I2C) between the device host and the NFC controller. The transport moves
//! whole packets; it knows nothing about headers, fragmentation or
//! correlation. Incoming packets are handed to the engine by whoever owns the
//! link, so the trait only covers the outbound direction and the link
//! lifecycle.

pub mod error;

use std::fmt;

pub use error::TransportError;
use tracing::{debug, trace};

/// Trait for packet transports to an NFC controller
pub trait NciTransport: fmt::Debug {
    /// Error type returned by the transport
    type Error: Into<TransportError> + fmt::Debug;

    /// Write one complete packet (header included) to the controller
    fn write(&mut self, packet: &[u8]) -> Result<(), Self::Error> {
        trace!(packet = %hex::encode(packet), "Writing packet");
        let result = self.do_write(packet);
        if let Err(e) = &result {
            debug!(error = ?e, "Transport error during write");
        }
        result
    }

    /// Internal implementation of write
    /// This is the method that concrete implementations should override
    fn do_write(&mut self, packet: &[u8]) -> Result<(), Self::Error>;

    /// Open the link to the given controller device
    fn open(&mut self, device_id: u32) -> Result<(), Self::Error>;

    /// Close the link to the given controller device
    fn close(&mut self, device_id: u32) -> Result<(), Self::Error>;

    /// Check if the link is open
    fn is_open(&self) -> bool;
}

#[cfg(test)]
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct MockTransport {
    /// Packets that were written
    pub written: Vec<bytes::Bytes>,
    /// Whether the link is open
    pub open: bool,
    /// Fail the next write
    pub fail_next: bool,
}

#[cfg(test)]
impl NciTransport for MockTransport {
    type Error = TransportError;

    fn do_write(&mut self, packet: &[u8]) -> Result<(), Self::Error> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if std::mem::take(&mut self.fail_next) {
            return Err(TransportError::Transmission);
        }
        self.written.push(bytes::Bytes::copy_from_slice(packet));
        Ok(())
    }

    fn open(&mut self, _device_id: u32) -> Result<(), Self::Error> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self, _device_id: u32) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
