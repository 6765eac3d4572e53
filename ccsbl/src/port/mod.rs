//! Port abstraction for the serial byte channel.
//!
//! The protocol layer is I/O-agnostic: it only needs blocking reads and
//! writes, so it talks to anything implementing [`Port`] (or, for the
//! engine itself, plain `Read + Write`). The native implementation wraps
//! the `serialport` crate.
//!
//! Reads block until data arrives or the port's configured timeout elapses;
//! the timeout set when opening the port therefore bounds every protocol
//! wait. The ROM bootloader expects 8N1 with no flow control.

#[cfg(feature = "native")]
pub mod native;

use crate::error::Result;
use std::io::{Read, Write};
use std::time::Duration;

/// Unified byte-channel trait consumed above the protocol engine.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release it.
    ///
    /// After closing, reads and writes fail with `NotConnected`.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;
