//! # ccsbl
//!
//! Host-side library for programming, erasing, and verifying the on-chip
//! flash of CC13xx/CC26xx wireless MCUs through their ROM serial
//! bootloader.
//!
//! The crate provides:
//!
//! - The bootloader frame codec and command set
//! - A synchronous protocol engine with an explicit session state machine
//! - Per-family flash geometry policy
//! - Intel HEX and raw-binary image sources reduced to contiguous runs
//! - The erase / program / verify operation driver
//!
//! ## Cancellation Model
//!
//! Long-running operations (erasing, programming, verifying) can be
//! cancelled via the [`CancelContext`] mechanism. The embedding application
//! signals interruption (e.g. Ctrl-C) and the driver stops at the next safe
//! boundary: between sector erases or between data chunks, never mid-frame.
//!
//! ```ignore
//! use ccsbl::{CancelContext, cancel_context_from_global};
//!
//! // Option 1: bridge to the global interrupt flag (set on Ctrl-C)
//! let cancel = cancel_context_from_global();
//!
//! // Option 2: a custom checker
//! use std::sync::atomic::{AtomicBool, Ordering};
//! let flag = AtomicBool::new(false);
//! let cancel = CancelContext::new(move || flag.load(Ordering::SeqCst));
//!
//! // Option 3: no cancellation
//! let cancel = CancelContext::none();
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ccsbl::{Bootloader, DeviceFamily, Flasher, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reduce the image to address-tagged runs
//!     let runs = image::load_runs("firmware.bin".as_ref(), 0)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = ccsbl::NativePort::open("/dev/ttyUSB0", 115_200)?;
//!         let engine = Bootloader::new(port, DeviceFamily::Cc13x2);
//!         let mut flasher = Flasher::new(engine);
//!
//!         flasher.connect()?;
//!         flasher.program(&runs, |done, total| {
//!             println!("programming {done}/{total}");
//!         })?;
//!         flasher.verify(&runs, |_, _| {})?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

/// Global interrupt flag for CLI-to-library communication.
///
/// Set by the CLI when Ctrl-C is received, checked by
/// `cancel_context_from_global()` during long-running operations.
static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(false);

/// Explicit cancellation context for long-running library operations.
///
/// Unlike the global interrupt flag, this is passed through the call chain,
/// which keeps it testable and composable.
#[derive(Clone, Default)]
pub struct CancelContext {
    checker: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl CancelContext {
    /// Create a cancel context with the given checker function.
    #[must_use]
    pub fn new<F>(checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            checker: Some(Arc::new(checker)),
        }
    }

    /// Create a no-op cancel context (never cancelled).
    #[must_use]
    pub fn none() -> Self {
        Self { checker: None }
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.checker.as_ref().is_some_and(|c| c())
    }

    /// Check and return an Interrupted error if cancelled.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            return Err(crate::error::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "operation cancelled",
            )));
        }
        Ok(())
    }
}

/// Create a [`CancelContext`] that bridges to the global interrupt flag.
#[must_use]
pub fn cancel_context_from_global() -> CancelContext {
    CancelContext::new(|| INTERRUPT_FLAG.load(Ordering::SeqCst))
}

/// Set the global interrupt flag (for the CLI to call on Ctrl-C).
pub fn set_interrupt_flag() {
    INTERRUPT_FLAG.store(true, Ordering::SeqCst);
}

/// Clear the global interrupt flag.
pub fn clear_interrupt_flag() {
    INTERRUPT_FLAG.store(false, Ordering::SeqCst);
}

/// Returns whether interruption was requested.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_FLAG.load(Ordering::SeqCst)
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    image::{ImageFormat, Run},
    port::Port,
    protocol::crc::crc32,
    protocol::frame::{Ack, Command, CommandStatus, MAX_DATA_PER_TRANSFER},
    target::{Bootloader, DeviceFamily, Flasher, invoke_bootloader},
};
