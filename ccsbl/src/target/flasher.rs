//! Flash operation driver.
//!
//! [`Flasher`] composes the protocol engine with image runs to perform the
//! top-level erase, program, and verify flows: chunking to the wire limit,
//! retrying refused chunks, CRC comparison, and cancellation checks between
//! wire operations. The engine itself never retries; this is the only layer
//! that does, and only for SEND_DATA.

use crate::CancelContext;
use crate::error::{Error, Result};
use crate::image::Run;
use crate::protocol::crc::crc32;
use crate::protocol::frame::MAX_DATA_PER_TRANSFER;
use crate::target::bootloader::Bootloader;
use log::{debug, info, warn};
use std::io::{Read, Write};

/// Additional attempts allowed for a refused SEND_DATA chunk.
const SEND_DATA_RETRIES: usize = 3;

/// Whether a failed chunk is worth retransmitting.
///
/// A refusal on the wire can be transient; validation errors and channel
/// failures cannot.
fn is_retryable(error: &Error) -> bool {
    matches!(
        error,
        Error::BadAck { .. } | Error::BadResponse(_) | Error::TargetStatus(_)
    )
}

/// Driver for the top-level flash operations.
///
/// Progress callbacks receive `(done, total)` in the unit of the operation:
/// pages for erase, bytes for program, runs for verify.
pub struct Flasher<P> {
    engine: Bootloader<P>,
    start_addr: u32,
    cancel: CancelContext,
}

impl<P> Flasher<P>
where
    P: Read + Write,
{
    /// Create a driver over a (possibly not yet connected) engine.
    pub fn new(engine: Bootloader<P>) -> Self {
        Self {
            engine,
            start_addr: 0,
            cancel: CancelContext::none(),
        }
    }

    /// Attach a cancellation context, checked between sector erases and
    /// between data chunks.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelContext) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the base address used by erase and raw-binary operations.
    ///
    /// A value that is not on a page boundary is ignored with a warning and
    /// the base address stays 0, preserving the historical tool behaviour.
    pub fn set_start_addr(&mut self, addr: u32) {
        let page_size = self.engine.family().page_size();
        if addr % page_size != 0 {
            warn!("start address {addr:#X} is not on a page boundary, ignoring it");
            self.start_addr = 0;
        } else {
            self.start_addr = addr;
        }
    }

    /// The effective base address.
    pub fn start_addr(&self) -> u32 {
        self.start_addr
    }

    /// Access the underlying engine.
    pub fn engine_mut(&mut self) -> &mut Bootloader<P> {
        &mut self.engine
    }

    /// Consume the driver and give the engine back.
    pub fn into_engine(self) -> Bootloader<P> {
        self.engine
    }

    /// Perform the autobaud handshake and read the chip id.
    ///
    /// The id is returned so the operator can cross-check the declared
    /// family against the part actually on the wire.
    pub fn connect(&mut self) -> Result<u32> {
        self.engine.connect()?;
        let chip_id = self.engine.get_chip_id()?;
        info!("connected, chip id {chip_id:#010X}");
        Ok(chip_id)
    }

    /// Erase every page from the base address to the end of flash.
    pub fn erase<F>(&mut self, mut progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        let family = self.engine.family();
        let page_size = family.page_size();
        let first_page = family.address_to_page(self.start_addr);
        let page_count = family.page_count();
        let total = u64::from(page_count - first_page);

        debug!("erasing pages {first_page}..{page_count}");
        for page in first_page..page_count {
            self.cancel.check()?;
            self.engine.sector_erase(page * page_size)?;
            progress(u64::from(page - first_page + 1), total);
        }

        Ok(())
    }

    /// Program every image run, each through its own download window.
    #[allow(clippy::cast_possible_truncation)] // runs are bounded by flash size
    pub fn program<F>(&mut self, runs: &[Run], mut progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        let total: u64 = runs.iter().map(|r| r.data.len() as u64).sum();
        let mut written: u64 = 0;

        for run in runs {
            info!(
                "downloading {} bytes to {:#010X}",
                run.data.len(),
                run.address
            );
            self.engine
                .start_download(run.address, run.data.len() as u32)?;

            for chunk in run.data.chunks(MAX_DATA_PER_TRANSFER) {
                self.cancel.check()?;
                self.send_chunk(chunk)?;
                written += chunk.len() as u64;
                progress(written, total);
            }
        }

        Ok(())
    }

    /// Verify every run against the target's flash CRC.
    #[allow(clippy::cast_possible_truncation)]
    pub fn verify<F>(&mut self, runs: &[Run], mut progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        let total = runs.len() as u64;

        for (idx, run) in runs.iter().enumerate() {
            self.cancel.check()?;

            let expected = crc32(&run.data);
            let actual = self.engine.crc32(run.address, run.data.len() as u32)?;
            debug!(
                "run at {:#010X}: host CRC {expected:#010X}, target CRC {actual:#010X}",
                run.address
            );
            if expected != actual {
                return Err(Error::CrcMismatch { expected, actual });
            }

            progress(idx as u64 + 1, total);
        }

        Ok(())
    }

    /// Send one chunk, retransmitting a refused transfer before giving up.
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.engine.send_data(chunk) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SEND_DATA_RETRIES && is_retryable(&e) => {
                    attempt += 1;
                    warn!("chunk refused ({e}), retry {attempt}/{SEND_DATA_RETRIES}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
