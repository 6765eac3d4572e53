//! Image sources.
//!
//! Firmware arrives either as a raw binary or as Intel HEX. Both are
//! reduced to the same shape before touching the wire: a list of [`Run`]s,
//! each a contiguous span of bytes anchored at a flash address. The driver
//! opens one download window per run.

pub mod hex;

use crate::error::{Error, Result};
use log::debug;
use std::fs;
use std::io;
use std::path::Path;

/// Upper bound on the bytes a single reassembled HEX run may carry.
///
/// Reassembly flushes a run before it would grow past this window, so a run
/// never outgrows the staging buffer the tool has always used.
pub const RUN_WINDOW: usize = 32 * 1024;

/// A contiguous span of image bytes anchored at a flash address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Flash address of the first byte.
    pub address: u32,
    /// The bytes to place there.
    pub data: Vec<u8>,
}

/// Image container formats accepted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Raw binary, loaded verbatim at the caller's base address.
    Binary,
    /// Intel HEX records carrying their own addresses.
    IntelHex,
}

impl ImageFormat {
    /// Pick a format from the file extension. `.hex` (any case) selects
    /// Intel HEX; everything else is treated as raw binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("hex") => Self::IntelHex,
            _ => Self::Binary,
        }
    }
}

/// Load an image file into runs.
///
/// A raw binary becomes a single run at `base_addr`; a HEX file carries its
/// own addresses and may produce several runs. An empty file is rejected.
pub fn load_runs(path: &Path, base_addr: u32) -> Result<Vec<Run>> {
    let data = fs::read(path)?;
    if data.is_empty() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "image file is empty",
        )));
    }

    match ImageFormat::from_path(path) {
        ImageFormat::Binary => {
            debug!(
                "raw binary image: {} bytes at {base_addr:#010X}",
                data.len()
            );
            Ok(vec![Run {
                address: base_addr,
                data,
            }])
        }
        ImageFormat::IntelHex => {
            let runs = hex::parse_hex(&data)?;
            debug!("Intel HEX image: {} run(s)", runs.len());
            Ok(runs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ImageFormat::from_path(Path::new("firmware.hex")),
            ImageFormat::IntelHex
        );
        assert_eq!(
            ImageFormat::from_path(Path::new("FIRMWARE.HEX")),
            ImageFormat::IntelHex
        );
        assert_eq!(
            ImageFormat::from_path(Path::new("firmware.bin")),
            ImageFormat::Binary
        );
        assert_eq!(
            ImageFormat::from_path(Path::new("firmware")),
            ImageFormat::Binary
        );
    }
}
