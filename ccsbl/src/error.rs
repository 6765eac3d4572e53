//! Error types for ccsbl.

use crate::protocol::frame::CommandStatus;
use std::io;
use thiserror::Error;

/// Result type for ccsbl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ccsbl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Acknowledgement was malformed, or was a NAK where an ACK was required.
    #[error("bad acknowledgement from target: {first:#04X} {second:#04X}")]
    BadAck {
        /// First byte of the acknowledgement pair.
        first: u8,
        /// Second byte of the acknowledgement pair.
        second: u8,
    },

    /// Data response was truncated, oversized, or failed its checksum.
    #[error("bad response from target: {0}")]
    BadResponse(String),

    /// GET_STATUS returned a code other than SUCCESS.
    #[error("target reported {0}")]
    TargetStatus(CommandStatus),

    /// Host-computed CRC differed from the target-reported CRC.
    #[error("CRC mismatch: expected {expected:#010X}, got {actual:#010X}")]
    CrcMismatch {
        /// CRC-32 the host computed over the image bytes.
        expected: u32,
        /// CRC-32 the target computed over flash.
        actual: u32,
    },

    /// Address range is not page-aligned or falls outside device flash.
    #[error("address range out of bounds: {count} bytes at {start:#010X}")]
    OutOfRange {
        /// First address of the offending range.
        start: u32,
        /// Length of the offending range in bytes.
        count: u32,
    },

    /// Unknown device family tag.
    #[error("unknown device family: {0}")]
    BadFamily(String),

    /// Malformed Intel HEX input.
    #[error("Intel HEX error at record {line}: {reason}")]
    HexParse {
        /// 1-based record number within the file.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// A data chunk exceeded the per-transfer limit.
    #[error("data chunk of {0} bytes exceeds the 252-byte transfer limit")]
    ChunkTooLarge(usize),

    /// Engine operation invoked in the wrong session state.
    #[error("{op} is not valid in the {state} state")]
    StateViolation {
        /// The operation that was attempted.
        op: &'static str,
        /// The session state it was attempted in.
        state: &'static str,
    },
}

impl Error {
    /// Whether this error came from the byte channel itself rather than the
    /// protocol running over it. Channel errors are never worth retrying.
    pub fn is_channel_error(&self) -> bool {
        match self {
            Self::Io(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
