//! Serial bootloader frame codec.
//!
//! Every host command travels in the same frame:
//!
//! ```text
//! +--------+----------+------+-----------------+---------+
//! | Length | Checksum | Cmd  |     Payload     | Trailer |
//! +--------+----------+------+-----------------+---------+
//! | 1 byte | 1 byte   | 1    |   0..=252 bytes | 1 byte  |
//! +--------+----------+------+-----------------+---------+
//! |  3+N   | additive | code |   big-endian    |  0x00   |
//! +--------+----------+------+-----------------+---------+
//! ```
//!
//! The length byte counts the three header bytes plus the payload but not
//! the trailer. The checksum is the 8-bit sum of the command byte and every
//! payload byte. There is no framing escape; the length byte alone delimits
//! a frame.
//!
//! The target answers each frame with a two-byte acknowledgement, `00 CC`
//! (ACK) or `00 33` (NAK), and returns response data as
//! `[len, checksum, payload..]` where `len` is the payload length plus two
//! and the checksum covers the payload only.

use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;

/// Autobaud calibration preamble; the alternating bit pattern lets the ROM
/// lock onto the host's bit rate.
pub const AUTOBAUD_PREAMBLE: [u8; 2] = [0x55, 0x55];

/// Acknowledgement marker byte.
pub const ACK_BYTE: u8 = 0xCC;

/// Negative acknowledgement marker byte.
pub const NAK_BYTE: u8 = 0x33;

/// Maximum payload bytes in a single frame.
///
/// The length byte must also cover the three header bytes, so the payload
/// tops out three short of `u8::MAX`.
pub const MAX_DATA_PER_TRANSFER: usize = 252;

/// ROM bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Liveness probe (0x20).
    Ping = 0x20,
    /// Declare a flash program window (0x21).
    Download = 0x21,
    /// Read the status of the last command (0x23).
    GetStatus = 0x23,
    /// Stream data into the declared window (0x24).
    SendData = 0x24,
    /// Erase one flash sector (0x26).
    SectorErase = 0x26,
    /// Have the target compute CRC-32 over a flash region (0x27).
    Crc32 = 0x27,
    /// Read the 32-bit chip identifier (0x28).
    GetChipId = 0x28,
}

/// Status codes surfaced by GET_STATUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    /// The previous command completed (0x40).
    Success = 0x40,
    /// The opcode was not recognised (0x41).
    UnknownCmd = 0x41,
    /// The command was malformed (0x42).
    InvalidCmd = 0x42,
    /// The address was rejected (0x43).
    InvalidAddr = 0x43,
    /// The flash operation itself failed (0x44).
    FlashFail = 0x44,
}

impl CommandStatus {
    /// Map a wire byte onto a status code.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x40 => Some(Self::Success),
            0x41 => Some(Self::UnknownCmd),
            0x42 => Some(Self::InvalidCmd),
            0x43 => Some(Self::InvalidAddr),
            0x44 => Some(Self::FlashFail),
            _ => None,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::UnknownCmd => "UNKNOWN_CMD",
            Self::InvalidCmd => "INVALID_CMD",
            Self::InvalidAddr => "INVALID_ADDR",
            Self::FlashFail => "FLASH_FAIL",
        };
        write!(f, "{name} ({:#04X})", *self as u8)
    }
}

/// Target acknowledgement of a host frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// `00 CC` - the frame was accepted.
    Ack,
    /// `00 33` - the frame was rejected.
    Nak,
}

/// 8-bit additive checksum over the command byte and payload.
pub fn checksum(cmd: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(cmd, |acc, b| acc.wrapping_add(*b))
}

/// Encode a command frame.
///
/// A payload longer than [`MAX_DATA_PER_TRANSFER`] is rejected before any
/// bytes are produced.
#[allow(clippy::cast_possible_truncation)] // length checked against 252 above
pub fn encode(cmd: Command, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_DATA_PER_TRANSFER {
        return Err(Error::ChunkTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push((payload.len() + 3) as u8);
    frame.push(checksum(cmd as u8, payload));
    frame.push(cmd as u8);
    frame.extend_from_slice(payload);
    frame.push(0x00);

    Ok(frame)
}

/// Decode a two-byte acknowledgement.
///
/// Anything other than `00 CC` or `00 33` is malformed; bytes arriving
/// before the `0x00` prefix are protocol noise and fail the exchange.
pub fn decode_ack(bytes: [u8; 2]) -> Result<Ack> {
    match bytes {
        [0x00, ACK_BYTE] => Ok(Ack::Ack),
        [0x00, NAK_BYTE] => Ok(Ack::Nak),
        [first, second] => Err(Error::BadAck { first, second }),
    }
}

/// Encode the host-side acknowledgement of a target data response.
pub fn encode_ack(ack: Ack) -> [u8; 2] {
    match ack {
        Ack::Ack => [0x00, ACK_BYTE],
        Ack::Nak => [0x00, NAK_BYTE],
    }
}

/// Read a `[len, checksum, payload..]` data response.
///
/// `max_len` bounds the payload the caller is prepared to accept; a longer
/// response fails without reading past its header. The payload checksum is
/// recomputed and verified.
pub fn read_response<R: Read>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let mut hdr = [0u8; 2];
    reader.read_exact(&mut hdr)?;

    let payload_len = usize::from(hdr[0]).checked_sub(2).ok_or_else(|| {
        Error::BadResponse(format!("length byte {:#04X} below the header size", hdr[0]))
    })?;
    if payload_len > max_len {
        return Err(Error::BadResponse(format!(
            "payload of {payload_len} bytes exceeds the expected {max_len}"
        )));
    }

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    let computed = checksum(0, &payload);
    if computed != hdr[1] {
        return Err(Error::BadResponse(format!(
            "checksum mismatch: computed {computed:#04X}, header said {:#04X}",
            hdr[1]
        )));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_sector_erase_page_zero() {
        let frame = encode(Command::SectorErase, &[0x00, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(frame, [0x07, 0x26, 0x26, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_download_four_bytes_at_zero() {
        let payload = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04];
        let frame = encode(Command::Download, &payload).unwrap();
        assert_eq!(
            frame,
            [0x0B, 0x25, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00]
        );
    }

    #[test]
    fn test_encode_send_data() {
        let frame = encode(Command::SendData, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        // checksum = (0x24 + 0xDE + 0xAD + 0xBE + 0xEF) mod 256
        assert_eq!(frame, [0x07, 0x5C, 0x24, 0xDE, 0xAD, 0xBE, 0xEF, 0x00]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_DATA_PER_TRANSFER + 1];
        assert!(matches!(
            encode(Command::SendData, &payload),
            Err(Error::ChunkTooLarge(253))
        ));
    }

    #[test]
    fn test_encode_accepts_max_payload() {
        let payload = vec![0xAA; MAX_DATA_PER_TRANSFER];
        let frame = encode(Command::SendData, &payload).unwrap();
        assert_eq!(frame[0], 0xFF);
        assert_eq!(frame.len(), MAX_DATA_PER_TRANSFER + 4);
        assert_eq!(*frame.last().unwrap(), 0x00);
    }

    #[test]
    fn test_frame_round_trip() {
        for len in [0usize, 1, 7, 252] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            let frame = encode(Command::Download, &payload).unwrap();

            // A conforming receiver recovers (cmd, payload) from the frame.
            assert_eq!(usize::from(frame[0]), 3 + payload.len());
            assert_eq!(frame[2], Command::Download as u8);
            let body = &frame[3..3 + payload.len()];
            assert_eq!(body, payload.as_slice());
            assert_eq!(frame[1], checksum(frame[2], body));
            assert_eq!(frame[3 + payload.len()], 0x00);
        }
    }

    #[test]
    fn test_checksum_detects_single_bit_flips() {
        let payload = [0x12, 0x34, 0x56, 0x78];
        let frame = encode(Command::SendData, &payload).unwrap();

        // Flip every bit of the command and payload bytes in turn; the
        // receiver's checksum recomputation must catch each one.
        for byte_idx in 2..frame.len() - 1 {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte_idx] ^= 1 << bit;
                let recomputed =
                    checksum(corrupted[2], &corrupted[3..corrupted.len() - 1]);
                assert_ne!(
                    recomputed, corrupted[1],
                    "flip of byte {byte_idx} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_decode_ack() {
        assert_eq!(decode_ack([0x00, 0xCC]).unwrap(), Ack::Ack);
        assert_eq!(decode_ack([0x00, 0x33]).unwrap(), Ack::Nak);
    }

    #[test]
    fn test_decode_ack_rejects_noise() {
        for bytes in [[0xFF, 0xCC], [0x00, 0x00], [0xCC, 0x00], [0x55, 0x33]] {
            assert!(matches!(decode_ack(bytes), Err(Error::BadAck { .. })));
        }
    }

    #[test]
    fn test_encode_ack() {
        assert_eq!(encode_ack(Ack::Ack), [0x00, 0xCC]);
        assert_eq!(encode_ack(Ack::Nak), [0x00, 0x33]);
    }

    #[test]
    fn test_read_response_status_byte() {
        let mut reader = Cursor::new(vec![0x03, 0x40, 0x40]);
        let payload = read_response(&mut reader, 1).unwrap();
        assert_eq!(payload, [0x40]);
    }

    #[test]
    fn test_read_response_chip_id() {
        let body = [0x20, 0x00, 0x38, 0x28];
        let sum = checksum(0, &body);
        let mut raw = vec![0x06, sum];
        raw.extend_from_slice(&body);

        let mut reader = Cursor::new(raw);
        assert_eq!(read_response(&mut reader, 4).unwrap(), body);
    }

    #[test]
    fn test_read_response_rejects_oversize() {
        let mut reader = Cursor::new(vec![0x06, 0x00, 1, 2, 3, 4]);
        assert!(matches!(
            read_response(&mut reader, 1),
            Err(Error::BadResponse(_))
        ));
    }

    #[test]
    fn test_read_response_rejects_bad_checksum() {
        let mut reader = Cursor::new(vec![0x03, 0x41, 0x40]);
        assert!(matches!(
            read_response(&mut reader, 1),
            Err(Error::BadResponse(_))
        ));
    }

    #[test]
    fn test_read_response_rejects_undersized_length_byte() {
        let mut reader = Cursor::new(vec![0x01, 0x00]);
        assert!(matches!(
            read_response(&mut reader, 4),
            Err(Error::BadResponse(_))
        ));
    }

    #[test]
    fn test_read_response_truncated_input() {
        let mut reader = Cursor::new(vec![0x06, 0x00, 0x01]);
        assert!(matches!(read_response(&mut reader, 4), Err(Error::Io(_))));
    }

    #[test]
    fn test_command_status_from_byte() {
        assert_eq!(CommandStatus::from_byte(0x40), Some(CommandStatus::Success));
        assert_eq!(
            CommandStatus::from_byte(0x44),
            Some(CommandStatus::FlashFail)
        );
        assert_eq!(CommandStatus::from_byte(0x45), None);
        assert_eq!(CommandStatus::from_byte(0x00), None);
    }
}
