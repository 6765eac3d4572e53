//! ROM bootloader protocol engine.
//!
//! [`Bootloader`] owns the serial byte channel for one session and drives
//! the request/response exchange with the ROM serial bootloader. Every
//! operation is synchronous: it transmits one command frame, consumes the
//! two-byte acknowledgement, and, for flash-mutating commands, polls
//! GET_STATUS before returning. No other traffic may interleave.
//!
//! The session walks an explicit state machine:
//!
//! ```text
//! Disconnected --connect--> Connected --start_download--> Downloading
//!                               ^                              |
//!                               +------- window drained -------+
//! ```
//!
//! A failure outside [`Bootloader::send_data`] moves the session to a
//! terminal errored state in which only dropping the engine (closing the
//! port) is sensible. The engine never retries anything; retransmission
//! policy belongs to the driver layer above it.

use crate::error::{Error, Result};
use crate::protocol::frame::{self, Ack, Command, CommandStatus, MAX_DATA_PER_TRANSFER};
use crate::target::family::DeviceFamily;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use std::io::{Read, Write};

/// Session state, advanced by each completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// The autobaud handshake has not happened yet.
    Disconnected,
    /// Handshake done; command frames are accepted.
    Connected,
    /// A download window is open; the target expects `remaining` more bytes
    /// to land at `offset`.
    Downloading { offset: u32, remaining: u32 },
    /// A protocol failure occurred; only closing the port is valid.
    Errored,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Downloading { .. } => "downloading",
            Self::Errored => "errored",
        }
    }
}

/// Protocol engine for one bootloader session.
///
/// Generic over the byte channel so tests can script the target's side of
/// the conversation.
pub struct Bootloader<P> {
    port: P,
    family: DeviceFamily,
    state: SessionState,
}

impl<P> Bootloader<P>
where
    P: Read + Write,
{
    /// Create an engine over an already opened and configured channel.
    ///
    /// The channel must block on reads with a timeout suited to the slowest
    /// expected operation; sector erases take tens of milliseconds.
    pub fn new(port: P, family: DeviceFamily) -> Self {
        Self {
            port,
            family,
            state: SessionState::Disconnected,
        }
    }

    /// The family this session was created for.
    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Give the channel back, consuming the engine.
    pub fn into_port(self) -> P {
        self.port
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Perform the autobaud handshake.
    ///
    /// The two `0x55` bytes let the ROM measure the host's bit timing; once
    /// locked it answers with an ACK. Valid exactly once per session.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(self.state_violation("connect"));
        }

        debug!("sending autobaud preamble");
        match self.do_connect() {
            Ok(()) => {
                debug!("autobaud handshake complete");
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Errored;
                Err(e)
            }
        }
    }

    fn do_connect(&mut self) -> Result<()> {
        self.port.write_all(&frame::AUTOBAUD_PREAMBLE)?;
        self.port.flush()?;
        self.expect_ack()
    }

    /// Probe the bootloader without touching flash.
    pub fn ping(&mut self) -> Result<()> {
        self.connected_op("ping", |bl| {
            bl.send_cmd(Command::Ping, &[])?;
            bl.expect_ack()
        })
    }

    /// Read the 32-bit chip identifier.
    pub fn get_chip_id(&mut self) -> Result<u32> {
        self.connected_op("get_chip_id", |bl| {
            bl.send_cmd(Command::GetChipId, &[])?;
            bl.expect_ack()?;
            let payload = bl.read_response(4)?;
            if payload.len() != 4 {
                return Err(Error::BadResponse(format!(
                    "chip id response of {} bytes, expected 4",
                    payload.len()
                )));
            }
            Ok(BigEndian::read_u32(&payload))
        })
    }

    /// Erase the flash sector starting at `address`.
    ///
    /// The address must be page-aligned for the session's family.
    pub fn sector_erase(&mut self, address: u32) -> Result<()> {
        let page_size = self.family.page_size();
        if address % page_size != 0 || !self.family.address_in_flash(address, page_size) {
            return Err(Error::OutOfRange {
                start: address,
                count: page_size,
            });
        }

        self.connected_op("sector_erase", |bl| {
            trace!("erasing sector at {address:#010X}");
            let mut payload = [0u8; 4];
            BigEndian::write_u32(&mut payload, address);
            bl.send_cmd(Command::SectorErase, &payload)?;
            bl.expect_ack()?;
            bl.poll_status()
        })
    }

    /// Declare a flash program window of `size` bytes at `base`.
    ///
    /// `base` must be page-aligned and the window must fit in flash. After
    /// this succeeds the session accepts [`Bootloader::send_data`] until the
    /// window is full.
    pub fn start_download(&mut self, base: u32, size: u32) -> Result<()> {
        if base % self.family.page_size() != 0 || !self.family.address_in_flash(base, size) {
            return Err(Error::OutOfRange {
                start: base,
                count: size,
            });
        }

        self.connected_op("start_download", |bl| {
            debug!("opening download window: {size} bytes at {base:#010X}");
            let mut payload = [0u8; 8];
            BigEndian::write_u32(&mut payload[..4], base);
            BigEndian::write_u32(&mut payload[4..], size);
            bl.send_cmd(Command::Download, &payload)?;
            bl.expect_ack()?;
            bl.poll_status()
        })?;

        self.state = if size == 0 {
            SessionState::Connected
        } else {
            SessionState::Downloading {
                offset: base,
                remaining: size,
            }
        };
        Ok(())
    }

    /// Stream one chunk into the open download window.
    ///
    /// A NAK or a failed status poll leaves the window open with the
    /// target's write pointer unmoved, so the caller may retransmit the same
    /// chunk. Channel failures are terminal. When the window drains the
    /// session returns to the connected state.
    #[allow(clippy::cast_possible_truncation)] // chunk length bounded by 252
    pub fn send_data(&mut self, chunk: &[u8]) -> Result<()> {
        let SessionState::Downloading { offset, remaining } = self.state else {
            return Err(self.state_violation("send_data"));
        };

        if chunk.len() > MAX_DATA_PER_TRANSFER {
            return Err(Error::ChunkTooLarge(chunk.len()));
        }
        if chunk.is_empty() || chunk.len() as u32 > remaining {
            return Err(Error::OutOfRange {
                start: offset,
                count: chunk.len() as u32,
            });
        }

        trace!("sending {} bytes for {offset:#010X}", chunk.len());
        match self.transfer_chunk(chunk) {
            Ok(()) => {
                let remaining = remaining - chunk.len() as u32;
                self.state = if remaining == 0 {
                    debug!("download window drained");
                    SessionState::Connected
                } else {
                    SessionState::Downloading {
                        offset: offset + chunk.len() as u32,
                        remaining,
                    }
                };
                Ok(())
            }
            Err(e) if e.is_channel_error() => {
                self.state = SessionState::Errored;
                Err(e)
            }
            // The window stays open; the target has not advanced.
            Err(e) => Err(e),
        }
    }

    fn transfer_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.send_cmd(Command::SendData, chunk)?;
        self.expect_ack()?;
        self.poll_status()
    }

    /// Ask the target for the CRC-32 of `count` bytes of flash at `address`.
    pub fn crc32(&mut self, address: u32, count: u32) -> Result<u32> {
        if !self.family.address_in_flash(address, count) {
            return Err(Error::OutOfRange {
                start: address,
                count,
            });
        }

        self.connected_op("crc32", |bl| {
            debug!("requesting CRC of {count} bytes at {address:#010X}");
            // Address, size, and the repeat count; the ROM reads the region
            // repeat+1 times, so the host always passes zero.
            let mut payload = [0u8; 12];
            BigEndian::write_u32(&mut payload[..4], address);
            BigEndian::write_u32(&mut payload[4..8], count);
            bl.send_cmd(Command::Crc32, &payload)?;
            bl.expect_ack()?;
            let response = bl.read_response(4)?;
            if response.len() != 4 {
                return Err(Error::BadResponse(format!(
                    "CRC response of {} bytes, expected 4",
                    response.len()
                )));
            }
            Ok(BigEndian::read_u32(&response))
        })
    }

    /// Run `f` from the connected state, falling to the errored state if it
    /// fails.
    fn connected_op<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.state != SessionState::Connected {
            return Err(self.state_violation(op));
        }
        let result = f(&mut *self);
        if result.is_err() {
            self.state = SessionState::Errored;
        }
        result
    }

    fn state_violation(&self, op: &'static str) -> Error {
        Error::StateViolation {
            op,
            state: self.state.name(),
        }
    }

    fn send_cmd(&mut self, cmd: Command, payload: &[u8]) -> Result<()> {
        let pkt = frame::encode(cmd, payload)?;
        trace!("sending {cmd:?}, {} byte frame", pkt.len());
        self.port.write_all(&pkt)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read the two acknowledgement bytes and require an ACK.
    fn expect_ack(&mut self) -> Result<()> {
        let mut bytes = [0u8; 2];
        self.port.read_exact(&mut bytes)?;
        trace!("ack bytes {:02X} {:02X}", bytes[0], bytes[1]);
        match frame::decode_ack(bytes)? {
            Ack::Ack => Ok(()),
            Ack::Nak => Err(Error::BadAck {
                first: bytes[0],
                second: bytes[1],
            }),
        }
    }

    /// Read a data response and acknowledge it.
    ///
    /// A malformed response is answered with a NAK before the error is
    /// surfaced, so the target is not left waiting on the handshake.
    fn read_response(&mut self, max_len: usize) -> Result<Vec<u8>> {
        match frame::read_response(&mut self.port, max_len) {
            Ok(payload) => {
                self.port.write_all(&frame::encode_ack(Ack::Ack))?;
                self.port.flush()?;
                Ok(payload)
            }
            Err(e) => {
                let _ = self.port.write_all(&frame::encode_ack(Ack::Nak));
                let _ = self.port.flush();
                Err(e)
            }
        }
    }

    /// Poll GET_STATUS and require SUCCESS.
    ///
    /// Must immediately follow the acked command it qualifies.
    fn poll_status(&mut self) -> Result<()> {
        self.send_cmd(Command::GetStatus, &[])?;
        self.expect_ack()?;
        let payload = self.read_response(1)?;
        if payload.len() != 1 {
            return Err(Error::BadResponse(format!(
                "status response of {} bytes, expected 1",
                payload.len()
            )));
        }

        let status = CommandStatus::from_byte(payload[0]).ok_or_else(|| {
            Error::BadResponse(format!("unknown status code {:#04X}", payload[0]))
        })?;
        trace!("target status {status}");
        match status {
            CommandStatus::Success => Ok(()),
            status => Err(Error::TargetStatus(status)),
        }
    }
}
