//! Intel HEX record parsing and run reassembly.
//!
//! Records look like `:LLAAAATTDD..DDCC` with no interior whitespace. Only
//! three record types occur in images for these parts:
//!
//! | Type | Meaning                  |
//! |------|--------------------------|
//! | `00` | data                     |
//! | `01` | end of file              |
//! | `04` | extended linear address  |
//!
//! Data records are merged into contiguous [`Run`]s. A record whose address
//! is not contiguous with the current run, or that would grow the run past
//! the 32 KiB window, is held in a one-record look-ahead buffer and opens
//! the next run; the input stream is never rewound. A type-04 record always
//! flushes the current run before updating the upper address word.

use crate::error::{Error, Result};
use crate::image::{RUN_WINDOW, Run};
use log::trace;

/// One decoded record.
#[derive(Debug)]
struct Record {
    /// 1-based position in the file, for error reporting.
    line: usize,
    /// 16-bit load offset from the record header.
    offset: u16,
    kind: RecordKind,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Data,
    EndOfFile,
    ExtendedLinearAddress,
}

/// Record scanner with a one-record look-ahead buffer.
struct RecordReader<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    lookahead: Option<Record>,
}

impl<'a> RecordReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            line: 0,
            lookahead: None,
        }
    }

    /// The next record, from the look-ahead buffer if one was held back.
    fn next_record(&mut self) -> Result<Option<Record>> {
        if let Some(record) = self.lookahead.take() {
            return Ok(Some(record));
        }
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        self.line += 1;
        self.parse_record().map(Some)
    }

    /// Hold a record back; the next call to [`Self::next_record`] returns it
    /// again.
    fn push_back(&mut self, record: Record) {
        debug_assert!(self.lookahead.is_none());
        self.lookahead = Some(record);
    }

    fn err(&self, reason: impl Into<String>) -> Error {
        Error::HexParse {
            line: self.line,
            reason: reason.into(),
        }
    }

    /// Consume two hex digits.
    fn take_byte(&mut self) -> Result<u8> {
        if self.pos + 2 > self.input.len() {
            return Err(self.err("truncated record"));
        }
        let hi = hex_digit(self.input[self.pos]);
        let lo = hex_digit(self.input[self.pos + 1]);
        match (hi, lo) {
            (Some(hi), Some(lo)) => {
                self.pos += 2;
                Ok(hi << 4 | lo)
            }
            _ => Err(self.err(format!(
                "invalid hex digits {:?}{:?}",
                self.input[self.pos] as char,
                self.input[self.pos + 1] as char
            ))),
        }
    }

    fn parse_record(&mut self) -> Result<Record> {
        if self.input[self.pos] != b':' {
            return Err(self.err(format!(
                "expected ':' to start a record, found {:?}",
                self.input[self.pos] as char
            )));
        }
        self.pos += 1;

        let len = self.take_byte()?;
        let addr_hi = self.take_byte()?;
        let addr_lo = self.take_byte()?;
        let kind_byte = self.take_byte()?;

        let mut data = Vec::with_capacity(usize::from(len));
        for _ in 0..len {
            data.push(self.take_byte()?);
        }
        let recorded = self.take_byte()?;

        // Two's-complement checksum: everything from the length byte through
        // the checksum itself sums to zero.
        let sum = data
            .iter()
            .fold(
                len.wrapping_add(addr_hi)
                    .wrapping_add(addr_lo)
                    .wrapping_add(kind_byte),
                |acc, b| acc.wrapping_add(*b),
            );
        if sum.wrapping_add(recorded) != 0 {
            return Err(self.err(format!(
                "checksum mismatch: expected {:#04X}, found {recorded:#04X}",
                sum.wrapping_neg()
            )));
        }

        let kind = match kind_byte {
            0x00 => RecordKind::Data,
            0x01 => RecordKind::EndOfFile,
            0x04 => RecordKind::ExtendedLinearAddress,
            other => return Err(self.err(format!("unsupported record type {other:#04X}"))),
        };

        self.consume_eol()?;

        Ok(Record {
            line: self.line,
            offset: u16::from(addr_hi) << 8 | u16::from(addr_lo),
            kind,
            data,
        })
    }

    /// Accept `\r\n`, bare `\r`, or bare `\n` after a record. A bare `\r` is
    /// recognised by peeking one byte and leaving it in place when it is not
    /// `\n`. Missing terminators at end of input are fine.
    fn consume_eol(&mut self) -> Result<()> {
        match self.input.get(self.pos) {
            None => Ok(()),
            Some(b'\n') => {
                self.pos += 1;
                Ok(())
            }
            Some(b'\r') => {
                self.pos += 1;
                if self.input.get(self.pos) == Some(&b'\n') {
                    self.pos += 1;
                }
                Ok(())
            }
            Some(&other) => Err(self.err(format!("bad end-of-line byte {other:#04X}"))),
        }
    }
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Parse an Intel HEX image into contiguous runs.
#[allow(clippy::cast_possible_truncation)] // run length capped by the window
pub fn parse_hex(input: &[u8]) -> Result<Vec<Run>> {
    let mut reader = RecordReader::new(input);
    let mut runs: Vec<Run> = Vec::new();
    let mut current: Option<Run> = None;
    let mut ela: u16 = 0;

    while let Some(record) = reader.next_record()? {
        match record.kind {
            RecordKind::Data => {
                let address = u32::from(ela) << 16 | u32::from(record.offset);
                match current.as_mut() {
                    Some(run)
                        if address == run.address + run.data.len() as u32
                            && run.data.len() + record.data.len() <= RUN_WINDOW =>
                    {
                        run.data.extend_from_slice(&record.data);
                    }
                    Some(_) => {
                        // Not contiguous, or the window is full: this record
                        // opens the next run.
                        trace!("flushing run before record {}", record.line);
                        runs.extend(current.take());
                        reader.push_back(record);
                    }
                    None => {
                        current = Some(Run {
                            address,
                            data: record.data,
                        });
                    }
                }
            }
            RecordKind::EndOfFile => break,
            RecordKind::ExtendedLinearAddress => {
                if record.data.len() != 2 {
                    return Err(Error::HexParse {
                        line: record.line,
                        reason: format!(
                            "extended linear address payload of {} bytes, expected 2",
                            record.data.len()
                        ),
                    });
                }
                runs.extend(current.take());
                ela = u16::from(record.data[0]) << 8 | u16::from(record.data[1]);
                trace!("extended linear address {ela:#06X}");
            }
        }
    }

    runs.extend(current);
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    /// Format one record with a correct checksum.
    fn record(kind: u8, offset: u16, data: &[u8]) -> String {
        let mut line = format!(":{:02X}{offset:04X}{kind:02X}", data.len());
        let mut sum = (data.len() as u8)
            .wrapping_add((offset >> 8) as u8)
            .wrapping_add(offset as u8)
            .wrapping_add(kind);
        for b in data {
            write!(line, "{b:02X}").unwrap();
            sum = sum.wrapping_add(*b);
        }
        write!(line, "{:02X}", sum.wrapping_neg()).unwrap();
        line
    }

    fn eof() -> String {
        ":00000001FF".to_string()
    }

    /// Emit runs the way a linker would: an ELA record per run, data in
    /// 16-byte records.
    fn emit(runs: &[Run]) -> String {
        let mut out = String::new();
        let mut ela = 0u16;
        for run in runs {
            let run_ela = (run.address >> 16) as u16;
            if run_ela != ela || out.is_empty() {
                let payload = [(run_ela >> 8) as u8, run_ela as u8];
                out.push_str(&record(0x04, 0, &payload));
                out.push('\n');
                ela = run_ela;
            }
            for (i, chunk) in run.data.chunks(16).enumerate() {
                let offset = (run.address as u16).wrapping_add((i * 16) as u16);
                out.push_str(&record(0x00, offset, chunk));
                out.push('\n');
            }
        }
        out.push_str(&eof());
        out.push('\n');
        out
    }

    fn sixteen(fill: u8) -> Vec<u8> {
        vec![fill; 16]
    }

    #[test]
    fn test_contiguous_records_merge_into_one_run() {
        let mut input = String::new();
        input.push_str(&record(0x00, 0x0000, &sixteen(0xAA)));
        input.push('\n');
        input.push_str(&record(0x00, 0x0010, &sixteen(0xBB)));
        input.push('\n');
        input.push_str(&record(0x00, 0x0020, &sixteen(0xCC)));
        input.push('\n');
        input.push_str(&eof());

        let runs = parse_hex(input.as_bytes()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].address, 0);
        assert_eq!(runs[0].data.len(), 48);
        assert_eq!(runs[0].data[0], 0xAA);
        assert_eq!(runs[0].data[16], 0xBB);
        assert_eq!(runs[0].data[32], 0xCC);
    }

    #[test]
    fn test_gap_starts_a_new_run() {
        let mut input = String::new();
        input.push_str(&record(0x00, 0x0000, &sixteen(0x11)));
        input.push('\n');
        input.push_str(&record(0x00, 0x0010, &sixteen(0x22)));
        input.push('\n');
        input.push_str(&record(0x00, 0x0100, &sixteen(0x33)));
        input.push('\n');
        input.push_str(&eof());

        let runs = parse_hex(input.as_bytes()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].address, runs[0].data.len()), (0, 32));
        assert_eq!((runs[1].address, runs[1].data.len()), (0x100, 16));
    }

    #[test]
    fn test_extended_linear_address_offsets_following_data() {
        let mut input = String::new();
        input.push_str(&record(0x04, 0x0000, &[0x00, 0x01]));
        input.push('\n');
        input.push_str(&record(0x00, 0x2000, &sixteen(0x44)));
        input.push('\n');
        input.push_str(&eof());

        let runs = parse_hex(input.as_bytes()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].address, 0x0001_2000);
    }

    #[test]
    fn test_extended_linear_address_flushes_current_run() {
        let mut input = String::new();
        input.push_str(&record(0x00, 0x0000, &sixteen(0x55)));
        input.push('\n');
        input.push_str(&record(0x04, 0x0000, &[0x00, 0x02]));
        input.push('\n');
        // Would be contiguous with the previous record's 16-bit offset, but
        // sits in another 64 KiB bank.
        input.push_str(&record(0x00, 0x0010, &sixteen(0x66)));
        input.push('\n');
        input.push_str(&eof());

        let runs = parse_hex(input.as_bytes()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].address, 0);
        assert_eq!(runs[1].address, 0x0002_0010);
    }

    #[test]
    fn test_window_overflow_splits_runs_at_record_boundary() {
        // 32 KiB of contiguous 16-byte records fill exactly one window; the
        // next contiguous record must land in a second run.
        let mut input = String::new();
        for i in 0..(RUN_WINDOW / 16) + 1 {
            input.push_str(&record(0x00, (i * 16) as u16, &sixteen(i as u8)));
            input.push('\n');
        }
        input.push_str(&eof());

        let runs = parse_hex(input.as_bytes()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].address, 0);
        assert_eq!(runs[0].data.len(), RUN_WINDOW);
        assert_eq!(runs[1].address, RUN_WINDOW as u32);
        assert_eq!(runs[1].data.len(), 16);
    }

    #[test]
    fn test_eol_styles_parse_identically() {
        let rec_a = record(0x00, 0x0000, &sixteen(0x77));
        let rec_b = record(0x00, 0x0010, &sixteen(0x88));

        let dos = format!("{rec_a}\r\n{rec_b}\r\n{}\r\n", eof());
        let mac = format!("{rec_a}\r{rec_b}\r{}\r", eof());
        let unix = format!("{rec_a}\n{rec_b}\n{}\n", eof());

        let expected = parse_hex(unix.as_bytes()).unwrap();
        assert_eq!(parse_hex(dos.as_bytes()).unwrap(), expected);
        assert_eq!(parse_hex(mac.as_bytes()).unwrap(), expected);
    }

    #[test]
    fn test_bad_checksum_is_fatal_with_record_number() {
        let good = record(0x00, 0x0000, &sixteen(0x99));
        let mut bad = good.clone();
        bad.replace_range(bad.len() - 2.., "00");
        let input = format!("{good}\n{bad}\n{}", eof());

        match parse_hex(input.as_bytes()) {
            Err(Error::HexParse { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("checksum"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_record_types_are_fatal() {
        for kind in [0x02u8, 0x03, 0x05] {
            let input = format!("{}\n{}", record(kind, 0x0000, &[0x00, 0x00]), eof());
            match parse_hex(input.as_bytes()) {
                Err(Error::HexParse { reason, .. }) => {
                    assert!(reason.contains("unsupported record type"));
                }
                other => panic!("type {kind:#04X}: unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn test_ela_payload_must_be_two_bytes() {
        let input = format!("{}\n{}", record(0x04, 0x0000, &[0x01]), eof());
        match parse_hex(input.as_bytes()) {
            Err(Error::HexParse { reason, .. }) => {
                assert!(reason.contains("extended linear address"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_record_is_fatal() {
        let input = ":10000000AABB";
        assert!(matches!(
            parse_hex(input.as_bytes()),
            Err(Error::HexParse { .. })
        ));
    }

    #[test]
    fn test_garbage_after_eof_record_is_ignored() {
        let input = format!(
            "{}\n{}\nnot a record at all",
            record(0x00, 0x0000, &sixteen(0x10)),
            eof()
        );
        let runs = parse_hex(input.as_bytes()).unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_emit_parse_round_trip() {
        let runs = vec![
            Run {
                address: 0x0000_0000,
                data: (0..500u32).map(|i| i as u8).collect(),
            },
            Run {
                address: 0x0001_8000,
                data: vec![0xA5; 64],
            },
        ];

        let text = emit(&runs);
        assert_eq!(parse_hex(text.as_bytes()).unwrap(), runs);
    }
}
