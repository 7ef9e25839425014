//! Intel HEX record parsing.
//!
//! ## Record Format
//!
//! ```text
//! +-------+-------+---------+------+---------------+----------+
//! | Start | Count | Address | Type |     Data      | Checksum |
//! +-------+-------+---------+------+---------------+----------+
//! |  ':'  | 2 hex |  4 hex  | 2 hex| 2 * Count hex |  2 hex   |
//! +-------+-------+---------+------+---------------+----------+
//! ```
//!
//! The checksum is the two's complement of the low byte of the sum of every
//! decoded byte from Count through the end of Data.
//!
//! Records are validated here but never re-serialized: the text after the
//! start code is what gets framed and sent, so the bootloader checks the same
//! checksum the file was written with.

use crate::error::{Error, Result};
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Start code that opens every record.
pub const START_CODE: char = ':';

/// Hex digits before the data field (count, address, type).
const HEADER_DIGITS: usize = 8;

/// Why a HEX line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ParseErrorKind {
    /// The line does not start with `:` or is too short to hold a header.
    MalformedLine,
    /// The data field is not `2 * byte_count` hex digits long.
    LengthMismatch,
    /// The trailing checksum byte disagrees with the record contents.
    ChecksumMismatch,
    /// A field contains something other than hex digit pairs.
    InvalidHex,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MalformedLine => "malformed line (no ':' start code)",
            Self::LengthMismatch => "data length does not match byte count",
            Self::ChecksumMismatch => "checksum does not match",
            Self::InvalidHex => "invalid hex digits",
        };
        f.write_str(text)
    }
}

/// A rejected HEX line together with the reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: '{line}'")]
pub struct ParseError {
    /// Failure category.
    pub kind: ParseErrorKind,
    /// The offending line as given.
    pub line: String,
}

impl ParseError {
    /// Create a parse error for `line`.
    pub fn new(kind: ParseErrorKind, line: impl Into<String>) -> Self {
        Self {
            kind,
            line: line.into(),
        }
    }
}

/// Intel HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RecordKind {
    /// Data record (0x00).
    Data,
    /// End of file (0x01).
    EndOfFile,
    /// Extended segment address (0x02).
    ExtendedSegmentAddress,
    /// Start segment address (0x03).
    StartSegmentAddress,
    /// Extended linear address (0x04).
    ExtendedLinearAddress,
    /// Start linear address (0x05).
    StartLinearAddress,
    /// Anything else.
    Unknown(u8),
}

impl From<u8> for RecordKind {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x02 => Self::ExtendedSegmentAddress,
            0x03 => Self::StartSegmentAddress,
            0x04 => Self::ExtendedLinearAddress,
            0x05 => Self::StartLinearAddress,
            other => Self::Unknown(other),
        }
    }
}

/// A validated Intel HEX record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Number of data bytes.
    pub byte_count: u8,
    /// 16-bit load offset.
    pub address: u16,
    /// Raw record type byte.
    pub record_type: u8,
    /// Data bytes, `byte_count` long.
    pub data: Vec<u8>,
    /// Checksum byte as found in the line.
    pub checksum: u8,
    payload: String,
}

impl HexRecord {
    /// Parse one trimmed HEX line.
    pub fn parse(line: &str) -> std::result::Result<Self, ParseError> {
        let fail = |kind| ParseError::new(kind, line);

        let body = line
            .strip_prefix(START_CODE)
            .ok_or_else(|| fail(ParseErrorKind::MalformedLine))?;
        let digits = body.as_bytes();
        if digits.len() < HEADER_DIGITS {
            return Err(fail(ParseErrorKind::MalformedLine));
        }

        let byte_count = hex_byte(&digits[0..2]).ok_or_else(|| fail(ParseErrorKind::InvalidHex))?;
        let addr_hi = hex_byte(&digits[2..4]).ok_or_else(|| fail(ParseErrorKind::InvalidHex))?;
        let addr_lo = hex_byte(&digits[4..6]).ok_or_else(|| fail(ParseErrorKind::InvalidHex))?;
        let record_type = hex_byte(&digits[6..8]).ok_or_else(|| fail(ParseErrorKind::InvalidHex))?;

        let data_end = HEADER_DIGITS + usize::from(byte_count) * 2;
        if digits.len() < data_end {
            return Err(fail(ParseErrorKind::LengthMismatch));
        }
        let data = digits[HEADER_DIGITS..data_end]
            .chunks_exact(2)
            .map(hex_byte)
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| fail(ParseErrorKind::InvalidHex))?;

        // The checksum must follow the data; a short tail means the count lies.
        let checksum_digits = digits
            .get(data_end..data_end + 2)
            .ok_or_else(|| fail(ParseErrorKind::LengthMismatch))?;
        let checksum = hex_byte(checksum_digits).ok_or_else(|| fail(ParseErrorKind::InvalidHex))?;

        let record = Self {
            byte_count,
            address: u16::from_be_bytes([addr_hi, addr_lo]),
            record_type,
            data,
            checksum,
            payload: body.to_string(),
        };

        if !record.checksum_valid() {
            return Err(fail(ParseErrorKind::ChecksumMismatch));
        }

        Ok(record)
    }

    /// Recompute the checksum from the record fields.
    pub fn compute_checksum(&self) -> u8 {
        let [addr_hi, addr_lo] = self.address.to_be_bytes();
        let sum = self
            .data
            .iter()
            .fold(
                self.byte_count
                    .wrapping_add(addr_hi)
                    .wrapping_add(addr_lo)
                    .wrapping_add(self.record_type),
                |acc, b| acc.wrapping_add(*b),
            );
        sum.wrapping_neg()
    }

    /// Whether the stored checksum matches the record contents.
    pub fn checksum_valid(&self) -> bool {
        usize::from(self.byte_count) == self.data.len() && self.compute_checksum() == self.checksum
    }

    /// Record type as an enum.
    pub fn kind(&self) -> RecordKind {
        RecordKind::from(self.record_type)
    }

    /// The line text after the start code, exactly as read.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Decode one hex digit pair. Signs and whitespace are rejected.
pub(crate) fn hex_byte(pair: &[u8]) -> Option<u8> {
    match pair {
        [hi, lo] => {
            let hi = char::from(*hi).to_digit(16)?;
            let lo = char::from(*lo).to_digit(16)?;
            u8::try_from(hi << 4 | lo).ok()
        },
        _ => None,
    }
}

/// Statistics gathered from a fully validated HEX file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HexSummary {
    /// Number of records.
    pub records: usize,
    /// Number of data records.
    pub data_records: usize,
    /// Total data bytes across data records.
    pub data_bytes: usize,
    /// Lowest and highest absolute address touched by data records.
    pub address_range: Option<(u32, u32)>,
    /// Whether an end-of-file record is present.
    pub has_eof: bool,
}

/// The ordered lines of an Intel HEX file.
#[derive(Debug, Clone, Default)]
pub struct HexFile {
    lines: Vec<String>,
    path: Option<PathBuf>,
}

impl HexFile {
    /// Load a HEX file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut file = Self::from_text(&text);
        file.path = Some(path.to_path_buf());
        debug!("Loaded {} records from {}", file.len(), path.display());
        Ok(file)
    }

    /// Collect record lines from text.
    ///
    /// Lines are trimmed; anything not starting with `:` is skipped.
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with(START_CODE))
            .map(ToString::to_string)
            .collect();
        Self { lines, path: None }
    }

    /// Build directly from already selected lines, without filtering.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines
                .into_iter()
                .map(Into::into)
                .collect(),
            path: None,
        }
    }

    /// Record lines in file order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Path the file was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of record lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether no record lines were found.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Parse every line, stopping at the first failure.
    pub fn records(&self) -> Result<Vec<HexRecord>> {
        self.lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                HexRecord::parse(line).map_err(|reason| Error::LineRejected { index, reason })
            })
            .collect()
    }

    /// Validate every line and summarize the image.
    pub fn validate(&self) -> Result<HexSummary> {
        let records = self.records()?;
        let mut summary = HexSummary {
            records: records.len(),
            ..HexSummary::default()
        };
        let mut base: u32 = 0;

        for record in &records {
            match record.kind() {
                RecordKind::Data => {
                    summary.data_records += 1;
                    summary.data_bytes += record.data.len();
                    if record.data.is_empty() {
                        continue;
                    }
                    let start = base.wrapping_add(u32::from(record.address));
                    let end = start.wrapping_add(u32::from(record.byte_count) - 1);
                    summary.address_range = Some(match summary.address_range {
                        Some((lo, hi)) => (lo.min(start), hi.max(end)),
                        None => (start, end),
                    });
                },
                RecordKind::EndOfFile => summary.has_eof = true,
                RecordKind::ExtendedSegmentAddress if record.data.len() == 2 => {
                    base = u32::from(u16::from_be_bytes([record.data[0], record.data[1]])) << 4;
                },
                RecordKind::ExtendedLinearAddress if record.data.len() == 2 => {
                    base = u32::from(u16::from_be_bytes([record.data[0], record.data[1]])) << 16;
                },
                _ => {},
            }
        }

        Ok(summary)
    }
}
