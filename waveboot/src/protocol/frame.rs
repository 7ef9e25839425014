//! Fixed-width transmission frames.
//!
//! Every write to the bootloader is exactly [`FRAME_SIZE`] bytes, so the
//! bridge and the remote node can always read fixed chunks:
//!
//! ```text
//! Reset:  <reset code, UTF-8, truncated> 00 .. 00
//! Boot:   'B' 'O' 'O' 'T' 00 .. 00
//! Line:   <count> <addr hi> <addr lo> <type> <data ..> <checksum> 00 .. 00
//! +------------------------------------------------------------------+
//! |                            21 bytes                              |
//! +------------------------------------------------------------------+
//! ```
//!
//! Line frames carry the bytes decoded from the record text after the start
//! code. A 16-byte data record fills the frame exactly.

use crate::image::ihex::{ParseError, ParseErrorKind, START_CODE, hex_byte};
use std::fmt;

/// Size of every frame on the wire.
pub const FRAME_SIZE: usize = 21;

/// Payload of the boot command.
pub const BOOT_COMMAND: &[u8] = b"BOOT";

/// Reset code used when the caller does not supply one.
pub const DEFAULT_RESET_CODE: &str = "RESET";

/// A zero-padded, fixed-size frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Build a frame from the first `FRAME_SIZE` bytes of `bytes`, zero-padded.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; FRAME_SIZE];
        let len = bytes.len().min(FRAME_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(buf)
    }

    /// Reset frame carrying the caller's reset code.
    pub fn reset(code: &str) -> Self {
        Self::from_bytes(code.as_bytes())
    }

    /// Boot frame (`BOOT` followed by zeros).
    pub fn boot() -> Self {
        Self::from_bytes(BOOT_COMMAND)
    }

    /// Encode the hex text of one record.
    ///
    /// A leading start code is ignored, an unpaired trailing digit is dropped
    /// and anything past `FRAME_SIZE` decoded bytes is cut off.
    pub fn encode_line(hex_text: &str) -> Result<Self, ParseError> {
        let digits = hex_text.strip_prefix(START_CODE).unwrap_or(hex_text);
        let bytes = decode_hex(digits)
            .ok_or_else(|| ParseError::new(ParseErrorKind::InvalidHex, hex_text))?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    /// Render as a C initializer, e.g. `{ 0x10, 0x00, ... }`.
    pub fn to_c_array(&self) -> String {
        let items: Vec<String> = self
            .0
            .iter()
            .map(|b| format!("0x{b:02x}"))
            .collect();
        format!("{{ {} }}", items.join(", "))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(")?;
        for b in &self.0 {
            write!(f, "{b:02X}")?;
        }
        write!(f, ")")
    }
}

/// Decode hex digit pairs, dropping an unpaired trailing digit.
///
/// Returns `None` if any pair contains a non-hex character.
pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    text.as_bytes()
        .chunks_exact(2)
        .map(hex_byte)
        .collect()
}
