//! Response tokens and line accumulation.
//!
//! The bridge forwards bootloader replies as newline-terminated text, often
//! wrapped in its own log decoration (`<Received (3 bytes): PRG`). A line is
//! classified by the keyword it contains; everything else is inert.

use log::trace;
use std::fmt;

/// Keyword sent when the bootloader accepted the boot command.
pub const READY: &str = "RDY";
/// Keyword acknowledging a programmed line.
pub const PROGRAMMED: &str = "PRG";
/// Keyword signalling the image is complete.
pub const DONE: &str = "DNE";
/// Keyword reporting a record checksum failure on the remote side.
pub const CHECKSUM_ERROR: &str = "CHK";
/// Keyword reporting any other remote failure.
pub const GENERIC_ERROR: &str = "ERR";

/// Classified response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolToken {
    /// Bootloader is waiting for firmware lines.
    Ready,
    /// The last line was written.
    Programmed,
    /// The bootloader has everything it needs.
    Done,
    /// The last line failed its checksum remotely.
    ChecksumError,
    /// The remote side reported an error.
    GenericError,
    /// Anything else.
    Unknown,
}

impl ProtocolToken {
    /// Classify one line by substring containment.
    ///
    /// The first match in the order DONE, PROGRAMMED, CHECKSUM_ERROR,
    /// GENERIC_ERROR, READY wins.
    pub fn classify(line: &str) -> Self {
        if line.contains(DONE) {
            Self::Done
        } else if line.contains(PROGRAMMED) {
            Self::Programmed
        } else if line.contains(CHECKSUM_ERROR) {
            Self::ChecksumError
        } else if line.contains(GENERIC_ERROR) {
            Self::GenericError
        } else if line.contains(READY) {
            Self::Ready
        } else {
            Self::Unknown
        }
    }

    /// Whether this token is a negative acknowledgment.
    pub fn is_nak(self) -> bool {
        matches!(self, Self::ChecksumError | Self::GenericError)
    }
}

impl fmt::Display for ProtocolToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "READY",
            Self::Programmed => "PROGRAMMED",
            Self::Done => "DONE",
            Self::ChecksumError => "CHECKSUM_ERROR",
            Self::GenericError => "GENERIC_ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Accumulates received bytes and yields one token per complete line.
///
/// Partial lines (and partial UTF-8 sequences) stay buffered across calls.
#[derive(Debug, Default)]
pub struct TokenReader {
    raw: Vec<u8>,
    text: String,
}

impl TokenReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
        let decoded = drain_utf8_lossy(&mut self.raw);
        self.text.push_str(&decoded);
    }

    /// Split off the next complete line, if any, and classify it.
    pub fn next_token(&mut self) -> Option<ProtocolToken> {
        let newline = self.text.find('\n')?;
        let rest = self.text.split_off(newline + 1);
        let line = std::mem::replace(&mut self.text, rest);
        let line = line.trim_end_matches(['\n', '\r']);
        let token = ProtocolToken::classify(line);
        trace!("<< {line:?} -> {token}");
        Some(token)
    }

    /// Append bytes and return every token completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ProtocolToken> {
        self.push_bytes(bytes);
        std::iter::from_fn(|| self.next_token()).collect()
    }

    /// Number of buffered characters not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.text.len() + self.raw.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.text.clear();
    }
}

/// Decode buffered bytes, replacing invalid sequences with `�`.
///
/// An incomplete UTF-8 suffix is left in `buffer` for the next read.
fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                output.push_str(&String::from_utf8_lossy(&buffer[..valid_up_to]));

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        buffer.drain(..valid_up_to + invalid_len);
                    },
                    None => {
                        buffer.drain(..valid_up_to);
                        break;
                    },
                }
            },
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_plain_tokens() {
        assert_eq!(ProtocolToken::classify("RDY"), ProtocolToken::Ready);
        assert_eq!(ProtocolToken::classify("PRG"), ProtocolToken::Programmed);
        assert_eq!(ProtocolToken::classify("DNE"), ProtocolToken::Done);
        assert_eq!(ProtocolToken::classify("CHK"), ProtocolToken::ChecksumError);
        assert_eq!(ProtocolToken::classify("ERR"), ProtocolToken::GenericError);
        assert_eq!(ProtocolToken::classify("|Radio initialized"), ProtocolToken::Unknown);
    }

    #[test]
    fn test_classify_bridge_decorated_lines() {
        assert_eq!(
            ProtocolToken::classify("<Received (3 bytes): PRG"),
            ProtocolToken::Programmed
        );
        assert_eq!(
            ProtocolToken::classify("|Checksum error reported from remote node"),
            ProtocolToken::Unknown
        );
    }

    #[test]
    fn test_classify_order_first_match_wins() {
        assert_eq!(ProtocolToken::classify("PRG DNE"), ProtocolToken::Done);
        assert_eq!(ProtocolToken::classify("CHK PRG"), ProtocolToken::Programmed);
        assert_eq!(ProtocolToken::classify("ERR CHK"), ProtocolToken::ChecksumError);
        assert_eq!(ProtocolToken::classify("RDY ERR"), ProtocolToken::GenericError);
    }

    #[test]
    fn test_reader_splits_lines() {
        let mut reader = TokenReader::new();
        let tokens = reader.feed(b"RDY\r\nhello\nPRG\n");
        assert_eq!(
            tokens,
            vec![ProtocolToken::Ready, ProtocolToken::Unknown, ProtocolToken::Programmed]
        );
        assert_eq!(reader.pending_len(), 0);
    }

    #[test]
    fn test_reader_keeps_partial_line() {
        let mut reader = TokenReader::new();
        assert!(reader.feed(b"PR").is_empty());
        assert!(reader.feed(b"G").is_empty());
        assert_eq!(reader.pending_len(), 3);
        assert_eq!(reader.feed(b"\nDN"), vec![ProtocolToken::Programmed]);
        assert_eq!(reader.feed(b"E\n"), vec![ProtocolToken::Done]);
    }

    #[test]
    fn test_reader_next_token_leaves_rest_buffered() {
        let mut reader = TokenReader::new();
        reader.push_bytes(b"CHK\nPRG\n");
        assert_eq!(reader.next_token(), Some(ProtocolToken::ChecksumError));
        assert_eq!(reader.next_token(), Some(ProtocolToken::Programmed));
        assert_eq!(reader.next_token(), None);
    }

    #[test]
    fn test_reader_replaces_invalid_bytes() {
        let mut reader = TokenReader::new();
        let tokens = reader.feed(&[0xFF, b'P', 0xFE, b'R', b'G', b'\n']);
        // 0xFE splits the keyword, so nothing is recognized.
        assert_eq!(tokens, vec![ProtocolToken::Unknown]);

        let tokens = reader.feed(&[0xFF, b'P', b'R', b'G', b'\n']);
        assert_eq!(tokens, vec![ProtocolToken::Programmed]);
    }

    #[test]
    fn test_reader_holds_incomplete_utf8() {
        let mut reader = TokenReader::new();
        assert!(reader.feed(&[0xE4, 0xBD]).is_empty());
        assert_eq!(reader.feed(&[0xA0, b'D', b'N', b'E', b'\n']), vec![ProtocolToken::Done]);
    }

    #[test]
    fn test_clear() {
        let mut reader = TokenReader::new();
        reader.push_bytes(b"PRG");
        reader.clear();
        assert_eq!(reader.feed(b"\n"), vec![ProtocolToken::Unknown]);
    }
}
