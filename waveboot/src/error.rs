//! Error types for waveboot.

use crate::image::ihex::ParseError;
use crate::session::handshake::HandshakeState;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for waveboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for waveboot operations.
///
/// Negative acknowledgments and silent attempts never show up here; the
/// transfer engine absorbs them by spending a retry. Everything in this enum
/// ends the session.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The bootloader never answered the boot command with a ready token.
    #[error("Bootloader not ready after {waited:?} (stage: {stage})")]
    HandshakeTimeout {
        /// Last stage the handshake reached.
        stage: HandshakeState,
        /// How long the ready wait lasted.
        waited: Duration,
    },

    /// A line of the session failed validation before it was sent.
    #[error("Line {index} rejected: {reason}")]
    LineRejected {
        /// Zero-based index of the line in the session.
        index: usize,
        /// Why the line was rejected.
        reason: ParseError,
    },

    /// A line was never acknowledged within the attempt budget.
    #[error("Line {index} not acknowledged after {attempts} attempts")]
    LineTransferFailed {
        /// Zero-based index of the line in the session.
        index: usize,
        /// Number of frame writes spent on the line.
        attempts: u32,
    },

    /// Lines were offered before the bootloader reported ready.
    #[error("Bootloader handshake has not completed")]
    NotReady,

    /// The embedding application asked the operation to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Index of the line this error refers to, if any.
    pub fn line_index(&self) -> Option<usize> {
        match self {
            Self::LineRejected { index, .. } | Self::LineTransferFailed { index, .. } => {
                Some(*index)
            },
            _ => None,
        }
    }
}
