//! # waveboot
//!
//! Host side of the Waveboot over-the-air bootloader.
//!
//! A programmer bridge sits on a serial port and relays fixed 21-byte frames
//! to a remote node over radio. This crate resets the node into its
//! bootloader, waits for it to report ready, and then streams an Intel HEX
//! image one record per frame, resending any record the bootloader rejects
//! or leaves unanswered.
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `serde`: serialization of reports and summaries
//!
//! ## Example
//!
//! ```rust,no_run
//! use waveboot::{HexFile, Programmer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = HexFile::from_file("firmware.hex")?;
//!     image.validate()?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut programmer = Programmer::open("/dev/ttyUSB0", 9600)?;
//!         programmer.connect("RESET")?;
//!         let report = programmer.program(&image, &mut |event: &waveboot::ProgressEvent| {
//!             println!("line {}/{}", event.line_index + 1, event.total_lines);
//!         })?;
//!         println!("{} lines in {:?}", report.lines_acked, report.elapsed);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod programmer;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by every wait loop.
///
/// The checker should return `true` once the running session should stop,
/// for example after Ctrl-C. Only the first registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    image::{HexFile, HexRecord, HexSummary, ParseError, ParseErrorKind, RecordKind},
    port::{DEFAULT_BAUD, Port, PortEnumerator, PortInfo, ScriptedPort, SerialConfig},
    programmer::Programmer,
    protocol::{Frame, ProtocolToken, TokenReader},
    session::{
        HandshakeController, HandshakeState, ProgressEvent, ProgressSink, TransferConfig,
        TransferEngine, TransferReport, TransferSession,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        // Unit tests never register a checker; see tests/interrupt.rs.
        assert!(!is_interrupted_requested());
    }
}
