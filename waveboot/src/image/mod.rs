//! Firmware image formats.

pub mod ihex;

pub use ihex::{HexFile, HexRecord, HexSummary, ParseError, ParseErrorKind, RecordKind};
