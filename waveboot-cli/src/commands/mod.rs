//! Command implementations.
//!
//! Each subcommand lives in its own module.

pub(crate) mod check;
pub(crate) mod completions;
pub(crate) mod ports;
pub(crate) mod program;
