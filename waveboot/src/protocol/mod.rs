//! Wire protocol: fixed-size frames out, newline-terminated tokens back.

pub mod frame;
pub mod token;

pub use frame::{BOOT_COMMAND, DEFAULT_RESET_CODE, FRAME_SIZE, Frame};
pub use token::{ProtocolToken, TokenReader};
