//! Byte channel abstraction.
//!
//! The transfer engine only needs a narrow contract from the link to the
//! programmer bridge: how many bytes are waiting, read what is waiting, and
//! write a frame. [`Port`] captures that contract on top of `Read + Write` so
//! the protocol layer stays I/O-agnostic.
//!
//! ```text
//! +------------------+
//! |  Transfer engine |
//! |  (handshake,     |
//! |   line retries)  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+     +------------------+
//! |    Port trait    | <-- |   ScriptedPort   |  tests
//! +--------+---------+     +------------------+
//!          |
//!          v
//! +--------+---------+
//! | NativePort       |
//! |   (serialport)   |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

pub mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate the programmer bridge listens on.
pub const DEFAULT_BAUD: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Duplex byte channel to the programmer bridge.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;

    /// Read whatever is currently waiting. Returns an empty vector if nothing is.
    fn read_available(&mut self) -> Result<Vec<u8>> {
        let available = self.bytes_available()?;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        match self.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write all bytes and flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(())
    }
}

impl<P: Port + ?Sized> Port for &mut P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        (**self).read_available()
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all_bytes(buf)
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

pub use mock::ScriptedPort;
