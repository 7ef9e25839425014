//! Programming session: handshake and line transfer.
//!
//! Both stages share one wait primitive: poll the port, feed the token
//! reader, and stop on an accepted token or at a deadline fixed on entry.

pub mod engine;
pub mod handshake;

pub use engine::{
    ProgressEvent, ProgressSink, TransferEngine, TransferReport, TransferSession,
};
pub use handshake::{HandshakeController, HandshakeState};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::token::{ProtocolToken, TokenReader};
use log::trace;
use std::thread;
use std::time::{Duration, Instant};

/// Default number of writes per line.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Default wait for a line acknowledgment.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait for the ready token after the boot command.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between polls when nothing has arrived.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Transfer tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Writes allowed per line before the session fails.
    pub max_attempts: u32,
    /// How long one attempt waits for a token.
    pub attempt_timeout: Duration,
    /// How long the handshake waits for the ready token.
    pub handshake_timeout: Duration,
    /// Sleep between polls of an idle port.
    pub poll_interval: Duration,
    /// Validate count and checksum of each record before sending it.
    ///
    /// When disabled only the start code and hex digits are checked and the
    /// bootloader's own checksum test decides. The commonly quoted sample
    /// record `:10000000214501368C1245F00001081000000000D1` carries checksum
    /// `D1` although its bytes sum to `67`; it is rejected while this is on
    /// and sent unchanged when it is off.
    pub verify_records: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            verify_records: true,
        }
    }
}

impl TransferConfig {
    /// Set the number of attempts per line.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the per-attempt acknowledgment timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the handshake ready timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable local record validation.
    #[must_use]
    pub fn with_verify_records(mut self, verify: bool) -> Self {
        self.verify_records = verify;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.attempt_timeout.is_zero() {
            return Err(Error::Config("attempt timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Poll `port` until `accept` takes a token or `timeout` elapses.
///
/// Tokens already complete in `reader` are considered first. Rejected tokens
/// are dropped and waiting continues within the same deadline. Returns
/// `Ok(None)` on timeout.
pub(crate) fn wait_for_token<P, F>(
    port: &mut P,
    reader: &mut TokenReader,
    timeout: Duration,
    poll_interval: Duration,
    mut accept: F,
) -> Result<Option<ProtocolToken>>
where
    P: Port + ?Sized,
    F: FnMut(ProtocolToken) -> bool,
{
    let deadline = Instant::now() + timeout;

    loop {
        while let Some(token) = reader.next_token() {
            if accept(token) {
                return Ok(Some(token));
            }
            trace!("Ignoring {token}");
        }

        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        let bytes = port.read_available()?;
        if bytes.is_empty() {
            thread::sleep(poll_interval.min(deadline - now));
        } else {
            trace!("Received {} bytes", bytes.len());
            reader.push_bytes(&bytes);
        }
    }
}
