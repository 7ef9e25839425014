//! Reset and boot handshake.
//!
//! ```text
//! IDLE --reset frame--> RESET_SENT --settle, boot frame--> BOOT_SENT
//!      --poll--> AWAITING_READY --RDY--> READY
//!                               --deadline--> TIMED_OUT
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{FRAME_SIZE, Frame};
use crate::protocol::token::{ProtocolToken, TokenReader};
use crate::session::{DEFAULT_POLL_INTERVAL, wait_for_token};
use log::{debug, info, warn};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// Time the remote node needs to reboot into its bootloader after a reset.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet.
    Idle,
    /// Reset frame written.
    ResetSent,
    /// Boot frame written.
    BootSent,
    /// Polling for the ready token.
    AwaitingReady,
    /// Bootloader is accepting firmware lines.
    Ready,
    /// No ready token before the deadline.
    TimedOut,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResetSent => "reset sent",
            Self::BootSent => "boot sent",
            Self::AwaitingReady => "awaiting ready",
            Self::Ready => "ready",
            Self::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Drives the reset + boot sequence.
#[derive(Debug, Clone)]
pub struct HandshakeController {
    state: HandshakeState,
    settle_delay: Duration,
    poll_interval: Duration,
}

impl Default for HandshakeController {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeController {
    /// Create a controller using the standard settle delay.
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            settle_delay: SETTLE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the post-reset settle delay for every handshake this
    /// controller performs (bridges with faster nodes, tests).
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the last handshake reached `Ready`.
    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    /// Reset the remote node, send the boot command and wait for `RDY`.
    ///
    /// Starts over from `Idle` on every call, so a timed-out handshake can
    /// simply be performed again.
    pub fn perform<P: Port + ?Sized>(
        &mut self,
        port: &mut P,
        reader: &mut TokenReader,
        reset_code: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.state = HandshakeState::Idle;
        port.clear_buffers()?;
        reader.clear();

        if reset_code.len() > FRAME_SIZE {
            warn!("Reset code is longer than {FRAME_SIZE} bytes and will be truncated");
        }

        info!("Sending reset code to {}", port.name());
        port.write_all_bytes(Frame::reset(reset_code).as_bytes())?;
        self.state = HandshakeState::ResetSent;

        thread::sleep(self.settle_delay);

        debug!("Sending BOOT");
        port.write_all_bytes(Frame::boot().as_bytes())?;
        self.state = HandshakeState::BootSent;

        info!("Waiting for bootloader...");
        self.state = HandshakeState::AwaitingReady;
        let start = Instant::now();
        let token = wait_for_token(port, reader, timeout, self.poll_interval, |t| {
            t == ProtocolToken::Ready
        })?;

        if token.is_some() {
            self.state = HandshakeState::Ready;
            info!("Bootloader ready after {:.1}s", start.elapsed().as_secs_f64());
            Ok(())
        } else {
            self.state = HandshakeState::TimedOut;
            Err(Error::HandshakeTimeout {
                stage: HandshakeState::AwaitingReady,
                waited: start.elapsed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ScriptedPort;

    fn controller() -> HandshakeController {
        HandshakeController::new()
            .with_settle_delay(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_handshake_ready() {
        let mut port = ScriptedPort::new().silence().reply(b"RDY\n");
        let mut reader = TokenReader::new();
        let mut hs = controller();

        hs.perform(&mut port, &mut reader, "RESET", Duration::from_millis(200))
            .unwrap();

        assert!(hs.is_ready());
        assert_eq!(port.writes().len(), 2);
        assert_eq!(port.writes()[0], Frame::reset("RESET").as_bytes().to_vec());
        assert_eq!(port.writes()[1], Frame::boot().as_bytes().to_vec());
    }

    #[test]
    fn test_handshake_ready_embedded_in_bridge_log() {
        let mut port = ScriptedPort::new()
            .silence()
            .reply(b"|Command sent\n<Received (3 bytes): RDY\n|Bootloader is ready!\n")
            .with_chunk_size(4);
        let mut reader = TokenReader::new();
        let mut hs = controller();

        hs.perform(&mut port, &mut reader, "RESET", Duration::from_millis(500))
            .unwrap();
        assert_eq!(hs.state(), HandshakeState::Ready);
    }

    #[test]
    fn test_handshake_ignores_other_tokens() {
        let mut port = ScriptedPort::new().silence().reply(b"PRG\nERR\n");
        let mut reader = TokenReader::new();
        let mut hs = controller();

        let err = hs
            .perform(&mut port, &mut reader, "RESET", Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { .. }));
        assert_eq!(hs.state(), HandshakeState::TimedOut);
    }

    #[test]
    fn test_handshake_timeout_sends_only_reset_and_boot() {
        let mut port = ScriptedPort::new();
        let mut reader = TokenReader::new();
        let mut hs = controller();

        let err = hs
            .perform(&mut port, &mut reader, "RESET", Duration::from_millis(20))
            .unwrap_err();
        match err {
            Error::HandshakeTimeout { stage, waited } => {
                assert_eq!(stage, HandshakeState::AwaitingReady);
                assert!(waited >= Duration::from_millis(20));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(port.writes().len(), 2);
    }

    #[test]
    fn test_handshake_can_be_repeated() {
        let mut port = ScriptedPort::new()
            .silence()
            .silence()
            .silence()
            .reply(b"RDY\n");
        let mut reader = TokenReader::new();
        let mut hs = controller();

        assert!(
            hs.perform(&mut port, &mut reader, "RESET", Duration::from_millis(10))
                .is_err()
        );
        hs.perform(&mut port, &mut reader, "RESET", Duration::from_millis(200))
            .unwrap();
        assert!(hs.is_ready());
        assert_eq!(port.writes().len(), 4);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(HandshakeState::AwaitingReady.to_string(), "awaiting ready");
    }
}
