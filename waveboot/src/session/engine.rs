//! Line-by-line transfer with bounded retries.
//!
//! Each line is encoded once into a [`Frame`] and written up to
//! `max_attempts` times. After every write the engine waits for a single
//! resolving token:
//!
//! - `PRG` acknowledges the line and moves to the next one.
//! - `DNE` finishes the whole session, whatever line is current.
//! - `CHK` / `ERR` consume the attempt; the same frame is written again.
//! - Silence until the attempt deadline also consumes the attempt.
//!
//! Lines that cannot be encoded stop the session before anything for them
//! is written.

use crate::error::{Error, Result};
use crate::image::ihex::{HexFile, HexRecord, ParseError, ParseErrorKind, START_CODE};
use crate::port::Port;
use crate::protocol::frame::Frame;
use crate::protocol::token::{ProtocolToken, TokenReader};
use crate::session::{TransferConfig, wait_for_token};
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

/// State owned by one programming run.
#[derive(Debug, Clone)]
pub struct TransferSession {
    lines: Vec<String>,
    current_index: usize,
    attempt_count: u32,
    started: Instant,
    reset_code: String,
}

impl TransferSession {
    /// Start a session over the given lines.
    pub fn new<I, S>(lines: I, reset_code: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            current_index: 0,
            attempt_count: 0,
            started: Instant::now(),
            reset_code: reset_code.into(),
        }
    }

    /// Start a session over every line of a HEX file.
    pub fn from_hex_file(file: &HexFile, reset_code: impl Into<String>) -> Self {
        Self::new(file.lines().iter().cloned(), reset_code)
    }

    /// Lines to transfer.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Index of the line being transferred.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Attempts spent on the current line.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Reset code used for the handshake of this session.
    pub fn reset_code(&self) -> &str {
        &self.reset_code
    }

    /// Time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Reported after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Zero-based index of the line.
    pub line_index: usize,
    /// Number of lines in the session.
    pub total_lines: usize,
    /// One-based attempt number for this line.
    pub attempt: u32,
    /// Attempt budget per line.
    pub max_attempts: u32,
    /// Time since the session started.
    pub elapsed: Duration,
}

impl ProgressEvent {
    /// Fraction of lines that are done or in flight, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_lines == 0 {
            return 1.0;
        }
        (self.line_index + 1) as f64 / self.total_lines as f64
    }
}

/// Receives progress events.
pub trait ProgressSink {
    /// Called once per attempt, after its outcome is known.
    fn on_progress(&mut self, event: &ProgressEvent);
}

impl<F: FnMut(&ProgressEvent)> ProgressSink for F {
    fn on_progress(&mut self, event: &ProgressEvent) {
        self(event);
    }
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferReport {
    /// Lines in the session.
    pub lines_total: usize,
    /// Lines the bootloader acknowledged, counting the one answered with `DNE`.
    pub lines_acked: usize,
    /// Frame writes across all lines.
    pub attempts_used: u32,
    /// The bootloader reported completion before the last line.
    pub finished_early: bool,
    /// Wall time of the transfer.
    pub elapsed: Duration,
}

enum LineOutcome {
    Acked,
    Done,
    /// `DNE` was already waiting; this line's frame was never written.
    DoneBeforeWrite,
}

/// Runs a [`TransferSession`] over a port whose bootloader is ready.
pub struct TransferEngine<'a, P: Port + ?Sized> {
    port: &'a mut P,
    reader: &'a mut TokenReader,
    config: &'a TransferConfig,
    attempts_used: u32,
}

impl<'a, P: Port + ?Sized> TransferEngine<'a, P> {
    /// Create an engine. `reader` should be the one the handshake used, so
    /// bytes it already buffered are not lost.
    pub fn new(port: &'a mut P, reader: &'a mut TokenReader, config: &'a TransferConfig) -> Self {
        Self {
            port,
            reader,
            config,
            attempts_used: 0,
        }
    }

    /// Transfer every line of `session` in order.
    pub fn run<S: ProgressSink + ?Sized>(
        &mut self,
        mut session: TransferSession,
        progress: &mut S,
    ) -> Result<TransferReport> {
        self.config.validate()?;
        self.attempts_used = 0;

        let total = session.lines.len();
        info!("Transferring {total} lines");

        for index in 0..total {
            session.current_index = index;
            session.attempt_count = 0;

            let frame = self.encode(index, &session.lines[index])?;
            trace!("Line {index}: {frame:?}");

            match self.send_line(index, &frame, &mut session, progress)? {
                LineOutcome::Acked => {},
                LineOutcome::Done => {
                    info!("Bootloader finished at line {}/{}", index + 1, total);
                    return Ok(self.report(&session, index + 1, index + 1 < total));
                },
                LineOutcome::DoneBeforeWrite => {
                    info!("Bootloader finished after {index}/{total} lines");
                    return Ok(self.report(&session, index, index < total));
                },
            }
        }

        info!("All {total} lines acknowledged");
        Ok(self.report(&session, total, false))
    }

    fn encode(&self, index: usize, line: &str) -> Result<Frame> {
        let result = if self.config.verify_records {
            HexRecord::parse(line).and_then(|record| Frame::encode_line(record.payload()))
        } else if line.starts_with(START_CODE) {
            Frame::encode_line(line)
        } else {
            Err(ParseError::new(ParseErrorKind::MalformedLine, line))
        };

        result.map_err(|reason| Error::LineRejected { index, reason })
    }

    fn send_line<S: ProgressSink + ?Sized>(
        &mut self,
        index: usize,
        frame: &Frame,
        session: &mut TransferSession,
        progress: &mut S,
    ) -> Result<LineOutcome> {
        let max = self.config.max_attempts;

        for attempt in 1..=max {
            if self.discard_stale()? {
                return Ok(if attempt == 1 {
                    LineOutcome::DoneBeforeWrite
                } else {
                    LineOutcome::Done
                });
            }

            session.attempt_count = attempt;

            self.port.write_all_bytes(frame.as_bytes())?;
            self.attempts_used += 1;

            let token = wait_for_token(
                &mut *self.port,
                &mut *self.reader,
                self.config.attempt_timeout,
                self.config.poll_interval,
                |t| !matches!(t, ProtocolToken::Unknown | ProtocolToken::Ready),
            )?;

            progress.on_progress(&ProgressEvent {
                line_index: index,
                total_lines: session.lines.len(),
                attempt,
                max_attempts: max,
                elapsed: session.elapsed(),
            });

            match token {
                Some(ProtocolToken::Programmed) => {
                    debug!("Line {index} acknowledged (attempt {attempt}/{max})");
                    return Ok(LineOutcome::Acked);
                },
                Some(ProtocolToken::Done) => return Ok(LineOutcome::Done),
                Some(nak) => {
                    warn!("Line {index} rejected by bootloader ({nak}), attempt {attempt}/{max}");
                },
                None => {
                    warn!("Line {index} timed out, attempt {attempt}/{max}");
                },
            }
        }

        Err(Error::LineTransferFailed {
            index,
            attempts: max,
        })
    }

    /// Drop complete lines that arrived before this attempt's frame, so a
    /// late answer to an earlier write cannot resolve the new one. A stale
    /// `DNE` still ends the session.
    fn discard_stale(&mut self) -> Result<bool> {
        let bytes = self.port.read_available()?;
        if !bytes.is_empty() {
            self.reader.push_bytes(&bytes);
        }
        while let Some(token) = self.reader.next_token() {
            if token == ProtocolToken::Done {
                return Ok(true);
            }
            debug!("Discarding stale {token}");
        }
        Ok(false)
    }

    fn report(
        &self,
        session: &TransferSession,
        lines_acked: usize,
        finished_early: bool,
    ) -> TransferReport {
        TransferReport {
            lines_total: session.lines.len(),
            lines_acked,
            attempts_used: self.attempts_used,
            finished_early,
            elapsed: session.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ScriptedPort;

    const LINE_A: &str = ":10000000214501368C1245F0000108100000000067";
    const LINE_EOF: &str = ":00000001FF";

    fn fast() -> TransferConfig {
        TransferConfig::default()
            .with_attempt_timeout(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(1))
    }

    fn run(
        port: &mut ScriptedPort,
        lines: &[&str],
        config: &TransferConfig,
    ) -> Result<TransferReport> {
        let mut reader = TokenReader::new();
        let session = TransferSession::new(lines.iter().copied(), "RESET");
        TransferEngine::new(port, &mut reader, config).run(session, &mut |_: &ProgressEvent| {})
    }

    #[test]
    fn test_single_line_acknowledged() {
        let mut port = ScriptedPort::new().reply(b"PRG\n");
        let report = run(&mut port, &[LINE_A], &fast()).unwrap();

        assert_eq!(report.lines_total, 1);
        assert_eq!(report.lines_acked, 1);
        assert_eq!(report.attempts_used, 1);
        assert!(!report.finished_early);
        assert_eq!(port.writes()[0], Frame::encode_line(LINE_A).unwrap().as_bytes().to_vec());
    }

    #[test]
    fn test_nak_then_ack_resends_same_frame() {
        let mut port = ScriptedPort::new().reply(b"CHK\n").reply(b"ERR\n").reply(b"PRG\n");
        let report = run(&mut port, &[LINE_A], &fast()).unwrap();

        assert_eq!(report.attempts_used, 3);
        assert_eq!(port.writes().len(), 3);
        assert!(port.writes().windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_budget_exhausted() {
        let mut port = ScriptedPort::new();
        let err = run(&mut port, &[LINE_A], &fast().with_max_attempts(3)).unwrap_err();

        assert!(matches!(err, Error::LineTransferFailed { index: 0, attempts: 3 }));
        assert_eq!(port.writes().len(), 3);
    }

    #[test]
    fn test_done_ends_session() {
        let mut port = ScriptedPort::new().reply(b"PRG\n").reply(b"DNE\n");
        let report = run(&mut port, &[LINE_A, LINE_EOF, LINE_A], &fast()).unwrap();

        assert_eq!(report.lines_acked, 2);
        assert!(report.finished_early);
        assert_eq!(port.writes().len(), 2);
    }

    #[test]
    fn test_done_queued_behind_ack_counts_only_written_lines() {
        let mut port = ScriptedPort::new().reply(b"PRG\nDNE\n");
        let mut reader = TokenReader::new();
        let mut events = Vec::new();
        let config = fast();
        let session = TransferSession::new([LINE_A, LINE_EOF, LINE_A], "RESET");

        let report = TransferEngine::new(&mut port, &mut reader, &config)
            .run(session, &mut |e: &ProgressEvent| events.push(*e))
            .unwrap();

        assert_eq!(report.lines_total, 3);
        assert_eq!(report.lines_acked, 1);
        assert_eq!(report.attempts_used, 1);
        assert!(report.finished_early);
        assert_eq!(port.writes().len(), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line_index, 0);
    }

    #[test]
    fn test_done_after_nak_counts_written_line() {
        // The line's frame is on the wire, so a DNE drained before the resend finishes it.
        let mut port = ScriptedPort::new().reply(b"CHK\nDNE\n");
        let report = run(&mut port, &[LINE_A, LINE_EOF], &fast()).unwrap();

        assert_eq!(report.lines_acked, 1);
        assert_eq!(report.attempts_used, 1);
        assert!(report.finished_early);
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn test_ready_and_noise_are_ignored() {
        let mut port = ScriptedPort::new().reply(b"|Bridge log\nRDY\n<Received (3 bytes): PRG\n");
        let report = run(&mut port, &[LINE_A], &fast()).unwrap();
        assert_eq!(report.attempts_used, 1);
    }

    #[test]
    fn test_stale_ack_is_discarded() {
        // Late PRG for line 0 arrives together with the real one.
        let mut port = ScriptedPort::new().reply(b"PRG\nPRG\n").reply(b"PRG\n");
        let report = run(&mut port, &[LINE_A, LINE_EOF], &fast()).unwrap();

        assert_eq!(report.attempts_used, 2);
        assert_eq!(port.writes().len(), 2);
    }

    #[test]
    fn test_invalid_line_stops_before_write() {
        let mut port = ScriptedPort::new().reply(b"PRG\n");
        let err = run(&mut port, &[LINE_A, "10000000"], &fast()).unwrap_err();

        match err {
            Error::LineRejected { index, reason } => {
                assert_eq!(index, 1);
                assert_eq!(reason.kind, ParseErrorKind::MalformedLine);
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn test_unverified_line_left_to_bootloader() {
        let bad_checksum = ":10000000214501368C1245F00001081000000000D1";

        let mut port = ScriptedPort::new();
        let err = run(&mut port, &[bad_checksum], &fast()).unwrap_err();
        assert!(matches!(err, Error::LineRejected { index: 0, .. }));
        assert!(port.writes().is_empty());

        let mut port = ScriptedPort::new().reply(b"PRG\n");
        let report = run(&mut port, &[bad_checksum], &fast().with_verify_records(false)).unwrap();
        assert_eq!(report.lines_acked, 1);
    }

    #[test]
    fn test_progress_once_per_attempt() {
        let mut port = ScriptedPort::new().reply(b"CHK\n").reply(b"PRG\n").reply(b"PRG\n");
        let mut reader = TokenReader::new();
        let mut events = Vec::new();
        let config = fast();
        let session = TransferSession::new([LINE_A, LINE_EOF], "RESET");

        TransferEngine::new(&mut port, &mut reader, &config)
            .run(session, &mut |e: &ProgressEvent| events.push(*e))
            .unwrap();

        let seen: Vec<(usize, u32)> = events.iter().map(|e| (e.line_index, e.attempt)).collect();
        assert_eq!(seen, vec![(0, 1), (0, 2), (1, 1)]);
        assert!(events.iter().all(|e| e.total_lines == 2 && e.max_attempts == 6));
        assert!((events[2].fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_session() {
        let mut port = ScriptedPort::new();
        let report = run(&mut port, &[], &fast()).unwrap();
        assert_eq!(report.lines_total, 0);
        assert_eq!(report.attempts_used, 0);
        assert!(port.writes().is_empty());
    }
}
