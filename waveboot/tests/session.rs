//! End-to-end sessions against a scripted bridge.

use std::time::Duration;
use waveboot::{
    Error, Frame, HandshakeController, HexFile, ParseErrorKind, ProgressEvent, Programmer,
    ScriptedPort, TransferConfig,
};

const LINE_A: &str = ":10000000214501368C1245F0000108100000000067";
const LINE_B: &str = ":10001000FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF0";
const LINE_EOF: &str = ":00000001FF";

/// Writes 1 and 2 are reset and boot; the bridge answers the boot with RDY.
fn bridge() -> ScriptedPort {
    ScriptedPort::new().silence().reply(b"RDY\n")
}

fn programmer(port: ScriptedPort, config: TransferConfig) -> Programmer<ScriptedPort> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = config
        .with_attempt_timeout(Duration::from_millis(20))
        .with_handshake_timeout(Duration::from_millis(60))
        .with_poll_interval(Duration::from_millis(1));
    Programmer::new(port)
        .with_handshake(HandshakeController::new().with_settle_delay(Duration::ZERO))
        .with_config(config)
}

fn ignore(_: &ProgressEvent) {}

fn line_frame(line: &str) -> Vec<u8> {
    Frame::encode_line(line).unwrap().as_bytes().to_vec()
}

#[test]
fn test_single_line_first_attempt() {
    let port = bridge().reply(b"PRG\n");
    let mut p = programmer(port, TransferConfig::default());
    let image = HexFile::from_text(LINE_A);

    let report = p.flash("RESET", &image, &mut ignore).unwrap();

    assert_eq!(report.lines_acked, 1);
    assert_eq!(report.attempts_used, 1);

    let writes = p.port().writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(&writes[0][..5], b"RESET");
    assert!(writes[0][5..].iter().all(|&b| b == 0));
    assert_eq!(&writes[1][..4], b"BOOT");
    assert_eq!(writes[2], line_frame(LINE_A));
}

#[test]
fn test_line_with_remote_checksum_only() {
    // The bootloader validates this record itself; local checks are off.
    let line = ":10000000214501368C1245F00001081000000000D1";
    let port = bridge().reply(b"PRG\n");
    let mut p = programmer(port, TransferConfig::default().with_verify_records(false));

    let report = p.flash("RESET", &HexFile::from_text(line), &mut ignore).unwrap();
    assert_eq!(report.lines_acked, 1);
    assert_eq!(report.attempts_used, 1);
}

#[test]
fn test_handshake_timeout_sends_no_line_frames() {
    let mut p = programmer(ScriptedPort::new(), TransferConfig::default());
    let image = HexFile::from_text(LINE_A);

    let err = p.flash("RESET", &image, &mut ignore).unwrap_err();

    assert!(matches!(err, Error::HandshakeTimeout { .. }));
    assert_eq!(p.port().writes().len(), 2);
}

#[test]
fn test_checksum_naks_then_silence() {
    let mut port = bridge();
    for _ in 0..5 {
        port = port.reply(b"CHK\n");
    }
    let mut p = programmer(port.silence(), TransferConfig::default());
    let image = HexFile::from_text(LINE_A);

    let err = p.flash("RESET", &image, &mut ignore).unwrap_err();

    assert!(matches!(err, Error::LineTransferFailed { index: 0, attempts: 6 }));
    let writes = p.port().writes();
    assert_eq!(writes.len(), 8);
    assert!(writes[2..].iter().all(|w| *w == line_frame(LINE_A)));
}

#[test]
fn test_done_on_later_attempt_stops_writing() {
    let port = bridge().reply(b"PRG\n").reply(b"ERR\n").reply(b"DNE\n");
    let mut p = programmer(port, TransferConfig::default());
    let image = HexFile::from_lines([LINE_A, LINE_B, LINE_EOF]);

    let report = p.flash("RESET", &image, &mut ignore).unwrap();

    assert!(report.finished_early);
    assert_eq!(report.lines_acked, 2);
    assert_eq!(report.attempts_used, 3);
    assert_eq!(p.port().writes().len(), 5);
}

#[test]
fn test_all_lines_acked_without_done() {
    let port = bridge().reply(b"PRG\n").reply(b"PRG\n").reply(b"PRG\n");
    let mut p = programmer(port, TransferConfig::default());
    let image = HexFile::from_lines([LINE_A, LINE_B, LINE_EOF]);

    let report = p.flash("RESET", &image, &mut ignore).unwrap();

    assert!(!report.finished_early);
    assert_eq!(report.lines_acked, 3);
    let writes = p.port().writes();
    assert_eq!(writes[2], line_frame(LINE_A));
    assert_eq!(writes[3], line_frame(LINE_B));
    assert_eq!(writes[4], line_frame(LINE_EOF));
}

#[test]
fn test_malformed_line_halts_before_its_frame() {
    let corrupted = ":10001000FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF1";
    let port = bridge().reply(b"PRG\n").reply(b"PRG\n");
    let mut p = programmer(port, TransferConfig::default());
    let image = HexFile::from_lines([LINE_A, corrupted, LINE_EOF]);

    let err = p.flash("RESET", &image, &mut ignore).unwrap_err();

    match err {
        Error::LineRejected { index, reason } => {
            assert_eq!(index, 1);
            assert_eq!(reason.kind, ParseErrorKind::ChecksumMismatch);
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(p.port().writes().len(), 3);
}

#[test]
fn test_fragmented_and_decorated_replies() {
    let port = ScriptedPort::new()
        .silence()
        .reply(b"|Command sent\r\n<Received (3 bytes): RDY\r\n")
        .reply(b"<Received (3 bytes): PRG\r\n")
        .with_chunk_size(3);
    let config = TransferConfig::default().with_attempt_timeout(Duration::from_millis(200));
    let mut p = programmer(port, config);

    let report = p.flash("RESET", &HexFile::from_text(LINE_A), &mut ignore).unwrap();
    assert_eq!(report.attempts_used, 1);
}

#[test]
fn test_progress_reports_every_attempt() {
    let port = bridge().silence().reply(b"CHK\n").reply(b"PRG\n").reply(b"PRG\n");
    let mut p = programmer(port, TransferConfig::default());
    let image = HexFile::from_lines([LINE_A, LINE_EOF]);
    let mut events = Vec::new();

    p.flash("RESET", &image, &mut |e: &ProgressEvent| events.push(*e))
        .unwrap();

    let attempts: Vec<(usize, u32)> = events.iter().map(|e| (e.line_index, e.attempt)).collect();
    assert_eq!(attempts, vec![(0, 1), (0, 2), (0, 3), (1, 1)]);
    assert!(events.windows(2).all(|w| w[0].elapsed <= w[1].elapsed));
}

#[test]
fn test_second_program_needs_new_handshake() {
    let port = bridge().reply(b"DNE\n");
    let mut p = programmer(port, TransferConfig::default());
    let image = HexFile::from_text(LINE_EOF);

    p.flash("RESET", &image, &mut ignore).unwrap();
    let err = p.program(&image, &mut ignore).unwrap_err();
    assert!(matches!(err, Error::NotReady));
}
