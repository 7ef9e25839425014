//! Interruption runs in its own test binary: the checker is process-global.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use waveboot::{Error, HandshakeController, ScriptedPort, TokenReader};

#[test]
fn test_interrupt_stops_handshake_wait() {
    let flag = Arc::new(AtomicBool::new(false));
    let checker = Arc::clone(&flag);
    waveboot::set_interrupt_checker(move || checker.load(Ordering::Relaxed));
    assert!(!waveboot::is_interrupted_requested());

    flag.store(true, Ordering::Relaxed);
    assert!(waveboot::is_interrupted_requested());

    let mut port = ScriptedPort::new();
    let mut reader = TokenReader::new();
    let mut hs = HandshakeController::new().with_settle_delay(Duration::ZERO);

    let start = Instant::now();
    let err = hs
        .perform(&mut port, &mut reader, "RESET", Duration::from_secs(10))
        .unwrap_err();

    assert!(matches!(err, Error::Interrupted));
    assert!(start.elapsed() < Duration::from_secs(1));
}
