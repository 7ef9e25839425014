//! Scripted in-memory port.
//!
//! Each write pops the next scripted reply and queues its bytes for reading,
//! which is how the bridge behaves: one frame out, at most one response back.
//! Every write is recorded so tests can check exactly what went on the wire.

use crate::error::Result;
use crate::port::Port;
use std::collections::VecDeque;
use std::io::{Read, Write};

/// In-memory port with canned replies.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    replies: VecDeque<Option<Vec<u8>>>,
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    chunk: Option<usize>,
    closed: bool,
}

impl ScriptedPort {
    /// Create a port with no scripted replies (every write goes unanswered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unanswered write.
    #[must_use]
    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(Some(bytes.to_vec()));
        self
    }

    /// Leave the next write unanswered.
    #[must_use]
    pub fn silence(mut self) -> Self {
        self.replies.push_back(None);
        self
    }

    /// Make bytes readable before any write.
    #[must_use]
    pub fn preload(mut self, bytes: &[u8]) -> Self {
        self.rx.extend(bytes);
        self
    }

    /// Deliver at most `n` bytes per read, to exercise partial lines.
    #[must_use]
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk = Some(n.max(1));
        self
    }

    /// Every buffer written so far, one entry per write call.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.rx.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let limit = self.chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(self.rx.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"));
        }
        self.writes.push(buf.to_vec());
        if let Some(Some(reply)) = self.replies.pop_front() {
            self.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn name(&self) -> &str {
        "scripted"
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self
            .chunk
            .map_or(self.rx.len(), |n| n.min(self.rx.len())))
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
