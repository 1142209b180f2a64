//! Scripted serial port for unit testing.
//!
//! [`MockSerialPort`] stands in for a real COM port: tests queue the chunks
//! the "device" will answer with, then inspect every byte the code wrote.
//! Each queued chunk is delivered by one `read` call; an empty queue behaves
//! like a driver read timeout.
//!
//! `queue_response` puts bytes in the input buffer right away, where a
//! `clear_input` discards them. `queue_reply` holds a chunk back until the
//! next write, the way a device answers a command.
//!
//! Failure injection:
//!
//! - `set_short_write(Some(n))` makes every write accept only `n` bytes.
//! - `set_fail_reads(true)` / `set_fail_writes(true)` return hard I/O errors.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::transport::{ByteStream, LineSettings, PortOpener, TransportError};

#[derive(Default)]
struct PortState {
    responses: VecDeque<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    short_write: Option<usize>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory byte stream. Clones share state.
#[derive(Clone, Default)]
pub struct MockSerialPort {
    state: Arc<Mutex<PortState>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one chunk for a future read.
    pub fn queue_response(&self, text: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(text.as_bytes().to_vec());
    }

    /// Queues one chunk that becomes readable after the next write.
    pub fn queue_reply(&self, text: &str) {
        self.state
            .lock()
            .unwrap()
            .replies
            .push_back(text.as_bytes().to_vec());
    }

    /// Chunks in the input buffer that have not been read.
    pub fn pending_input(&self) -> usize {
        self.state.lock().unwrap().responses.len()
    }

    /// Everything written so far, decoded lossily.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().written).into_owned()
    }

    /// Written data split into CRLF-terminated lines, terminators removed.
    pub fn written_lines(&self) -> Vec<String> {
        self.written_text()
            .split_terminator("\r\n")
            .map(str::to_string)
            .collect()
    }

    pub fn set_short_write(&self, accept: Option<usize>) {
        self.state.lock().unwrap().short_write = accept;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

impl Read for MockSerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
        }
        let Some(mut chunk) = state.responses.pop_front() else {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.responses.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

impl Write for MockSerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        let n = state.short_write.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        if let Some(reply) = state.replies.pop_front() {
            state.responses.push_back(reply);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for MockSerialPort {
    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().responses.clear();
        Ok(())
    }
}

/// [`PortOpener`] that hands out clones of one [`MockSerialPort`].
pub struct MockPortOpener {
    port: MockSerialPort,
    unavailable: bool,
    opens: AtomicUsize,
}

impl MockPortOpener {
    pub fn new(port: MockSerialPort) -> Self {
        Self {
            port,
            unavailable: false,
            opens: AtomicUsize::new(0),
        }
    }

    /// An opener for a port that does not exist.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(MockSerialPort::new())
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PortOpener for MockPortOpener {
    fn open(
        &self,
        endpoint: &str,
        _settings: &LineSettings,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        if self.unavailable {
            return Err(TransportError::EndpointUnavailable {
                endpoint: endpoint.to_string(),
                reason: "mock port does not exist".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.port.clone()))
    }
}
