//! Point-to-point serial transport.
//!
//! [`Transport`] owns at most one open byte stream to the device. It frames
//! outbound text with CRLF and reads inbound text until a newline or a
//! deadline, whichever comes first. It knows nothing about what the text
//! means; that is the codec's job.
//!
//! All calls block the current thread. Async callers go through
//! `tokio::task::spawn_blocking` (see [`super::SerialLink`]).

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use simon_core::protocol::{LINE_TERMINATOR, RESPONSE_TERMINATOR};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors surfaced by the serial transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The named port does not exist or is held by another process.
    #[error("serial endpoint {endpoint} is unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    /// The port exists but rejected the line settings.
    #[error("failed to configure serial endpoint {endpoint}: {reason}")]
    ConfigurationFailed { endpoint: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Fewer bytes left the port than were handed to it.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// Unread input could not be discarded before a new command.
    #[error("failed to clear input buffer: {0}")]
    ClearFailed(#[source] io::Error),
}

/// Line profile and polling parameters.
///
/// The device firmware expects 115200 baud, 8 data bits, no parity and one
/// stop bit; only the baud rate is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    /// Per-call read/write timeout handed to the OS driver.
    pub io_timeout: Duration,
    /// Sleep between empty reads while waiting for a terminator.
    pub poll_interval: Duration,
    /// Size of the scratch buffer for each read call.
    pub read_chunk: usize,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            io_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            read_chunk: 256,
        }
    }
}

/// An open, bidirectional byte stream.
pub trait ByteStream: Read + Write + Send {
    /// Discards bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// A `serialport` handle behind the [`ByteStream`] seam.
struct SerialStream(Box<dyn serialport::SerialPort>);

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl ByteStream for SerialStream {
    fn clear_input(&mut self) -> io::Result<()> {
        self.0
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.description))
    }
}

/// Opens byte streams by endpoint name.
///
/// Production uses [`SerialPortOpener`]; tests substitute
/// [`super::mock::MockPortOpener`].
pub trait PortOpener: Send + Sync {
    fn open(
        &self,
        endpoint: &str,
        settings: &LineSettings,
    ) -> Result<Box<dyn ByteStream>, TransportError>;
}

/// [`PortOpener`] backed by the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(
        &self,
        endpoint: &str,
        settings: &LineSettings,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let port = serialport::new(endpoint, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.io_timeout)
            .open()
            .map_err(|e| classify_open_error(endpoint, e))?;
        Ok(Box::new(SerialStream(port)))
    }
}

fn classify_open_error(endpoint: &str, err: serialport::Error) -> TransportError {
    use serialport::ErrorKind;

    let endpoint = endpoint.to_string();
    let reason = err.description.clone();
    match err.kind() {
        ErrorKind::NoDevice
        | ErrorKind::Io(io::ErrorKind::NotFound)
        | ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            TransportError::EndpointUnavailable { endpoint, reason }
        }
        _ => TransportError::ConfigurationFailed { endpoint, reason },
    }
}

/// A named endpoint plus the stream opened on it, if any.
pub struct Transport {
    endpoint: String,
    settings: LineSettings,
    opener: Arc<dyn PortOpener>,
    stream: Option<Box<dyn ByteStream>>,
}

impl Transport {
    /// Creates a closed transport for `endpoint` (for example `"COM6"`).
    pub fn new(
        endpoint: impl Into<String>,
        settings: LineSettings,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            settings,
            opener,
            stream: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the endpoint. A no-op if it is already open.
    ///
    /// # Errors
    ///
    /// [`TransportError::EndpointUnavailable`] or
    /// [`TransportError::ConfigurationFailed`], from the opener.
    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.opener.open(&self.endpoint, &self.settings)?;
        self.stream = Some(stream);
        info!(port = %self.endpoint, baud = self.settings.baud_rate, "serial port opened");
        Ok(())
    }

    /// Releases the stream. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        match self.stream.take() {
            Some(_) => {
                info!(port = %self.endpoint, "serial port closed");
                true
            }
            None => false,
        }
    }

    /// Writes `text` followed by CRLF as a single write, then flushes.
    ///
    /// Returns the number of bytes written, terminator included.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] if closed,
    /// [`TransportError::ShortWrite`] if the port accepted only part of the
    /// frame, [`TransportError::WriteFailed`] on an I/O error.
    pub fn write_line(&mut self, text: &str) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let mut frame = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        frame.push_str(text);
        frame.push_str(LINE_TERMINATOR);
        let bytes = frame.as_bytes();

        let written = stream.write(bytes).map_err(TransportError::WriteFailed)?;
        if written != bytes.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        stream.flush().map_err(TransportError::WriteFailed)?;
        debug!(port = %self.endpoint, command = text, "sent");
        Ok(written)
    }

    /// Drops anything the device sent that nobody has read yet.
    ///
    /// Called before each new challenge so a late answer to an earlier one
    /// cannot be taken as the verdict on this one.
    pub fn clear_input(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.clear_input().map_err(TransportError::ClearFailed)?;
        trace!(port = %self.endpoint, "input cleared");
        Ok(())
    }

    /// Reads until a newline arrives or `timeout` elapses.
    ///
    /// Returns everything accumulated, which may be empty or unterminated if
    /// the deadline passed first. Driver timeouts are not errors here.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] if closed,
    /// [`TransportError::ReadFailed`] on any other I/O error.
    pub fn read_until_terminator(&mut self, timeout: Duration) -> Result<String, TransportError> {
        self.read_until_terminator_or_cancel(timeout, &AtomicBool::new(false))
    }

    /// Like [`Transport::read_until_terminator`], but also stops as soon as
    /// `cancel` is set, returning what was read so far.
    pub fn read_until_terminator_or_cancel(
        &mut self,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<String, TransportError> {
        let poll_interval = self.settings.poll_interval;
        let mut chunk = vec![0u8; self.settings.read_chunk.max(1)];
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let deadline = Instant::now() + timeout;
        let mut received: Vec<u8> = Vec::new();

        loop {
            if cancel.load(Ordering::Relaxed) {
                debug!(port = %self.endpoint, "read cancelled");
                break;
            }
            match stream.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    if received.contains(&RESPONSE_TERMINATOR) {
                        break;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(TransportError::ReadFailed(e)),
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(poll_interval);
        }

        let text = String::from_utf8_lossy(&received).into_owned();
        trace!(port = %self.endpoint, bytes = received.len(), "read");
        Ok(text)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
