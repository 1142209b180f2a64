//! Serial device handle and its [`HardwareLink`] adapter.
//!
//! [`SerialDevice`] pairs a [`Transport`] with a [`Codec`] and exposes the
//! host-facing device surface: connect, send a command, length or pattern,
//! read a response, verify. [`SerialLink`] lifts it into the async
//! [`HardwareLink`] capability the interception engine calls, running each
//! blocking call on tokio's blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use simon_core::protocol::{decode_verdict, encode_length, encode_pattern, Verdict};
use simon_core::{Challenge, Codec, ProtocolError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::hardware_link::{HardwareLink, LinkError};

pub mod mock;
pub mod transport;

pub use transport::{LineSettings, PortOpener, SerialPortOpener, Transport, TransportError};

/// Errors from [`SerialDevice`] operations that encode before sending.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One physical pattern device on one serial endpoint.
///
/// Calls block; the internal mutex serializes concurrent callers.
pub struct SerialDevice {
    transport: Mutex<Transport>,
    codec: Codec,
}

impl SerialDevice {
    /// Creates a disconnected handle for `endpoint`.
    pub fn create(
        endpoint: impl Into<String>,
        settings: LineSettings,
        opener: Arc<dyn PortOpener>,
        codec: Codec,
    ) -> Self {
        Self {
            transport: Mutex::new(Transport::new(endpoint, settings, opener)),
            codec,
        }
    }

    /// Creates a disconnected handle backed by a real serial port.
    pub fn serial(endpoint: impl Into<String>, settings: LineSettings, codec: Codec) -> Self {
        Self::create(endpoint, settings, Arc::new(SerialPortOpener), codec)
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn endpoint(&self) -> String {
        self.transport().endpoint().to_string()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn connect(&self) -> Result<(), TransportError> {
        self.transport().open()
    }

    /// Closes the port. Returns `false` if it was not open.
    pub fn disconnect(&self) -> bool {
        self.transport().close()
    }

    pub fn is_connected(&self) -> bool {
        self.transport().is_open()
    }

    /// Sends `text` verbatim as one line.
    pub fn send_command(&self, text: &str) -> Result<(), TransportError> {
        self.transport().write_line(text).map(|_| ())
    }

    /// Starts a new challenge: discards unread input, then sends `command`.
    ///
    /// Both steps run under one lock so nothing read in between can be
    /// mistaken for the answer.
    fn begin_challenge(&self, command: &str) -> Result<(), TransportError> {
        let mut transport = self.transport();
        transport.clear_input()?;
        transport.write_line(command).map(|_| ())
    }

    pub fn send_length(&self, n: u32) -> Result<(), DeviceError> {
        let command = encode_length(n)?;
        Ok(self.begin_challenge(&command)?)
    }

    pub fn send_pattern(&self, steps: &[u32]) -> Result<(), DeviceError> {
        Ok(self.begin_challenge(&encode_pattern(steps))?)
    }

    /// Sends `challenge` in the configured dialect, dropping any stale
    /// output from earlier challenges first.
    pub fn send_challenge(&self, challenge: &Challenge) -> Result<(), DeviceError> {
        let command = self.codec.encode_challenge(challenge)?;
        Ok(self.begin_challenge(&command)?)
    }

    /// Reads one raw response, possibly empty if the device stayed silent.
    pub fn receive(&self, timeout: Duration) -> Result<String, TransportError> {
        self.transport().read_until_terminator(timeout)
    }

    /// Asks for and decodes the verdict on the last challenge.
    ///
    /// Pattern firmware is prompted with `CHECK` first; length firmware
    /// reports on its own.
    pub fn read_verdict(&self, timeout: Duration) -> Result<Verdict, TransportError> {
        self.read_verdict_or_cancel(timeout, &AtomicBool::new(false))
    }

    /// [`SerialDevice::read_verdict`] that gives up as soon as `cancel` is
    /// set. A cancelled read decodes whatever arrived, usually nothing.
    pub fn read_verdict_or_cancel(
        &self,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<Verdict, TransportError> {
        let mut transport = self.transport();
        if let Some(request) = self.codec.verify_request() {
            transport.write_line(request)?;
        }
        let raw = transport.read_until_terminator_or_cancel(timeout, cancel)?;
        let verdict = decode_verdict(&raw);
        debug!(response = raw.trim(), %verdict, "device verdict");
        Ok(verdict)
    }

    /// `true` only if the device confirmed success within `timeout`.
    pub fn verify(&self, timeout: Duration) -> bool {
        match self.read_verdict(timeout) {
            Ok(verdict) => verdict.is_success(),
            Err(e) => {
                warn!("verification failed: {e}");
                false
            }
        }
    }
}

/// Read slice used by [`SerialDevice::monitor`] between checks of the stop flag.
const MONITOR_SLICE: Duration = Duration::from_millis(100);

impl SerialDevice {
    /// Reads device output line by line until `stop` is set.
    ///
    /// Each non-empty line is passed to `on_line` with its decoded verdict;
    /// lines reporting failure are also logged.
    pub fn monitor<F>(&self, stop: &AtomicBool, mut on_line: F) -> Result<(), TransportError>
    where
        F: FnMut(&str, Verdict),
    {
        info!(port = %self.endpoint(), "monitoring device output");
        let mut pending = String::new();
        while !stop.load(Ordering::Relaxed) {
            pending.push_str(&self.receive(MONITOR_SLICE)?);
            while let Some(end) = pending.find('\n') {
                let line: String = pending.drain(..=end).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let verdict = decode_verdict(line);
                if verdict == Verdict::Failure {
                    warn!(line, "device reported failure");
                }
                on_line(line, verdict);
            }
        }
        Ok(())
    }
}

/// [`HardwareLink`] over a [`SerialDevice`].
#[derive(Clone)]
pub struct SerialLink {
    device: Arc<SerialDevice>,
}

impl SerialLink {
    pub fn new(device: Arc<SerialDevice>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<SerialDevice> {
        &self.device
    }
}

/// Sets its flag when dropped, stopping the blocking read it belongs to.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn link_error(err: TransportError) -> LinkError {
    match err {
        TransportError::NotConnected => LinkError::NotConnected,
        other => LinkError::Io(other.to_string()),
    }
}

#[async_trait]
impl HardwareLink for SerialLink {
    async fn send(&self, challenge: &Challenge) -> Result<(), LinkError> {
        let device = Arc::clone(&self.device);
        let challenge = challenge.clone();
        tokio::task::spawn_blocking(move || device.send_challenge(&challenge))
            .await
            .map_err(|e| LinkError::Task(e.to_string()))?
            .map_err(|e| match e {
                DeviceError::Transport(t) => link_error(t),
                DeviceError::Protocol(p) => LinkError::Rejected(p.to_string()),
            })
    }

    async fn receive(&self, timeout: Duration) -> Result<Verdict, LinkError> {
        let device = Arc::clone(&self.device);
        let cancel = Arc::new(AtomicBool::new(false));
        // A dropped receive (timeout, abort) must not leave the read holding
        // the port until its own deadline.
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        tokio::task::spawn_blocking(move || device.read_verdict_or_cancel(timeout, &cancel))
            .await
            .map_err(|e| LinkError::Task(e.to_string()))?
            .map_err(link_error)
    }
}
