//! Session: lifecycle owner for one hook, one device and one engine.
//!
//! ```text
//! Session::new()            Created
//!  └─ initialize()          open serial port, install hook      → Initialized
//!  └─ register_key() ...    populate the registry (setup only)
//!  └─ set_callbacks()       bind the hardware link
//!  └─ run(shutdown)         serve keystrokes until `shutdown` resolves → Running
//!  └─ shutdown()            uninstall hook, drain/cancel, close port  → ShutDown
//! ```
//!
//! Setup failures never leak resources: if the hook cannot be installed the
//! port opened a moment earlier is closed again before the error returns.
//! Dropping a session that was not shut down performs the same teardown
//! without waiting.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use simon_core::{BindingError, Challenge, Codec, KeyCode, KeyRegistry, ProtocolError, Verdict};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::application::hardware_link::{FnLink, HardwareLink, LinkError};
use crate::application::intercept::{EngineSettings, InterceptEngine, ShutdownOutcome};
use crate::infrastructure::input_capture::{CaptureError, KeyEventHandler, KeyboardHook};
use crate::infrastructure::input_replay::KeyReplayer;
use crate::infrastructure::serial::{SerialDevice, TransportError};

/// Lifecycle phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Initialized,
    Running,
    ShutDown,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::Created => "created",
            SessionPhase::Initialized => "initialized",
            SessionPhase::Running => "running",
            SessionPhase::ShutDown => "shut down",
        })
    }
}

/// Error taxonomy surfaced to the host.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No hardware link has been bound.
    #[error("no hardware link bound; call set_callbacks first")]
    NullHandle,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("serial port unavailable: {0}")]
    PortUnavailable(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("keyboard hook installation failed: {0}")]
    HookInstallFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{operation} is not allowed while the session is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::EndpointUnavailable { .. } => SessionError::PortUnavailable(err.to_string()),
            other => SessionError::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::HookInstallFailed(err.to_string())
    }
}

impl From<BindingError> for SessionError {
    fn from(err: BindingError) -> Self {
        SessionError::InvalidParameter(err.to_string())
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        SessionError::InvalidParameter(err.to_string())
    }
}

/// Timing for a session: engine settings plus the shutdown grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub engine: EngineSettings,
    pub shutdown_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            shutdown_grace: Duration::from_millis(1000),
        }
    }
}

/// Owns the keyboard hook, the serial device and the interception engine.
pub struct Session {
    phase: SessionPhase,
    device: Arc<SerialDevice>,
    hook: Box<dyn KeyboardHook>,
    engine: Arc<InterceptEngine>,
    shutdown_grace: Duration,
}

impl Session {
    /// Creates a session. Nothing is opened or installed yet.
    ///
    /// `runtime` is where transactions run; the hook thread is not a tokio
    /// thread.
    pub fn new(
        device: Arc<SerialDevice>,
        hook: Box<dyn KeyboardHook>,
        replayer: Arc<dyn KeyReplayer>,
        settings: SessionSettings,
        runtime: Handle,
    ) -> Self {
        let engine = InterceptEngine::new(
            Arc::new(KeyRegistry::new()),
            replayer,
            settings.engine,
            runtime,
        );
        Self {
            phase: SessionPhase::Created,
            device,
            hook,
            engine: Arc::new(engine),
            shutdown_grace: settings.shutdown_grace,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn engine(&self) -> &Arc<InterceptEngine> {
        &self.engine
    }

    pub fn device(&self) -> &Arc<SerialDevice> {
        &self.device
    }

    fn codec(&self) -> Codec {
        self.device.codec()
    }

    /// Opens the serial port and installs the keyboard hook.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PortUnavailable`] / [`SessionError::ConnectionFailed`]
    ///   if the port cannot be opened.
    /// - [`SessionError::HookInstallFailed`] if the OS refuses the hook; the
    ///   port is closed again first.
    /// - [`SessionError::InvalidState`] unless the session is freshly created.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        self.expect_phase("initialize", &[SessionPhase::Created])?;

        self.device.connect()?;

        let handler: Arc<dyn KeyEventHandler> = Arc::clone(&self.engine) as Arc<dyn KeyEventHandler>;
        if let Err(e) = self.hook.install(handler) {
            error!("keyboard hook installation failed: {e}");
            self.device.disconnect();
            return Err(e.into());
        }

        self.phase = SessionPhase::Initialized;
        info!(port = %self.device.endpoint(), mode = %self.codec().mode(), "session initialized");
        Ok(())
    }

    /// Binds `key` to `challenge`, replacing any earlier binding for it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidParameter`] for a zero length, an empty
    ///   pattern, or a length challenge while the device speaks the pattern
    ///   dialect.
    /// - [`SessionError::InvalidState`] once the session is running.
    pub fn register_key(&self, key: KeyCode, challenge: Challenge) -> Result<(), SessionError> {
        self.expect_phase(
            "register_key",
            &[SessionPhase::Created, SessionPhase::Initialized],
        )?;
        let codec = self.codec();
        if !codec.supports(&challenge) {
            return Err(SessionError::InvalidParameter(format!(
                "key {key}: {} firmware needs a pattern, not a length",
                codec.mode()
            )));
        }
        self.engine.registry().register(key, challenge)?;
        Ok(())
    }

    /// Binds `key` to a length challenge given as a raw host integer.
    ///
    /// `target <= 0` is rejected with [`SessionError::InvalidParameter`].
    pub fn register_key_length(&self, key: KeyCode, target: i64) -> Result<(), SessionError> {
        self.register_key(key, Challenge::length(target)?)
    }

    /// Installs the send/receive capability used by every transaction.
    pub fn set_callbacks(&self, link: Arc<dyn HardwareLink>) {
        self.engine.set_link(link);
    }

    /// Installs send/receive capabilities given as async closures.
    pub fn set_callback_fns<S, SF, R, RF>(&self, send_fn: S, receive_fn: R)
    where
        S: Fn(Challenge) -> SF + Send + Sync + 'static,
        SF: Future<Output = Result<(), LinkError>> + Send + 'static,
        R: Fn(Duration) -> RF + Send + Sync + 'static,
        RF: Future<Output = Result<Verdict, LinkError>> + Send + 'static,
    {
        self.set_callbacks(Arc::new(FnLink::new(send_fn, receive_fn)));
    }

    /// Serves keystrokes until `shutdown` resolves, then tears down.
    ///
    /// Keystrokes are handled on the hook thread; this future only waits.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NullHandle`] if no hardware link is bound.
    /// - [`SessionError::InvalidState`] unless the session is initialized.
    /// - Any error from [`Session::shutdown`].
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        self.expect_phase("run", &[SessionPhase::Initialized])?;
        if !self.engine.has_link() {
            return Err(SessionError::NullHandle);
        }
        if self.engine.registry().is_empty() {
            warn!("no keys registered; every keystroke will pass through");
        }

        self.phase = SessionPhase::Running;
        info!(keys = self.engine.registry().len(), "intercepting keystrokes");
        shutdown.await;
        info!("shutdown requested");
        self.shutdown().await
    }

    /// Uninstalls the hook, settles the in-flight transaction and closes the port.
    ///
    /// Idempotent. Teardown always completes; the result reports how the
    /// in-flight transaction ended.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Timeout`] if a transaction had to be cancelled.
    /// - [`SessionError::Unknown`] if the transaction task panicked.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::ShutDown {
            return Ok(());
        }
        self.phase = SessionPhase::ShutDown;

        self.hook.uninstall();
        let outcome = self.engine.shutdown(self.shutdown_grace).await;
        // A cancelled read may still hold the port for one poll step.
        let device = Arc::clone(&self.device);
        if let Err(e) = tokio::task::spawn_blocking(move || device.disconnect()).await {
            warn!("closing the serial port failed: {e}");
        }
        info!("session shut down");

        match outcome {
            ShutdownOutcome::Idle | ShutdownOutcome::Completed(_) => Ok(()),
            ShutdownOutcome::Cancelled => Err(SessionError::Timeout(format!(
                "in-flight transaction cancelled after {} ms",
                self.shutdown_grace.as_millis()
            ))),
            ShutdownOutcome::Panicked(reason) => Err(SessionError::Unknown(reason)),
        }
    }

    fn expect_phase(
        &self,
        operation: &'static str,
        allowed: &[SessionPhase],
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                phase: self.phase,
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.phase != SessionPhase::ShutDown {
            self.hook.uninstall();
            self.engine.abort();
            self.device.disconnect();
        }
    }
}
