//! InterceptEngine: decides the fate of every keystroke and runs transactions.
//!
//! This is the heart of the middleware. The keyboard hook calls
//! [`InterceptEngine::on_key_event`] synchronously for every keystroke, and
//! the engine answers forward or suppress before the hook returns. When a
//! registered key arrives while the gate is idle, the engine takes the gate
//! and spawns a transaction on the tokio runtime: send the key's challenge,
//! wait (bounded) for a verdict, replay the key on success, release the gate.
//!
//! # State machine
//!
//! | Gate | Event | Action |
//! |---|---|---|
//! | any | key-up, self-injected, or unregistered key | forward |
//! | Idle | registered key-down | suppress, spawn transaction, gate → Busy |
//! | Busy | registered key-down | suppress, drop it (no queue) |
//! | Busy | transaction completes | replay on success, gate → Idle |
//!
//! # Gate release
//!
//! The spawned task owns the [`GateGuard`]. The gate is released when the
//! guard drops, which covers normal completion, every error path, a panic
//! inside the task, and cancellation via [`InterceptEngine::shutdown`]. The
//! receive step is wrapped in a hard timeout so a device that never answers
//! cannot hold the gate.
//!
//! # Architecture
//!
//! The engine depends only on traits ([`HardwareLink`], [`KeyReplayer`]) and
//! simon-core types, so it is tested end to end without a serial port or an
//! OS hook.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use simon_core::{Challenge, Gate, GateGuard, GateState, KeyBinding, KeyCode, KeyRegistry, Verdict};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::hardware_link::HardwareLink;
use crate::infrastructure::input_capture::{HookDecision, KeyEventHandler, KeyEventKind, RawKeyEvent};
use crate::infrastructure::input_replay::KeyReplayer;

/// Extra time allowed past `verify_timeout` before a receive is abandoned.
pub const DEFAULT_RECEIVE_GRACE: Duration = Duration::from_millis(250);

/// Timing and replay policy for transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Time the device has to report a verdict, settle delay included.
    pub verify_timeout: Duration,
    /// Hard bound on the send step.
    pub send_timeout: Duration,
    /// Slack on top of `verify_timeout` before the receive call is cancelled.
    pub receive_grace: Duration,
    /// Pause between sending the challenge and asking for the verdict.
    pub settle_delay: Duration,
    /// Re-emit the held key after a successful transaction.
    pub replay_on_success: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_millis(5000),
            send_timeout: Duration::from_millis(2000),
            receive_grace: DEFAULT_RECEIVE_GRACE,
            settle_delay: Duration::ZERO,
            replay_on_success: true,
        }
    }
}

impl EngineSettings {
    /// Upper bound on settle plus receive, after which the gate is released.
    pub fn receive_bound(&self) -> Duration {
        self.verify_timeout + self.receive_grace
    }
}

/// Outcome of one finished transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub id: Uuid,
    pub key: KeyCode,
    pub verdict: Verdict,
    /// `true` if the key was re-emitted.
    pub replayed: bool,
    pub elapsed: Duration,
}

/// What happened to the in-flight transaction at shutdown.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// Nothing was in flight.
    Idle,
    /// The transaction finished within the grace period.
    Completed(TransactionReport),
    /// The grace period ran out and the transaction was aborted.
    Cancelled,
    /// The transaction task panicked.
    Panicked(String),
}

/// Keystroke arbiter and transaction runner.
pub struct InterceptEngine {
    registry: Arc<KeyRegistry>,
    gate: Arc<Gate>,
    link: RwLock<Option<Arc<dyn HardwareLink>>>,
    replayer: Arc<dyn KeyReplayer>,
    runtime: Handle,
    settings: EngineSettings,
    inflight: Mutex<Option<JoinHandle<TransactionReport>>>,
}

impl InterceptEngine {
    /// Creates an engine that spawns transactions on `runtime`.
    ///
    /// `runtime` must outlive the engine; the hook thread is not a tokio
    /// thread, so the handle is captured up front.
    pub fn new(
        registry: Arc<KeyRegistry>,
        replayer: Arc<dyn KeyReplayer>,
        settings: EngineSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            gate: Arc::new(Gate::new()),
            link: RwLock::new(None),
            replayer,
            runtime,
            settings,
            inflight: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Installs the hardware capability used by subsequent transactions.
    pub fn set_link(&self, link: Arc<dyn HardwareLink>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
    }

    pub fn has_link(&self) -> bool {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_link(&self) -> Option<Arc<dyn HardwareLink>> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin(&self, binding: Arc<KeyBinding>, guard: GateGuard) {
        let task = run_transaction(
            guard,
            binding,
            self.current_link(),
            Arc::clone(&self.replayer),
            self.settings.clone(),
        );
        let handle = self.runtime.spawn(task);
        *self.inflight.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn take_inflight(&self) -> Option<JoinHandle<TransactionReport>> {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Waits for the most recent transaction, if any, and returns its report.
    ///
    /// Returns `None` if nothing was in flight or the task panicked.
    pub async fn drain(&self) -> Option<TransactionReport> {
        let handle = self.take_inflight()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("transaction task failed: {e}");
                None
            }
        }
    }

    /// Gives the in-flight transaction `grace` to finish, then aborts it.
    ///
    /// The gate is idle when this returns.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        let Some(mut handle) = self.take_inflight() else {
            return ShutdownOutcome::Idle;
        };
        match timeout(grace, &mut handle).await {
            Ok(Ok(report)) => ShutdownOutcome::Completed(report),
            Ok(Err(e)) if e.is_panic() => ShutdownOutcome::Panicked(e.to_string()),
            Ok(Err(_)) => ShutdownOutcome::Cancelled,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "cancelling in-flight transaction");
                handle.abort();
                // Wait for the abort so the guard has dropped before we return.
                let _ = handle.await;
                ShutdownOutcome::Cancelled
            }
        }
    }

    /// Aborts the in-flight transaction without waiting.
    pub fn abort(&self) {
        if let Some(handle) = self.take_inflight() {
            handle.abort();
        }
    }
}

impl KeyEventHandler for InterceptEngine {
    fn on_key_event(&self, event: RawKeyEvent) -> HookDecision {
        if event.self_injected || event.kind == KeyEventKind::Up {
            return HookDecision::Forward;
        }
        let Some(binding) = self.registry.lookup(event.key) else {
            return HookDecision::Forward;
        };

        match self.gate.try_acquire(event.key) {
            Ok(guard) => {
                debug!(key = %event.key, "gate acquired");
                self.begin(binding, guard);
            }
            Err(GateState::Busy(owner)) => {
                debug!(key = %event.key, %owner, "gate busy; keystroke dropped");
            }
            Err(GateState::Idle) => {
                // Lost a race with a release; dropping is still correct.
                debug!(key = %event.key, "gate contended; keystroke dropped");
            }
        }
        HookDecision::Suppress
    }
}

// ── Transaction ───────────────────────────────────────────────────────────────

async fn run_transaction(
    guard: GateGuard,
    binding: Arc<KeyBinding>,
    link: Option<Arc<dyn HardwareLink>>,
    replayer: Arc<dyn KeyReplayer>,
    settings: EngineSettings,
) -> TransactionReport {
    let id = Uuid::new_v4();
    let key = binding.key;
    let span = info_span!("transaction", %id, %key);

    async move {
        let started = Instant::now();
        info!(complexity = binding.challenge.complexity(), "challenge started");

        let verdict = match link {
            Some(link) => exchange(link.as_ref(), &binding.challenge, &settings).await,
            None => {
                warn!("no hardware link registered");
                Verdict::Indeterminate
            }
        };

        let replayed = verdict.is_success()
            && settings.replay_on_success
            && match replayer.replay(key) {
                Ok(()) => true,
                Err(e) => {
                    warn!("replay failed: {e}");
                    false
                }
            };

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if verdict.is_success() {
            info!(%verdict, replayed, elapsed_ms, "challenge passed");
        } else {
            warn!(%verdict, elapsed_ms, "challenge not passed; keystroke withheld");
        }

        drop(guard);
        TransactionReport {
            id,
            key,
            verdict,
            replayed,
            elapsed,
        }
    }
    .instrument(span)
    .await
}

/// Sends the challenge and collects a verdict. Every failure is Indeterminate.
async fn exchange(link: &dyn HardwareLink, challenge: &Challenge, settings: &EngineSettings) -> Verdict {
    match timeout(settings.send_timeout, link.send(challenge)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("send failed: {e}");
            return Verdict::Indeterminate;
        }
        Err(_) => {
            warn!(timeout_ms = settings.send_timeout.as_millis() as u64, "send timed out");
            return Verdict::Indeterminate;
        }
    }

    let read_timeout = settings.verify_timeout.saturating_sub(settings.settle_delay);
    let settle_then_receive = async {
        if !settings.settle_delay.is_zero() {
            tokio::time::sleep(settings.settle_delay).await;
        }
        link.receive(read_timeout).await
    };

    match timeout(settings.receive_bound(), settle_then_receive).await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            warn!("receive failed: {e}");
            Verdict::Indeterminate
        }
        Err(_) => {
            warn!(
                timeout_ms = settings.receive_bound().as_millis() as u64,
                "device did not answer in time"
            );
            Verdict::Indeterminate
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
