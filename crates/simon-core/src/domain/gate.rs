//! The single-flight gate around hardware transactions.
//!
//! There is one physical device and it can only play one pattern at a time,
//! so the gate is global rather than per-key: while any transaction is in
//! flight, every registered keystroke is suppressed.
//!
//! The hook thread reads the gate on every keystroke and a transaction task
//! releases it once, so the state is a single atomic word. Acquisition hands
//! out a [`GateGuard`]; dropping the guard releases the gate. Because the
//! guard lives inside the transaction task, the gate is released on every exit
//! path of that task: normal completion, early return, cancellation (the
//! future is dropped) and panics (tokio drops the future while unwinding).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::keymap::KeyCode;

/// Sentinel stored in the atomic while no transaction is in flight.
const IDLE: u32 = u32::MAX;

/// Observable state of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    /// A transaction triggered by this key is in flight.
    Busy(KeyCode),
}

impl GateState {
    pub fn is_idle(self) -> bool {
        matches!(self, GateState::Idle)
    }
}

/// Global single-flight lock.
#[derive(Debug)]
pub struct Gate {
    owner: AtomicU32,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Self {
            owner: AtomicU32::new(IDLE),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> GateState {
        match self.owner.load(Ordering::Acquire) {
            IDLE => GateState::Idle,
            vk => GateState::Busy(KeyCode(vk as u16)),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state() == GateState::Idle
    }

    /// Moves the gate from Idle to Busy(`key`).
    ///
    /// # Errors
    ///
    /// Returns the current [`GateState`] if another transaction already holds the gate.
    pub fn try_acquire(self: &Arc<Self>, key: KeyCode) -> Result<GateGuard, GateState> {
        match self.owner.compare_exchange(
            IDLE,
            u32::from(key.0),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(GateGuard {
                gate: Arc::clone(self),
                key,
            }),
            Err(vk) => Err(GateState::Busy(KeyCode(vk as u16))),
        }
    }
}

/// Proof of gate ownership. Releases the gate when dropped.
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<Gate>,
    key: KeyCode,
}

impl GateGuard {
    /// The key whose transaction holds the gate.
    pub fn key(&self) -> KeyCode {
        self.key
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.owner.store(IDLE, Ordering::Release);
        debug!(key = %self.key, "gate released");
    }
}
