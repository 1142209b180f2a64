//! Mock keyboard hook for unit testing.
//!
//! Allows tests to push synthetic [`RawKeyEvent`]s through the installed
//! handler and observe the [`HookDecision`] a real hook would have applied,
//! without a Win32 message loop.

use std::sync::{Arc, Mutex};

use simon_core::KeyCode;

use super::{CaptureError, HookDecision, KeyEventHandler, KeyboardHook, RawKeyEvent};

#[derive(Default)]
struct MockHookState {
    handler: Option<Arc<dyn KeyEventHandler>>,
    install_calls: u32,
    uninstall_calls: u32,
    forwarded: Vec<RawKeyEvent>,
    suppressed: Vec<RawKeyEvent>,
}

/// A mock implementation of [`KeyboardHook`] that lets tests inject keystrokes.
///
/// Clones share state, so a test can keep one handle after moving another
/// into the session.
#[derive(Clone, Default)]
pub struct MockKeyboardHook {
    state: Arc<Mutex<MockHookState>>,
    /// When `true`, `install` fails as if the OS refused the hook.
    pub fail_install: bool,
}

impl MockKeyboardHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook whose installation always fails.
    pub fn failing() -> Self {
        Self {
            fail_install: true,
            ..Self::default()
        }
    }

    /// Delivers `event` to the installed handler and records the outcome.
    ///
    /// An uninstalled hook forwards everything, like the OS would.
    pub fn inject(&self, event: RawKeyEvent) -> HookDecision {
        // Clone the handler out so the handler can run without our lock held.
        let handler = self.state.lock().expect("lock poisoned").handler.clone();
        let decision = match handler {
            Some(h) => h.on_key_event(event),
            None => HookDecision::Forward,
        };
        let mut state = self.state.lock().expect("lock poisoned");
        match decision {
            HookDecision::Forward => state.forwarded.push(event),
            HookDecision::Suppress => state.suppressed.push(event),
        }
        decision
    }

    /// Shorthand for injecting a physical key-down.
    pub fn press(&self, key: KeyCode) -> HookDecision {
        self.inject(RawKeyEvent::key_down(key))
    }

    pub fn forwarded(&self) -> Vec<RawKeyEvent> {
        self.state.lock().expect("lock poisoned").forwarded.clone()
    }

    pub fn suppressed(&self) -> Vec<RawKeyEvent> {
        self.state.lock().expect("lock poisoned").suppressed.clone()
    }

    pub fn install_calls(&self) -> u32 {
        self.state.lock().expect("lock poisoned").install_calls
    }

    pub fn uninstall_calls(&self) -> u32 {
        self.state.lock().expect("lock poisoned").uninstall_calls
    }
}

impl KeyboardHook for MockKeyboardHook {
    fn install(&mut self, handler: Arc<dyn KeyEventHandler>) -> Result<(), CaptureError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.install_calls += 1;
        if self.fail_install {
            return Err(CaptureError::HookInstallFailed("mock refusal".to_string()));
        }
        if state.handler.is_some() {
            return Err(CaptureError::AlreadyInstalled);
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn uninstall(&mut self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.handler.take().is_some() {
            state.uninstall_calls += 1;
        }
    }

    fn is_installed(&self) -> bool {
        self.state.lock().expect("lock poisoned").handler.is_some()
    }
}
