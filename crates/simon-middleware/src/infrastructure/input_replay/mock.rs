//! Mock key replayer for unit testing.
//!
//! Records every replayed key in a `Mutex<Vec<KeyCode>>` instead of calling
//! `SendInput`, so tests can assert exactly which keys were released.
//!
//! # `should_fail` flag
//!
//! Set `should_fail = true` to simulate an OS refusal and exercise the
//! caller's error path.

use std::sync::Mutex;

use simon_core::KeyCode;

use super::{KeyReplayer, ReplayError};

#[derive(Default)]
pub struct MockKeyReplayer {
    /// Keys passed to `replay`, in call order.
    pub replayed: Mutex<Vec<KeyCode>>,
    /// When `true`, `replay` returns `ReplayError::Platform` and records nothing.
    pub should_fail: bool,
}

impl MockKeyReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn replayed(&self) -> Vec<KeyCode> {
        self.replayed.lock().unwrap().clone()
    }
}

impl KeyReplayer for MockKeyReplayer {
    fn replay(&self, key: KeyCode) -> Result<(), ReplayError> {
        if self.should_fail {
            return Err(ReplayError::Platform("mock failure".into()));
        }
        self.replayed.lock().unwrap().push(key);
        Ok(())
    }
}
