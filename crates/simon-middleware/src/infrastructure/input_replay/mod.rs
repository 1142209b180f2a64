//! Key replay: re-emits a held keystroke once its challenge is passed.
//!
//! Replayed keystrokes are tagged with
//! [`INJECTION_TAG`](crate::infrastructure::input_capture::INJECTION_TAG) so
//! the capture hook forwards them instead of intercepting them again.
//!
//! The correct implementation is selected at compile time via `#[cfg(target_os = ...)]`.

use simon_core::KeyCode;
use thiserror::Error;

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

/// Error type for key replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("platform error: {0}")]
    Platform(String),
    #[error("key replay is not supported on {0}")]
    Unsupported(String),
}

/// Synthesizes a full press (key-down then key-up) of a key.
pub trait KeyReplayer: Send + Sync {
    fn replay(&self, key: KeyCode) -> Result<(), ReplayError>;
}

/// Returns the key replayer for the current platform.
///
/// # Errors
///
/// Returns [`ReplayError::Unsupported`] where keystrokes cannot be injected.
pub fn platform_replayer() -> Result<Box<dyn KeyReplayer>, ReplayError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::SendInputReplayer::new()))
    }

    #[cfg(not(target_os = "windows"))]
    {
        Err(ReplayError::Unsupported(std::env::consts::OS.to_string()))
    }
}
