//! Keyboard capture infrastructure.
//!
//! On Windows, this installs a low-level keyboard hook (`WH_KEYBOARD_LL`) on a
//! dedicated Win32 message-loop thread. Each keystroke is handed to a
//! [`KeyEventHandler`] synchronously, and the handler's [`HookDecision`] is
//! applied before the hook callback returns.
//!
//! # Windows-Specific Implementation
//!
//! Windows commits to "consumed" or "pass through" when the hook callback
//! returns, so the suppress decision cannot be deferred. The callback must also
//! complete within ~300ms or Windows silently removes the hook, so handlers
//! may only do O(1) bookkeeping here and must push any slow work elsewhere.
//!
//! # Testability
//!
//! The [`KeyboardHook`] trait lets tests drive the handler with synthetic
//! events through [`mock::MockKeyboardHook`] without touching OS hooks.

use std::sync::Arc;

use simon_core::KeyCode;

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

/// Marker written to `dwExtraInfo` of keystrokes we inject ourselves.
///
/// The hook reports such events with [`RawKeyEvent::self_injected`] set so a
/// replayed key is never intercepted a second time.
pub const INJECTION_TAG: usize = 0x5349_4D4E; // "SIMN"

/// Direction of a key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// A raw keystroke observed by the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub key: KeyCode,
    pub kind: KeyEventKind,
    /// Hardware scan code.
    pub scan_code: u16,
    /// Milliseconds since system start (from the hook struct).
    pub time_ms: u32,
    /// `true` if the event carries [`INJECTION_TAG`].
    pub self_injected: bool,
}

impl RawKeyEvent {
    /// A physical key-down with no scan code or timestamp, for tests and replays.
    pub fn key_down(key: KeyCode) -> Self {
        Self {
            key,
            kind: KeyEventKind::Down,
            scan_code: 0,
            time_ms: 0,
            self_injected: false,
        }
    }

    pub fn key_up(key: KeyCode) -> Self {
        Self {
            kind: KeyEventKind::Up,
            ..Self::key_down(key)
        }
    }
}

/// What the hook must do with the event it is currently holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    /// Pass the event on to the rest of the input pipeline.
    Forward,
    /// Swallow the event.
    Suppress,
}

/// Receives every keystroke on the hook thread.
///
/// Implementations must not block.
pub trait KeyEventHandler: Send + Sync {
    fn on_key_event(&self, event: RawKeyEvent) -> HookDecision;
}

/// Error type for keyboard capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to install keyboard hook: {0}")]
    HookInstallFailed(String),
    #[error("keyboard hook is already installed")]
    AlreadyInstalled,
    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),
}

/// Trait abstracting the global keyboard hook.
///
/// The production implementation uses `WH_KEYBOARD_LL`; tests use
/// [`mock::MockKeyboardHook`].
pub trait KeyboardHook: Send {
    /// Installs the hook and starts delivering events to `handler`.
    ///
    /// Returns only after the OS has accepted (or refused) the hook.
    fn install(&mut self, handler: Arc<dyn KeyEventHandler>) -> Result<(), CaptureError>;

    /// Removes the hook and stops its thread. Safe to call repeatedly.
    fn uninstall(&mut self);

    fn is_installed(&self) -> bool;
}

/// Returns the keyboard hook for the current platform.
///
/// # Errors
///
/// Returns [`CaptureError::UnsupportedPlatform`] where no global hook exists.
pub fn platform_hook() -> Result<Box<dyn KeyboardHook>, CaptureError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::WindowsKeyboardHook::new()))
    }

    #[cfg(not(target_os = "windows"))]
    {
        Err(CaptureError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ))
    }
}
