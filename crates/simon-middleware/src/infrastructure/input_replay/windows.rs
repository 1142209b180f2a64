//! Windows key replay via the SendInput API.
//!
//! Each replay injects a key-down and a key-up in one `SendInput` call so no
//! physical keystroke can land between them.

#![cfg(target_os = "windows")]

use simon_core::KeyCode;
use tracing::debug;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY,
    KEYEVENTF_KEYUP, VIRTUAL_KEY,
};

use super::{KeyReplayer, ReplayError};
use crate::infrastructure::input_capture::INJECTION_TAG;

/// Extended keys need `KEYEVENTF_EXTENDEDKEY` or Windows maps them to the numpad.
const EXTENDED_VKS: &[u16] = &[
    0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, // nav
    0x2D, 0x2E, // Insert, Delete
    0x5B, 0x5C, // Win keys
    0xA3, 0xA5, // Right Ctrl, Right Alt
];

/// [`KeyReplayer`] backed by `SendInput`.
pub struct SendInputReplayer;

impl SendInputReplayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendInputReplayer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyReplayer for SendInputReplayer {
    fn replay(&self, key: KeyCode) -> Result<(), ReplayError> {
        let inputs = [keyboard_input(key, false), keyboard_input(key, true)];
        // SAFETY: inputs is a valid array of INPUT structures on the stack and
        // cbsize is the size of one element, as SendInput requires.
        let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(ReplayError::Platform(format!(
                "SendInput injected {sent} of {} events (blocked by UIPI?)",
                inputs.len()
            )));
        }
        debug!(%key, "replayed key");
        Ok(())
    }
}

fn keyboard_input(key: KeyCode, key_up: bool) -> INPUT {
    let mut flags = KEYBD_EVENT_FLAGS(0);
    if key_up {
        flags |= KEYEVENTF_KEYUP;
    }
    if EXTENDED_VKS.contains(&key.0) {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(key.0),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: INJECTION_TAG,
            },
        },
    }
}
