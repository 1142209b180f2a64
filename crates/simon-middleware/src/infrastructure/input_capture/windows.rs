//! Windows low-level keyboard hook implementation.
//!
//! Installs `WH_KEYBOARD_LL` on a dedicated Win32 message-loop thread. The
//! handler lives in a thread-local slot on that thread, so the hook callback
//! reaches it without a process-wide static and a second hook instance cannot
//! clobber the first.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::cell::RefCell;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use simon_core::KeyCode;
use tracing::{debug, info, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
    UnhookWindowsHookEx, HC_ACTION, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP,
    WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

use super::{
    CaptureError, HookDecision, KeyEventHandler, KeyEventKind, KeyboardHook, RawKeyEvent,
    INJECTION_TAG,
};

thread_local! {
    /// Handler for the hook installed on this thread. Only the hook thread sets it.
    static HANDLER: RefCell<Option<Arc<dyn KeyEventHandler>>> = const { RefCell::new(None) };
}

/// Running hook: the message-loop thread and its Win32 thread id.
struct HookThread {
    thread_id: u32,
    join: JoinHandle<()>,
}

/// Global keyboard hook backed by `WH_KEYBOARD_LL`.
pub struct WindowsKeyboardHook {
    running: Option<HookThread>,
}

impl WindowsKeyboardHook {
    pub fn new() -> Self {
        Self { running: None }
    }
}

impl Default for WindowsKeyboardHook {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardHook for WindowsKeyboardHook {
    fn install(&mut self, handler: Arc<dyn KeyEventHandler>) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Err(CaptureError::AlreadyInstalled);
        }

        // The hook thread reports its thread id on success, or the OS error.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();

        let join = thread::Builder::new()
            .name("simon-hook-loop".to_string())
            .spawn(move || run_hook_message_loop(handler, ready_tx))
            .map_err(|e| CaptureError::HookInstallFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                info!(thread_id, "keyboard hook installed");
                self.running = Some(HookThread { thread_id, join });
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = join.join();
                Err(CaptureError::HookInstallFailed(reason))
            }
            Err(_) => {
                let _ = join.join();
                Err(CaptureError::HookInstallFailed(
                    "hook thread exited before reporting".to_string(),
                ))
            }
        }
    }

    fn uninstall(&mut self) {
        let stopped = stop_hook_thread(&mut self.running, |thread_id| {
            // SAFETY: PostThreadMessageW only enqueues a message; thread_id
            // belongs to the hook thread, which owns a message queue once
            // GetMessageW ran.
            unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
                .map_err(|e| e.to_string())
        });
        if stopped {
            info!("keyboard hook removed");
        }
    }

    fn is_installed(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for WindowsKeyboardHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}

/// Asks the hook thread to quit and joins it.
///
/// If the quit message cannot be posted the thread stays in `running`, so
/// the hook still reports installed and a later call can retry.
fn stop_hook_thread<F>(running: &mut Option<HookThread>, post_quit: F) -> bool
where
    F: FnOnce(u32) -> Result<(), String>,
{
    let Some(thread_id) = running.as_ref().map(|hook| hook.thread_id) else {
        return false;
    };
    if let Err(e) = post_quit(thread_id) {
        warn!(thread_id, "failed to post WM_QUIT to hook thread: {e}");
        return false;
    }
    if let Some(hook) = running.take() {
        if hook.join.join().is_err() {
            warn!("hook thread panicked during shutdown");
        }
    }
    true
}

/// Entry point for the dedicated Win32 message loop thread.
fn run_hook_message_loop(
    handler: Arc<dyn KeyEventHandler>,
    ready: mpsc::Sender<Result<u32, String>>,
) {
    HANDLER.with(|slot| *slot.borrow_mut() = Some(handler));

    // SAFETY: SetWindowsHookExW requires the calling thread to pump messages,
    // which this thread does below. hmod is None because the callback lives
    // in this process and the hook is global (thread id 0).
    let hook = match unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) }
    {
        Ok(hook) => hook,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    // SAFETY: GetCurrentThreadId has no preconditions.
    let thread_id = unsafe { GetCurrentThreadId() };
    let _ = ready.send(Ok(thread_id));

    let mut msg = MSG::default();
    // SAFETY: Standard Win32 GetMessage/DispatchMessage loop pattern. The loop
    // ends when uninstall posts WM_QUIT (GetMessageW returns 0) or on error (-1).
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
            DispatchMessageW(&msg);
        }
        if let Err(e) = UnhookWindowsHookEx(hook) {
            warn!("UnhookWindowsHookEx failed: {e}");
        }
    }

    HANDLER.with(|slot| slot.borrow_mut().take());
    debug!("hook message loop exited");
}

/// Low-level keyboard hook callback.
///
/// # Safety
///
/// This function is called by Windows from the hook message loop thread.
/// It must return quickly (< ~300ms) to avoid hook removal by the OS.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code != HC_ACTION as i32 {
        // SAFETY: Must call CallNextHookEx when n_code < 0.
        return CallNextHookEx(None, n_code, w_param, l_param);
    }

    // SAFETY: l_param points to a KBDLLHOOKSTRUCT when n_code == HC_ACTION.
    let kbs = &*(l_param.0 as *const KBDLLHOOKSTRUCT);

    let kind = match w_param.0 as u32 {
        WM_KEYDOWN | WM_SYSKEYDOWN => KeyEventKind::Down,
        WM_KEYUP | WM_SYSKEYUP => KeyEventKind::Up,
        _ => return CallNextHookEx(None, n_code, w_param, l_param),
    };

    let event = RawKeyEvent {
        key: KeyCode(kbs.vkCode as u16),
        kind,
        scan_code: kbs.scanCode as u16,
        time_ms: kbs.time,
        self_injected: kbs.dwExtraInfo == INJECTION_TAG,
    };

    let decision = HANDLER.with(|slot| match slot.borrow().as_ref() {
        Some(handler) => handler.on_key_event(event),
        None => HookDecision::Forward,
    });

    match decision {
        // Returning non-zero without calling the next hook consumes the event.
        HookDecision::Suppress => LRESULT(1),
        // SAFETY: Forward the event to the next hook in the chain.
        HookDecision::Forward => CallNextHookEx(None, n_code, w_param, l_param),
    }
}
