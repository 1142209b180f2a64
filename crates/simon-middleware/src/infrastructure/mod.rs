//! Infrastructure layer for the middleware.
//!
//! Contains OS-facing adapters: the global keyboard hook, keystroke replay,
//! the serial transport, configuration storage and logging setup.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `simon_core`; the application layer only uses its traits and event types.

pub mod input_capture;
pub mod input_replay;
pub mod logging;
pub mod serial;
pub mod storage;
