//! Application layer of the middleware.
//!
//! Sits between simon-core's pure logic and the OS adapters in
//! `infrastructure`, and depends on the latter only through traits.
//!
//! # Sub-modules
//!
//! - **`hardware_link`** – the send/receive capability a transaction drives,
//!   plus a closure-based adapter.
//!
//! - **`intercept`** – the engine the keyboard hook calls on every keystroke.
//!   It owns the single-flight gate and spawns one transaction at a time.
//!
//! - **`session`** – lifecycle: open the port, install the hook, register
//!   keys, run, tear down.

pub mod hardware_link;
pub mod intercept;
pub mod session;
