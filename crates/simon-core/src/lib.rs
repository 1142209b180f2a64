//! # simon-core
//!
//! Shared library for SimonGate containing key codes, key bindings, the
//! single-flight gate, and the serial text protocol codec.
//!
//! This crate has zero dependencies on OS APIs, async runtimes, or serial
//! ports. Everything in here is pure logic that the middleware crate wires up
//! to a keyboard hook on one side and a physical pattern device on the other.
//!
//! # Architecture overview
//!
//! SimonGate intercepts selected keystrokes and holds them back until the user
//! reproduces a light pattern on an external device (a "Simon" game board
//! attached over a serial link). Only after the device confirms the pattern
//! was completed is the keystroke released.
//!
//! - **`keymap`** – the [`KeyCode`] newtype (Windows virtual-key numbering)
//!   and key-name parsing used by the configuration file.
//!
//! - **`domain`** – [`KeyBinding`]s, the [`KeyRegistry`] consulted on every
//!   keystroke, and the [`Gate`] that guarantees at most one hardware
//!   transaction is in flight.
//!
//! - **`protocol`** – how commands and verdicts travel over the serial line:
//!   CRLF-terminated text, with two firmware dialects selected by
//!   [`CodecMode`].

pub mod domain;
pub mod keymap;
pub mod protocol;

pub use domain::binding::{BindingError, Challenge, KeyBinding};
pub use domain::gate::{Gate, GateGuard, GateState};
pub use domain::registry::KeyRegistry;
pub use keymap::KeyCode;
pub use protocol::codec::{decode_verdict, encode_length, encode_pattern, Codec, CodecMode, ProtocolError};
pub use protocol::messages::Verdict;
