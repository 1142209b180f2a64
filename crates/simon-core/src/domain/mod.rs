//! Domain entities for SimonGate.
//!
//! - **`binding`** – what a registered key asks the device to perform.
//! - **`registry`** – the key → binding table consulted on every keystroke.
//! - **`gate`** – the global single-flight lock around hardware transactions.

pub mod binding;
pub mod gate;
pub mod registry;
