//! Key bindings: the challenge a registered key asks the device to perform.
//!
//! Two firmware dialects exist. The "length" firmware generates its own random
//! sequence and only needs to know how long it should be; the "pattern"
//! firmware is told the exact sequence to display. A [`Challenge`] captures
//! either form, and [`KeyBinding`] ties one to a key.

use thiserror::Error;

use crate::keymap::KeyCode;

/// Error type for binding construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingError {
    /// A length challenge must be at least 1.
    #[error("challenge length must be positive, got {0}")]
    NonPositiveLength(i64),
    /// A pattern challenge must contain at least one step.
    #[error("challenge pattern must not be empty")]
    EmptyPattern,
}

/// What the device is asked to do for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Play a device-generated sequence of this many steps.
    Length(u32),
    /// Play exactly this sequence of steps.
    Pattern(Vec<u32>),
}

impl Challenge {
    /// Validates and builds a length challenge.
    ///
    /// Accepts a signed value so callers holding raw host integers get a
    /// proper error for `0` and negative numbers instead of a wrap-around.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::NonPositiveLength`] if `n <= 0` or `n` exceeds `u32::MAX`.
    pub fn length(n: i64) -> Result<Self, BindingError> {
        if n <= 0 {
            return Err(BindingError::NonPositiveLength(n));
        }
        u32::try_from(n)
            .map(Challenge::Length)
            .map_err(|_| BindingError::NonPositiveLength(n))
    }

    /// Validates and builds a pattern challenge.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::EmptyPattern`] if `steps` is empty.
    pub fn pattern(steps: Vec<u32>) -> Result<Self, BindingError> {
        if steps.is_empty() {
            return Err(BindingError::EmptyPattern);
        }
        Ok(Challenge::Pattern(steps))
    }

    /// Number of steps the user has to reproduce.
    pub fn complexity(&self) -> u32 {
        match self {
            Challenge::Length(n) => *n,
            Challenge::Pattern(steps) => u32::try_from(steps.len()).unwrap_or(u32::MAX),
        }
    }
}

/// A registered key and the challenge it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: KeyCode,
    pub challenge: Challenge,
}

impl KeyBinding {
    pub fn new(key: KeyCode, challenge: Challenge) -> Self {
        Self { key, challenge }
    }
}
