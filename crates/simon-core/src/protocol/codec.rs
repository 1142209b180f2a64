//! Text codec for the serial line protocol.
//!
//! Two firmware dialects are in circulation and they are not interchangeable:
//!
//! - **Length** firmware receives a bare decimal step count (`"5"`) and
//!   reports its verdict unprompted once the user finishes.
//! - **Pattern** firmware receives the exact sequence (`"PATTERN:3,1,3,1"`)
//!   and must be asked for its verdict with `"CHECK"`.
//!
//! [`Codec`] is configured with one [`CodecMode`] and hides the difference
//! from the rest of the system. Framing (the CRLF terminator) is the
//! transport's job, so every string produced here is unterminated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::binding::Challenge;
use crate::protocol::messages::{
    Verdict, CHECK_COMMAND, FAILURE_TOKENS, PATTERN_PREFIX, PATTERN_SEPARATOR, SUCCESS_TOKENS,
};

/// Errors that can occur while encoding commands or decoding device text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A length command must carry a positive count.
    #[error("length must be positive")]
    ZeroLength,

    /// The configured dialect cannot express this challenge.
    #[error("{mode} firmware cannot play a length-only challenge; a pattern is required")]
    UnsupportedChallenge { mode: CodecMode },

    /// Text that should have been a pattern command was not.
    #[error("malformed pattern command: {0:?}")]
    MalformedPattern(String),

    /// The mode name is not recognised.
    #[error("unknown codec mode: {0:?} (expected \"length\" or \"pattern\")")]
    UnknownMode(String),
}

/// Which firmware dialect the device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecMode {
    #[default]
    Length,
    Pattern,
}

impl fmt::Display for CodecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecMode::Length => "length",
            CodecMode::Pattern => "pattern",
        })
    }
}

impl FromStr for CodecMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "length" => Ok(CodecMode::Length),
            "pattern" => Ok(CodecMode::Pattern),
            _ => Err(ProtocolError::UnknownMode(s.to_string())),
        }
    }
}

// ── Free functions ────────────────────────────────────────────────────────────

/// Encodes a pattern command: `PATTERN:` followed by comma-joined steps.
///
/// An empty pattern encodes to the bare prefix.
///
/// # Examples
///
/// ```rust
/// use simon_core::protocol::encode_pattern;
///
/// assert_eq!(encode_pattern(&[3, 1, 3, 1]), "PATTERN:3,1,3,1");
/// assert_eq!(encode_pattern(&[]), "PATTERN:");
/// ```
pub fn encode_pattern(steps: &[u32]) -> String {
    let mut out = String::with_capacity(PATTERN_PREFIX.len() + steps.len() * 2);
    out.push_str(PATTERN_PREFIX);
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            out.push(PATTERN_SEPARATOR);
        }
        out.push_str(&step.to_string());
    }
    out
}

/// Decodes a pattern command produced by [`encode_pattern`].
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPattern`] if the prefix is missing or a
/// step is not a non-negative integer.
pub fn decode_pattern(text: &str) -> Result<Vec<u32>, ProtocolError> {
    let malformed = || ProtocolError::MalformedPattern(text.to_string());
    let body = text.trim().strip_prefix(PATTERN_PREFIX).ok_or_else(malformed)?;
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(PATTERN_SEPARATOR)
        .map(|s| s.trim().parse::<u32>().map_err(|_| malformed()))
        .collect()
}

/// Encodes a length command: the decimal count with no prefix.
///
/// # Errors
///
/// Returns [`ProtocolError::ZeroLength`] if `n == 0`.
pub fn encode_length(n: u32) -> Result<String, ProtocolError> {
    if n == 0 {
        return Err(ProtocolError::ZeroLength);
    }
    Ok(n.to_string())
}

/// Maps a raw device response to a [`Verdict`].
///
/// Surrounding whitespace is trimmed, then the text is searched for the known
/// tokens. A failure token wins over a success token, and anything without a
/// recognised token (including the empty string left by a timeout) is
/// [`Verdict::Indeterminate`].
///
/// # Examples
///
/// ```rust
/// use simon_core::protocol::{decode_verdict, Verdict};
///
/// assert_eq!(decode_verdict("SUCCESS\r\n"), Verdict::Success);
/// assert_eq!(decode_verdict("False\n"), Verdict::Failure);
/// assert_eq!(decode_verdict(""), Verdict::Indeterminate);
/// ```
pub fn decode_verdict(raw: &str) -> Verdict {
    let text = raw.trim();
    if text.is_empty() {
        return Verdict::Indeterminate;
    }
    if FAILURE_TOKENS.iter().any(|t| text.contains(t)) {
        return Verdict::Failure;
    }
    if SUCCESS_TOKENS.iter().any(|t| text.contains(t)) {
        return Verdict::Success;
    }
    Verdict::Indeterminate
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Dialect-aware encoder for challenges and verification requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Codec {
    mode: CodecMode,
}

impl Codec {
    pub fn new(mode: CodecMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    /// Returns `true` if this dialect can play `challenge`.
    pub fn supports(&self, challenge: &Challenge) -> bool {
        !matches!(
            (self.mode, challenge),
            (CodecMode::Pattern, Challenge::Length(_))
        )
    }

    /// Encodes the command that starts a transaction for `challenge`.
    ///
    /// Length firmware is sent the step count of a pattern challenge.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedChallenge`] for a length challenge
    /// in pattern mode and [`ProtocolError::ZeroLength`] for a zero length.
    pub fn encode_challenge(&self, challenge: &Challenge) -> Result<String, ProtocolError> {
        match (self.mode, challenge) {
            (CodecMode::Length, c) => encode_length(c.complexity()),
            (CodecMode::Pattern, Challenge::Pattern(steps)) => Ok(encode_pattern(steps)),
            (CodecMode::Pattern, Challenge::Length(_)) => {
                Err(ProtocolError::UnsupportedChallenge { mode: self.mode })
            }
        }
    }

    /// The command that must be written before reading a verdict, if any.
    pub fn verify_request(&self) -> Option<&'static str> {
        match self.mode {
            CodecMode::Length => None,
            CodecMode::Pattern => Some(CHECK_COMMAND),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
