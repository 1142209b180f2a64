//! Wire constants and message types for the serial line protocol.
//!
//! The protocol is plain text, one command per line, CRLF-terminated:
//!
//! ```text
//! host → device   "5\r\n"                 length dialect: play 5 random steps
//! host → device   "PATTERN:3,1,3,1\r\n"   pattern dialect: play exactly this
//! host → device   "CHECK\r\n"             pattern dialect: report the result
//! device → host   "True\n" / "SUCCESS\n"  completed
//! device → host   "False\n"               failed
//! ```

use std::fmt;

/// Terminator appended to every outbound command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Byte that marks the end of an inbound response.
pub const RESPONSE_TERMINATOR: u8 = b'\n';

/// Prefix of a pattern command.
pub const PATTERN_PREFIX: &str = "PATTERN:";

/// Separator between pattern steps.
pub const PATTERN_SEPARATOR: char = ',';

/// Bare command asking pattern firmware for the outcome of the last pattern.
pub const CHECK_COMMAND: &str = "CHECK";

/// Response tokens meaning the pattern was completed.
pub const SUCCESS_TOKENS: &[&str] = &["True", "SUCCESS"];

/// Response tokens meaning the pattern was failed.
pub const FAILURE_TOKENS: &[&str] = &["False"];

/// Outcome of asking the device whether a pattern was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Success,
    Failure,
    /// No recognised token (empty, garbled, or timed out).
    Indeterminate,
}

impl Verdict {
    /// Only [`Verdict::Success`] unlocks; everything else is treated as failure.
    pub fn is_success(self) -> bool {
        matches!(self, Verdict::Success)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Success => "success",
            Verdict::Failure => "failure",
            Verdict::Indeterminate => "indeterminate",
        })
    }
}
