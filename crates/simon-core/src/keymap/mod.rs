//! Key identifiers and key-name parsing.
//!
//! Keys are identified by their Windows Virtual-Key (VK) code, the same number
//! the low-level keyboard hook reports in `KBDLLHOOKSTRUCT::vkCode`. Pressing
//! the letter A always produces `VK_A = 0x41` regardless of keyboard layout,
//! which is what makes VK codes a stable key for the binding table.
//!
//! Configuration files refer to keys by name (`"W"`, `"Space"`, `"F5"`) or by
//! a hexadecimal VK code (`"0x41"`). [`KeyCode::from_name`] resolves both.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a key name cannot be resolved to a VK code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown key name: {0:?}")]
pub struct UnknownKeyName(pub String);

/// A keyboard key identified by its Windows Virtual-Key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const BACKSPACE: KeyCode = KeyCode(0x08);
    pub const TAB: KeyCode = KeyCode(0x09);
    pub const ENTER: KeyCode = KeyCode(0x0D);
    pub const ESCAPE: KeyCode = KeyCode(0x1B);
    pub const SPACE: KeyCode = KeyCode(0x20);
    pub const LEFT: KeyCode = KeyCode(0x25);
    pub const UP: KeyCode = KeyCode(0x26);
    pub const RIGHT: KeyCode = KeyCode(0x27);
    pub const DOWN: KeyCode = KeyCode(0x28);

    /// Returns the key for an ASCII letter or digit (`'a'` and `'A'` are the same key).
    pub fn from_char(c: char) -> Option<KeyCode> {
        let upper = c.to_ascii_uppercase();
        if upper.is_ascii_uppercase() || upper.is_ascii_digit() {
            Some(KeyCode(upper as u16))
        } else {
            None
        }
    }

    /// Resolves a configuration key name to a [`KeyCode`].
    ///
    /// Accepts single letters and digits, the named keys in [`NAMED_KEYS`]
    /// (case-insensitive), `F1`–`F24`, and hexadecimal codes such as `0x41`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownKeyName`] if the name matches none of the above.
    pub fn from_name(name: &str) -> Result<KeyCode, UnknownKeyName> {
        let trimmed = name.trim();
        let unknown = || UnknownKeyName(name.to_string());

        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            return u16::from_str_radix(hex, 16)
                .ok()
                .filter(|vk| *vk <= 0xFF)
                .map(KeyCode)
                .ok_or_else(unknown);
        }

        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return KeyCode::from_char(c).ok_or_else(unknown);
        }

        if let Some((_, vk)) = NAMED_KEYS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(trimmed))
        {
            return Ok(KeyCode(*vk));
        }

        if let Some(num) = trimmed
            .strip_prefix('F')
            .or_else(|| trimmed.strip_prefix('f'))
            .and_then(|n| n.parse::<u16>().ok())
        {
            if (1..=24).contains(&num) {
                return Ok(KeyCode(0x70 + num - 1));
            }
        }

        Err(unknown())
    }

    /// Returns the canonical configuration name for this key.
    pub fn name(self) -> String {
        let vk = self.0;
        if (0x30..=0x39).contains(&vk) || (0x41..=0x5A).contains(&vk) {
            return char::from(vk as u8).to_string();
        }
        if (0x70..=0x87).contains(&vk) {
            return format!("F{}", vk - 0x70 + 1);
        }
        NAMED_KEYS
            .iter()
            .find(|(_, code)| *code == vk)
            .map(|(n, _)| (*n).to_string())
            .unwrap_or_else(|| format!("0x{vk:02X}"))
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for KeyCode {
    type Error = UnknownKeyName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KeyCode::from_name(&value)
    }
}

impl From<KeyCode> for String {
    fn from(key: KeyCode) -> Self {
        key.name()
    }
}

/// Named keys accepted in configuration files, with their VK codes.
///
/// The first entry for a code is the canonical name returned by [`KeyCode::name`].
pub const NAMED_KEYS: &[(&str, u16)] = &[
    ("Backspace", 0x08),
    ("Tab", 0x09),
    ("Enter", 0x0D),
    ("Return", 0x0D),
    ("Shift", 0x10),
    ("Ctrl", 0x11),
    ("Control", 0x11),
    ("Alt", 0x12),
    ("Pause", 0x13),
    ("CapsLock", 0x14),
    ("Escape", 0x1B),
    ("Esc", 0x1B),
    ("Space", 0x20),
    ("PageUp", 0x21),
    ("PageDown", 0x22),
    ("End", 0x23),
    ("Home", 0x24),
    ("Left", 0x25),
    ("Up", 0x26),
    ("Right", 0x27),
    ("Down", 0x28),
    ("Insert", 0x2D),
    ("Delete", 0x2E),
    ("ScrollLock", 0x91),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_resolve_case_insensitively() {
        assert_eq!(KeyCode::from_name("W"), Ok(KeyCode(0x57)));
        assert_eq!(KeyCode::from_name("w"), Ok(KeyCode(0x57)));
    }

    #[test]
    fn test_digits_resolve_to_vk_digit_range() {
        assert_eq!(KeyCode::from_name("0"), Ok(KeyCode(0x30)));
        assert_eq!(KeyCode::from_name("9"), Ok(KeyCode(0x39)));
    }

    #[test]
    fn test_named_keys_and_aliases() {
        assert_eq!(KeyCode::from_name("Space"), Ok(KeyCode::SPACE));
        assert_eq!(KeyCode::from_name("return"), Ok(KeyCode::ENTER));
        assert_eq!(KeyCode::from_name("ESC"), Ok(KeyCode::ESCAPE));
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(KeyCode::from_name("F1"), Ok(KeyCode(0x70)));
        assert_eq!(KeyCode::from_name("f12"), Ok(KeyCode(0x7B)));
        assert!(KeyCode::from_name("F25").is_err());
        assert!(KeyCode::from_name("F0").is_err());
    }

    #[test]
    fn test_hex_codes() {
        assert_eq!(KeyCode::from_name("0x41"), Ok(KeyCode(0x41)));
        assert_eq!(KeyCode::from_name("0XA2"), Ok(KeyCode(0xA2)));
        assert!(KeyCode::from_name("0x100").is_err(), "VK codes fit in one byte");
        assert!(KeyCode::from_name("0xZZ").is_err());
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert_eq!(
            KeyCode::from_name("Hyper"),
            Err(UnknownKeyName("Hyper".to_string()))
        );
        assert!(KeyCode::from_name("").is_err());
        assert!(KeyCode::from_name("!").is_err());
    }

    #[test]
    fn test_name_is_inverse_of_from_name_for_canonical_names() {
        for name in ["A", "Z", "5", "Space", "Enter", "Left", "F7", "ScrollLock"] {
            let key = KeyCode::from_name(name).unwrap();
            assert_eq!(key.name(), name);
        }
    }

    #[test]
    fn test_unnamed_code_displays_as_hex() {
        assert_eq!(KeyCode(0xA2).to_string(), "0xA2");
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        key: KeyCode,
    }

    #[test]
    fn test_key_code_deserializes_from_toml_name() {
        let entry: Entry = toml::from_str("key = \"Space\"").expect("deserialize");
        assert_eq!(entry.key, KeyCode::SPACE);

        let bad: Result<Entry, _> = toml::from_str("key = \"NoSuchKey\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_key_code_serializes_to_canonical_name() {
        let text = toml::to_string(&Entry { key: KeyCode(0x41) }).expect("serialize");
        assert_eq!(text.trim(), "key = \"A\"");
    }
}
