//! TOML-based configuration for the middleware.
//!
//! Reads `AppConfig` from the platform-appropriate config file, or from an
//! explicit `--config` path:
//! - Windows:  `%APPDATA%\SimonGate\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/simongate/config.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/SimonGate/config.toml`
//!
//! ```toml
//! [serial]
//! port = "COM6"
//!
//! [protocol]
//! mode = "pattern"
//! verify_timeout_ms = 5000
//!
//! [[keys]]
//! key = "W"
//! pattern = [1, 2, 3, 2, 1]
//!
//! [[keys]]
//! key = "F5"
//! length = 6
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]` helper, so an empty or
//! missing file yields [`AppConfig::default()`], which binds the classic
//! W/A/S/D/Space set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simon_core::{Challenge, CodecMode, KeyCode};
use thiserror::Error;

use crate::application::intercept::{EngineSettings, DEFAULT_RECEIVE_GRACE};
use crate::infrastructure::serial::LineSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `[[keys]]` entry does not describe a usable challenge.
    #[error("invalid binding for key {key}: {reason}")]
    InvalidBinding { key: KeyCode, reason: String },
}

/// Default pause before `CHECK` in pattern mode.
pub const PATTERN_SETTLE_DELAY_MS: u64 = 500;

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Intercepted keys. Omitting the table keeps the default bindings; an
    /// explicit empty list intercepts nothing.
    #[serde(default = "default_keys")]
    pub keys: Vec<KeyEntry>,
}

/// Serial endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    /// Port name, e.g. `"COM6"` or `"/dev/ttyACM0"`.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Driver read/write timeout per call.
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
}

/// Wire dialect and transaction timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub mode: CodecMode,
    /// How long the user has to finish the pattern.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    /// Pause after sending before asking for the verdict. Unset means
    /// 0 ms for length firmware and 500 ms for pattern firmware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub replay_on_success: bool,
    /// How long shutdown waits for an in-flight transaction.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Diagnostic log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console only when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Size at which the log file is rotated to `<file>.old`.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

/// One `[[keys]]` entry. Exactly one of `length` and `pattern` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyEntry {
    pub key: KeyCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Vec<u32>>,
}

impl KeyEntry {
    pub fn pattern(key: KeyCode, steps: &[u32]) -> Self {
        Self {
            key,
            length: None,
            pattern: Some(steps.to_vec()),
        }
    }

    /// Validates the entry and builds its challenge.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBinding`] if both or neither of `length`
    /// and `pattern` are set, or the value is out of range.
    pub fn challenge(&self) -> Result<Challenge, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBinding {
            key: self.key,
            reason,
        };
        match (self.length, &self.pattern) {
            (Some(n), None) => Challenge::length(n).map_err(|e| invalid(e.to_string())),
            (None, Some(steps)) => {
                Challenge::pattern(steps.clone()).map_err(|e| invalid(e.to_string()))
            }
            (Some(_), Some(_)) => Err(invalid("set either length or pattern, not both".into())),
            (None, None) => Err(invalid("one of length or pattern is required".into())),
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> String {
    "COM6".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_read_poll_ms() -> u64 {
    50
}
fn default_verify_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_shutdown_grace_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}

/// The bindings shipped with the device.
pub fn default_keys() -> Vec<KeyEntry> {
    vec![
        KeyEntry::pattern(KeyCode(0x57), &[1, 2, 3, 2, 1]),
        KeyEntry::pattern(KeyCode(0x41), &[3, 1, 3, 1]),
        KeyEntry::pattern(KeyCode(0x53), &[2, 4, 2, 1, 3, 4]),
        KeyEntry::pattern(KeyCode(0x44), &[4, 3, 2, 1]),
        KeyEntry::pattern(KeyCode::SPACE, &[1, 2, 3, 4, 4, 3, 2, 1]),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
            keys: default_keys(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            read_poll_ms: default_read_poll_ms(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mode: CodecMode::default(),
            verify_timeout_ms: default_verify_timeout_ms(),
            settle_delay_ms: None,
            replay_on_success: default_true(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

impl SerialConfig {
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            io_timeout: Duration::from_millis(self.read_poll_ms),
            ..LineSettings::default()
        }
    }
}

impl ProtocolConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            verify_timeout: Duration::from_millis(self.verify_timeout_ms),
            settle_delay: self.settle_delay(),
            replay_on_success: self.replay_on_success,
            receive_grace: DEFAULT_RECEIVE_GRACE,
            ..EngineSettings::default()
        }
    }

    /// The configured settle delay, or the default for the current mode.
    ///
    /// Pattern firmware needs a moment after `PATTERN:` before it will
    /// answer `CHECK`.
    pub fn settle_delay(&self) -> Duration {
        let ms = self.settle_delay_ms.unwrap_or(match self.mode {
            CodecMode::Length => 0,
            CodecMode::Pattern => PATTERN_SETTLE_DELAY_MS,
        });
        Duration::from_millis(ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Parses configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Loads `AppConfig` from the platform config file.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SimonGate"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("simongate"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("SimonGate")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
