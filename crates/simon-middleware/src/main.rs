//! SimonGate keyboard middleware, entry point.
//!
//! Holds back registered keystrokes until the user reproduces a pattern on
//! the serial-attached Simon device. A keystroke is replayed to the focused
//! application only after the device reports success.
//!
//! # Usage
//!
//! ```text
//! simon-middleware [OPTIONS] [COMMAND]
//!
//! Commands:
//!   run      Intercept keystrokes until Ctrl-C (default)
//!   probe    Send one raw command and print the device's answer
//!   monitor  Print every line the device sends until Ctrl-C
//!
//! Options:
//!   --config    <PATH>   Config file [default: platform config dir]
//!   --port      <NAME>   Serial port, overrides [serial].port
//!   --mode      <MODE>   "length" or "pattern", overrides [protocol].mode
//!   --log-level <LEVEL>  Overrides [logging].level
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable          | Overrides     |
//! |-------------------|---------------|
//! | `SIMON_CONFIG`    | `--config`    |
//! | `SIMON_PORT`      | `--port`      |
//! | `SIMON_MODE`      | `--mode`      |
//! | `SIMON_LOG_LEVEL` | `--log-level` |

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use simon_core::protocol::decode_verdict;
use simon_core::{Codec, CodecMode};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use simon_middleware::application::session::{Session, SessionError, SessionSettings};
use simon_middleware::infrastructure::input_capture::platform_hook;
use simon_middleware::infrastructure::input_replay::{platform_replayer, KeyReplayer};
use simon_middleware::infrastructure::logging::init_logging;
use simon_middleware::infrastructure::serial::{SerialDevice, SerialLink};
use simon_middleware::infrastructure::storage::config::{load_config, load_config_from, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// SimonGate keyboard middleware.
///
/// Intercepts registered keys and releases them only after the matching
/// pattern has been entered on the Simon device.
#[derive(Debug, Parser)]
#[command(name = "simon-middleware", about, version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "SIMON_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port of the device, e.g. COM6 or /dev/ttyACM0.
    #[arg(long, env = "SIMON_PORT")]
    port: Option<String>,

    /// Firmware dialect: "length" or "pattern".
    #[arg(long, env = "SIMON_MODE")]
    mode: Option<CodecMode>,

    /// Log level: error, warn, info, debug or trace.
    #[arg(long, env = "SIMON_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Intercept keystrokes until Ctrl-C.
    Run,
    /// Send one raw command line and print the response and its verdict.
    Probe {
        /// Command text, sent verbatim with a CRLF terminator.
        command: String,
        /// How long to wait for the response, in milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Print every line the device sends until Ctrl-C.
    Monitor,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => load_config().context("failed to load the platform config file")?,
        };

        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(mode) = self.mode {
            config.protocol.mode = mode;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    // Dropping the guard flushes the file writer, so keep it for all of main.
    let _log_guard = init_logging(&config.logging, cli.log_level.as_deref())
        .context("failed to initialise logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = %config.serial.port,
        mode = %config.protocol.mode,
        "simon-middleware starting"
    );

    let device = Arc::new(SerialDevice::serial(
        config.serial.port.clone(),
        config.serial.line_settings(),
        Codec::new(config.protocol.mode),
    ));

    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => run(&config, device).await,
        Command::Probe {
            command,
            timeout_ms,
        } => probe(device, command, Duration::from_millis(timeout_ms)).await,
        Command::Monitor => monitor(device).await,
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn run(config: &AppConfig, device: Arc<SerialDevice>) -> anyhow::Result<()> {
    let hook = platform_hook().context("keyboard hook is not available")?;
    let replayer: Arc<dyn KeyReplayer> =
        Arc::from(platform_replayer().context("keystroke replay is not available")?);

    let settings = SessionSettings {
        engine: config.protocol.engine_settings(),
        shutdown_grace: config.protocol.shutdown_grace(),
    };
    let mut session = Session::new(
        Arc::clone(&device),
        hook,
        replayer,
        settings,
        Handle::current(),
    );

    // Reject a bad key table before touching the hardware.
    for entry in &config.keys {
        let challenge = entry.challenge()?;
        session
            .register_key(entry.key, challenge)
            .with_context(|| format!("cannot register key {}", entry.key))?;
    }

    session.initialize().context("startup failed")?;
    session.set_callbacks(Arc::new(SerialLink::new(device)));

    match session.run(ctrl_c()).await {
        Ok(()) => {}
        Err(SessionError::Timeout(reason)) => warn!("{reason}"),
        Err(e) => return Err(e).context("session ended abnormally"),
    }
    info!("simon-middleware stopped");
    Ok(())
}

async fn probe(device: Arc<SerialDevice>, command: String, timeout: Duration) -> anyhow::Result<()> {
    device
        .connect()
        .with_context(|| format!("cannot open {}", device.endpoint()))?;

    let worker = Arc::clone(&device);
    let response = tokio::task::spawn_blocking(move || {
        worker.send_command(&command)?;
        worker.receive(timeout)
    })
    .await
    .context("probe task failed")?;
    device.disconnect();

    let response = response.context("device exchange failed")?;
    println!("response: {:?}", response.trim());
    println!("verdict:  {}", decode_verdict(&response));
    Ok(())
}

async fn monitor(device: Arc<SerialDevice>) -> anyhow::Result<()> {
    device
        .connect()
        .with_context(|| format!("cannot open {}", device.endpoint()))?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            ctrl_c().await;
            stop.store(true, Ordering::Relaxed);
        });
    }

    let worker = Arc::clone(&device);
    let result = tokio::task::spawn_blocking(move || {
        worker.monitor(&stop, |line, _| println!("{line}"))
    })
    .await
    .context("monitor task failed")?;
    device.disconnect();

    result.context("lost the device")?;
    info!("monitor stopped");
    Ok(())
}

/// Resolves on Ctrl-C. If the signal handler cannot be installed the error is
/// logged and the future resolves at once, so the caller shuts down cleanly.
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received"),
        Err(e) => error!("failed to listen for Ctrl-C: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_no_overrides_and_no_subcommand() {
        // Arrange / Act
        let cli = Cli::parse_from(["simon-middleware"]);

        // Assert
        assert!(cli.port.is_none());
        assert!(cli.mode.is_none());
        assert!(cli.log_level.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parses_overrides() {
        let cli = Cli::parse_from([
            "simon-middleware",
            "--port",
            "/dev/ttyACM0",
            "--mode",
            "pattern",
            "--log-level",
            "debug",
        ]);

        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.mode, Some(CodecMode::Pattern));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        let result = Cli::try_parse_from(["simon-middleware", "--mode", "morse"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_probe_subcommand() {
        let cli = Cli::parse_from(["simon-middleware", "probe", "PATTERN:1,2", "--timeout-ms", "250"]);

        assert_eq!(
            cli.command,
            Some(Command::Probe {
                command: "PATTERN:1,2".to_string(),
                timeout_ms: 250,
            })
        );
    }

    #[test]
    fn test_resolve_config_applies_overrides_over_file() {
        // Arrange
        let path = std::env::temp_dir().join(format!("simon-cli-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[serial]\nport = \"COM3\"\n").unwrap();
        let cli = Cli::parse_from([
            "simon-middleware",
            "--config",
            path.to_str().unwrap(),
            "--mode",
            "pattern",
        ]);

        // Act
        let config = cli.resolve_config().unwrap();

        // Assert
        assert_eq!(config.serial.port, "COM3", "file value kept without --port");
        assert_eq!(config.protocol.mode, CodecMode::Pattern);
        std::fs::remove_file(path).ok();
    }
}
