//! Logging setup: console plus an optional size-rotated log file.
//!
//! The subscriber has two fmt layers: stderr with ANSI colours, and a plain
//! text file layer behind `tracing_appender::non_blocking` so the hook thread
//! never waits on disk I/O. `RUST_LOG` overrides the configured level.
//!
//! The file is rotated by size, not by date: once it grows past
//! `max_size_bytes` it is renamed to `<file>.old` (replacing the previous
//! backup) and a fresh file is started. Exactly one backup is kept.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::infrastructure::storage::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Append-only file writer that rotates to `<file>.old` past a size limit.
pub struct RotatingFileWriter {
    path: PathBuf,
    backup: PathBuf,
    max_size: u64,
    /// `None` only between closing and reopening during a rotation.
    file: Option<File>,
    size: u64,
}

impl RotatingFileWriter {
    /// Opens (or creates) `path` for appending.
    pub fn open(path: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            backup: backup_path(&path),
            path,
            max_size,
            file: Some(file),
            size,
        })
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file is not open"))
    }

    fn rotate(&mut self) -> io::Result<()> {
        // Windows refuses to rename a file with an open handle.
        if let Some(mut old) = self.file.take() {
            old.flush()?;
        }
        let moved = std::fs::remove_file(&self.backup)
            .or_else(|e| match e.kind() {
                io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })
            .and_then(|()| std::fs::rename(&self.path, &self.backup));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        match moved {
            Ok(()) => {
                let note = format!("{} INFO log file rotated\n", unix_timestamp());
                file.write_all(note.as_bytes())?;
                self.size = note.len() as u64;
            }
            // Keep appending to the oversized file rather than losing lines.
            Err(_) => self.size = file.metadata()?.len(),
        }
        self.file = Some(file);
        moved
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file()?.write(buf)?;
        self.size += n as u64;
        if self.size > self.max_size {
            // The bytes are already on disk; a failed rotation must not make
            // the caller write them again.
            let _ = self.rotate();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Installs the global subscriber.
///
/// `level_override` (from `--log-level`) beats the configured level; `RUST_LOG`
/// beats both. Keep the returned guard alive for the life of the process or
/// buffered file lines are lost.
pub fn init_logging(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<Option<WorkerGuard>, LoggingError> {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let writer = RotatingFileWriter::open(path, config.max_size_bytes).map_err(|source| {
                LoggingError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("simon-log-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_backup_path_appends_old() {
        assert_eq!(
            backup_path(Path::new("logs/simon.log")),
            PathBuf::from("logs/simon.log.old")
        );
    }

    #[test]
    fn test_writes_below_limit_do_not_rotate() {
        // Arrange
        let dir = scratch_dir();
        let path = dir.join("simon.log");
        let mut writer = RotatingFileWriter::open(&path, 1024).unwrap();

        // Act
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        // Assert
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        assert!(!backup_path(&path).exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_exceeding_limit_rotates_to_single_backup() {
        // Arrange
        let dir = scratch_dir();
        let path = dir.join("simon.log");
        let mut writer = RotatingFileWriter::open(&path, 16).unwrap();

        // Act: two rotations
        writer.write_all(b"first line that is long\n").unwrap();
        writer.write_all(b"second line that is long\n").unwrap();
        writer.flush().unwrap();

        // Assert
        let backup = std::fs::read_to_string(backup_path(&path)).unwrap();
        assert!(backup.contains("second line"), "newest overflow is the backup");
        assert!(!backup.contains("first line"), "only one backup is kept");
        let current = std::fs::read_to_string(&path).unwrap();
        assert!(current.contains("log file rotated"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_reopen_appends_and_counts_existing_size() {
        let dir = scratch_dir();
        let path = dir.join("simon.log");
        std::fs::write(&path, "0123456789").unwrap();

        let mut writer = RotatingFileWriter::open(&path, 12).unwrap();
        writer.write_all(b"abc").unwrap();
        writer.flush().unwrap();

        assert_eq!(
            std::fs::read_to_string(backup_path(&path)).unwrap(),
            "0123456789abc"
        );
        std::fs::remove_dir_all(dir).ok();
    }
}
