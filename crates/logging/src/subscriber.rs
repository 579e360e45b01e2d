//! crates/logging/src/subscriber.rs
//!
//! Installation of the global tracing subscriber.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::VerbosityConfig;

/// Where log output goes and how much of it is kept.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LogConfig {
    verbosity: VerbosityConfig,
    log_file: Option<PathBuf>,
}

impl LogConfig {
    /// Creates a console-only configuration.
    #[must_use]
    pub fn new(verbosity: VerbosityConfig) -> Self {
        Self {
            verbosity,
            log_file: None,
        }
    }

    /// Additionally appends every event to `path`, creating it if needed.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Returns the configured verbosity.
    #[must_use]
    pub const fn verbosity(&self) -> VerbosityConfig {
        self.verbosity
    }

    /// Returns the log file path, if one was configured.
    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log file could not be opened for appending.
    #[error("failed to open log file '{}': {source}", path.display())]
    OpenLogFile {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Another global subscriber was installed first.
    #[error("tracing subscriber already installed")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Installs the global subscriber described by `config`.
///
/// Events are written to standard output with timestamps. When a log file is
/// configured, the same events are appended to it without ANSI colouring.
///
/// # Errors
///
/// Fails when the log file cannot be opened or a global subscriber already
/// exists. Nothing is installed in either case.
pub fn init_tracing(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.verbosity.max_level().into())
        .from_env_lossy();

    let file_layer = match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenLogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(())
}
