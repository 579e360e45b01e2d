//! Error types for the upload daemon.
//!
//! Two layers of failure exist. [`DaemonError`] covers everything that stops a
//! listener or prevents the process from starting, and always maps to a
//! non-zero exit status. [`SessionError`] covers a single connection; it is
//! logged by the handler that produced it and never crosses into the accept
//! loop, so one misbehaving peer cannot take down a listener.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use logging::LoggingError;
use protocol::MetadataError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::connection_pool::ConnectionKind;

/// Exit status reported for every startup or listener failure.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Failure that stops the daemon or one of its listeners.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The configuration file is missing, unreadable, or incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The tracing subscriber could not be installed.
    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// The save directory does not exist and could not be created.
    #[error("failed to create save directory '{}': {source}", path.display())]
    CreateSaveDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A listening socket could not be opened.
    #[error("failed to bind {kind} listener on {addr}: {source}")]
    Bind {
        /// Which listener failed.
        kind: ConnectionKind,
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed; the affected accept loop has stopped.
    #[error("{kind} listener stopped accepting connections: {source}")]
    Accept {
        /// Which listener failed.
        kind: ConnectionKind,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// The async runtime could not be started.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl DaemonError {
    /// Returns the process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        FAILURE_EXIT_CODE
    }
}

/// Failure confined to one connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer closed the connection before sending a metadata line.
    #[error("connection closed before metadata was received")]
    ClosedBeforeMetadata,

    /// The metadata line could not be parsed.
    #[error("invalid metadata: {0}")]
    Protocol(#[from] MetadataError),

    /// Reading from or writing to the peer failed.
    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    /// The save directory or a stored file could not be accessed.
    #[error("storage error on '{}': {source}", path.display())]
    Storage {
        /// File that was being inspected, opened, or written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    /// Wraps an I/O failure on the given stored file.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Reports whether the peer broke the protocol, as opposed to an I/O fault.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ClosedBeforeMetadata | Self::Protocol(_))
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        Self::Socket(error)
    }
}
