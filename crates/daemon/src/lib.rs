#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `upload_daemon` is a resumable file upload server. It listens on two
//! independent TCP ports:
//!
//! - the **transfer port**, where a client sends one metadata line
//!   (`FileName:<name>;Size:<bytes>`), receives the number of bytes the server
//!   already holds for that name as an 8-byte little-endian integer, and then
//!   streams the remainder until it closes its side of the connection;
//! - the **heartbeat port**, which answers every `ping` line with `pong`.
//!
//! # Design
//!
//! - [`run`] accepts an argument iterator together with writable handles for
//!   standard output and error, loads the configuration file, installs the
//!   tracing subscriber, and blocks on the server until Ctrl-C.
//! - [`ServerSettings`] carries every value the server needs. It is built once
//!   from a [`ConfigFile`] and passed down explicitly; no component reads
//!   global state.
//! - [`UploadServer`] binds both ports through a [`Listener`], which owns the
//!   connection tasks in a `JoinSet`, tracks them in a [`ConnectionPool`],
//!   optionally bounds them, and drains them on shutdown.
//! - [`TransferHandler`] and [`HeartbeatHandler`] implement
//!   [`ConnectionHandler`] and do all per-connection logging themselves.
//!
//! # Invariants
//!
//! - Stored files are only ever appended to.
//! - The offset sent to a client is read from the filesystem during that
//!   handshake, never cached.
//! - Errors are never written to the wire. A failing connection is logged and
//!   closed without affecting its listener.
//! - Concurrent uploads of the same name are not serialised unless
//!   `exclusiveUploads` is enabled.
//!
//! # Examples
//!
//! ```no_run
//! use upload_daemon::{ServerSettings, UploadServer};
//!
//! # async fn demo() -> Result<(), upload_daemon::DaemonError> {
//! let settings = ServerSettings::new("/srv/uploads")
//!     .with_transfer_addr("0.0.0.0:5000".parse().unwrap())
//!     .with_heartbeat_addr("0.0.0.0:5001".parse().unwrap());
//! let server = UploadServer::bind(settings).await?;
//! let shutdown = server.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//! server.run().await
//! # }
//! ```

mod cli;
mod config;
mod connection_pool;
mod error;
mod heartbeat;
mod listener;
mod server;
mod storage;
mod transfer;

use std::ffi::OsString;
use std::io::Write;

use logging::{LogConfig, VerbosityConfig};
use tracing::{info, warn};

pub use cli::PROGRAM_NAME;
pub use config::{
    ConfigError, ConfigFile, DEFAULT_BUFFER_SIZE, DEFAULT_CONFIG_PATH, DEFAULT_DRAIN_TIMEOUT,
    ServerSettings,
};
pub use connection_pool::{
    ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionKind, ConnectionPool,
};
pub use error::{DaemonError, FAILURE_EXIT_CODE, SessionError};
pub use heartbeat::{HeartbeatHandler, HeartbeatReport};
pub use listener::{ConnectionHandler, Listener, ListenerConfig};
pub use server::{ShutdownHandle, UploadServer};
pub use storage::{NameGuard, NameLocks, SaveDirectory, StoredFile};
pub use transfer::{TransferHandler, TransferOutcome, TransferReport};

/// Largest status [`exit_code_from`] passes through unchanged.
pub const MAX_EXIT_CODE: i32 = 255;

/// Runs the server CLI using the provided argument iterator and output handles.
///
/// Returns the process exit status: `0` after `--help`, `--version`, or a
/// graceful shutdown, and `1` when the command line, configuration, or any
/// listener fails.
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    let parsed = match cli::parse_args(arguments) {
        Ok(parsed) => parsed,
        Err(error) => {
            let _ = write!(stderr, "{error}");
            return FAILURE_EXIT_CODE;
        }
    };

    if parsed.show_help {
        return write_or_fail(stdout, &cli::render_help());
    }
    if parsed.show_version {
        return write_or_fail(stdout, &cli::render_version());
    }

    match serve(&parsed) {
        Ok(()) => 0,
        Err(error) => {
            let _ = writeln!(stderr, "{PROGRAM_NAME}: {error}");
            error.exit_code()
        }
    }
}

/// Converts a numeric exit code into an [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, MAX_EXIT_CODE);
    std::process::ExitCode::from(u8::try_from(clamped).unwrap_or(u8::MAX))
}

fn write_or_fail<Out: Write>(stdout: &mut Out, text: &str) -> i32 {
    if stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()).is_err() {
        return FAILURE_EXIT_CODE;
    }
    0
}

fn serve(parsed: &cli::ParsedArgs) -> Result<(), DaemonError> {
    let config = ConfigFile::from_file(&parsed.config_path)?;
    let settings = ServerSettings::from_config(&config)?;

    let mut log_config = LogConfig::new(VerbosityConfig::from_verbose_level(parsed.verbosity));
    if let Some(path) = settings.log_file() {
        log_config = log_config.with_log_file(path);
    }
    logging::init_tracing(&log_config)?;
    info!(
        target: "upload::listener",
        config = %parsed.config_path.display(),
        "configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;

    runtime.block_on(async move {
        let server = UploadServer::bind(settings).await?;
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!(target: "upload::listener", "interrupt received; shutting down");
                    shutdown.shutdown();
                }
                Err(error) => {
                    warn!(target: "upload::listener", %error, "cannot listen for interrupt signal");
                }
            }
        });
        server.run().await
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(args: &[&str]) -> (i32, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(args.iter().copied(), &mut stdout, &mut stderr);
        (
            status,
            String::from_utf8(stdout).expect("utf-8 stdout"),
            String::from_utf8(stderr).expect("utf-8 stderr"),
        )
    }

    #[test]
    fn help_goes_to_stdout_and_succeeds() {
        let (status, stdout, stderr) = run_with(&[PROGRAM_NAME, "--help"]);
        assert_eq!(status, 0);
        assert!(stdout.contains("--config"));
        assert!(stderr.is_empty());
    }

    #[test]
    fn version_goes_to_stdout_and_succeeds() {
        let (status, stdout, _) = run_with(&[PROGRAM_NAME, "--version"]);
        assert_eq!(status, 0);
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn unknown_option_fails() {
        let (status, stdout, stderr) = run_with(&[PROGRAM_NAME, "--bogus"]);
        assert_eq!(status, FAILURE_EXIT_CODE);
        assert!(stdout.is_empty());
        assert!(stderr.contains("--bogus"));
    }

    #[test]
    fn missing_config_file_fails_before_binding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.txt");
        let missing = missing.to_str().expect("utf-8 path");
        let (status, _, stderr) = run_with(&[PROGRAM_NAME, "--config", missing]);
        assert_eq!(status, FAILURE_EXIT_CODE);
        assert!(stderr.contains("absent.txt"));
    }

    #[test]
    fn incomplete_config_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.txt");
        std::fs::write(&path, "fileTransferPort=5000\n").expect("write config");
        let path = path.to_str().expect("utf-8 path");
        let (status, _, stderr) = run_with(&[PROGRAM_NAME, "--config", path]);
        assert_eq!(status, FAILURE_EXIT_CODE);
        assert!(stderr.contains("pingPort"));
    }
}
