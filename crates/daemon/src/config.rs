//! crates/daemon/src/config.rs
//!
//! Loader for the daemon's `key=value` configuration file and the typed
//! [`ServerSettings`] built from it.
//!
//! # Format
//!
//! ```text
//! # ports
//! fileTransferPort=5000
//! pingPort=5001
//!
//! # storage and bind address, selected by host OS
//! linuxPath=/srv/uploads
//! windowsPath=C:\uploads
//! linuxIp=0.0.0.0
//!
//! bufferSize=4096
//! maxConnections=64
//! exclusiveUploads=no
//! logFile=file_transfer_log.txt
//! ```
//!
//! A line contributes an entry only when it splits into exactly two parts on
//! `=`; anything else is skipped. Keys and values are trimmed and a later
//! entry for the same key replaces an earlier one.
//!
//! The two ports and the host OS save path are required. `bufferSize` falls
//! back to [`DEFAULT_BUFFER_SIZE`] and the host OS bind-IP key to `0.0.0.0`,
//! matching deployments whose files only carry the required keys. The
//! remaining keys switch optional features off when absent.
//!
//! # Example
//!
//! ```
//! use upload_daemon::{ConfigFile, ServerSettings};
//!
//! let config = ConfigFile::parse("fileTransferPort=5000\npingPort=5001\nlinuxPath=/srv\nwindowsPath=C:\\srv\n");
//! let settings = ServerSettings::from_config(&config)?;
//! assert_eq!(settings.transfer_addr().port(), 5000);
//! # Ok::<(), upload_daemon::ConfigError>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.txt";

/// Receive chunk size used when `bufferSize` is absent.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// How long a stopping listener waits for in-flight connections.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const TRANSFER_PORT_KEY: &str = "fileTransferPort";
const HEARTBEAT_PORT_KEY: &str = "pingPort";
const BUFFER_SIZE_KEY: &str = "bufferSize";
const MAX_CONNECTIONS_KEY: &str = "maxConnections";
const EXCLUSIVE_UPLOADS_KEY: &str = "exclusiveUploads";
const LOG_FILE_KEY: &str = "logFile";

#[cfg(windows)]
const SAVE_PATH_KEY: &str = "windowsPath";
#[cfg(not(windows))]
const SAVE_PATH_KEY: &str = "linuxPath";

#[cfg(windows)]
const BIND_IP_KEY: &str = "windowsIp";
#[cfg(not(windows))]
const BIND_IP_KEY: &str = "linuxIp";

/// Errors raised while loading or interpreting the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A required key is absent.
    #[error("missing required config key '{key}'")]
    MissingKey {
        /// Name of the key.
        key: String,
    },

    /// A key is present but its value is unusable.
    #[error("invalid value '{value}' for config key '{key}' at line {line}: {reason}")]
    InvalidValue {
        /// Name of the key.
        key: String,
        /// Raw value as written.
        value: String,
        /// 1-based line number of the entry.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
    value: String,
    line: usize,
}

/// Parsed `key=value` entries together with the directory they were read from.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigFile {
    entries: HashMap<String, Entry>,
    base_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Reads and parses the file at `path`.
    ///
    /// Relative paths found in the file are later resolved against the
    /// directory containing `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&contents);
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parses configuration text. Lines that are not `key=value` are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut entries = HashMap::new();
        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split('=');
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            entries.insert(
                key.trim().to_owned(),
                Entry {
                    value: value.trim().to_owned(),
                    line: index + 1,
                },
            );
        }
        Self {
            entries,
            base_dir: None,
        }
    }

    /// Returns the raw value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|entry| entry.value.as_str())
    }

    /// Returns the value for a required key.
    pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_owned(),
        })
    }

    /// Parses the value for a required key.
    pub fn get_int<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get_optional(key)?.ok_or_else(|| ConfigError::MissingKey {
            key: key.to_owned(),
        })
    }

    /// Parses the value for an optional key.
    pub fn get_optional<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        entry
            .value
            .parse::<T>()
            .map(Some)
            .map_err(|error| invalid(key, entry, error.to_string()))
    }

    /// Parses an optional yes/no style flag.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        match entry.value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(Some(true)),
            "no" | "false" | "0" => Ok(Some(false)),
            _ => Err(invalid(key, entry, "expected yes/no, true/false or 1/0")),
        }
    }

    /// Returns the save directory configured for the host OS.
    pub fn save_path(&self) -> Result<PathBuf, ConfigError> {
        let raw = self.get_str(SAVE_PATH_KEY)?;
        if raw.is_empty() {
            let entry = &self.entries[SAVE_PATH_KEY];
            return Err(invalid(SAVE_PATH_KEY, entry, "path must not be empty"));
        }
        Ok(self.resolve_path(raw))
    }

    /// Returns the bind address configured for the host OS.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        Ok(self
            .get_optional::<IpAddr>(BIND_IP_KEY)?
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }

    fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

fn invalid(key: &str, entry: &Entry, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: entry.value.clone(),
        line: entry.line,
        reason: reason.into(),
    }
}

/// Runtime settings injected into the server and its handlers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSettings {
    transfer_addr: SocketAddr,
    heartbeat_addr: SocketAddr,
    save_dir: PathBuf,
    buffer_size: NonZeroUsize,
    max_connections: Option<NonZeroUsize>,
    exclusive_uploads: bool,
    log_file: Option<PathBuf>,
    drain_timeout: Duration,
}

impl ServerSettings {
    /// Settings that store uploads in `save_dir` and bind ephemeral ports on
    /// all interfaces.
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            transfer_addr: any,
            heartbeat_addr: any,
            save_dir: save_dir.into(),
            buffer_size: NonZeroUsize::new(DEFAULT_BUFFER_SIZE).unwrap_or(NonZeroUsize::MIN),
            max_connections: None,
            exclusive_uploads: false,
            log_file: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Builds settings from a parsed configuration file.
    pub fn from_config(config: &ConfigFile) -> Result<Self, ConfigError> {
        let transfer_port: u16 = config.get_int(TRANSFER_PORT_KEY)?;
        let heartbeat_port: u16 = config.get_int(HEARTBEAT_PORT_KEY)?;
        let ip = config.bind_ip()?;
        let save_dir = config.save_path()?;

        let buffer_size = match config.get_optional::<usize>(BUFFER_SIZE_KEY)? {
            None => None,
            Some(size) => Some(NonZeroUsize::new(size).ok_or_else(|| {
                invalid(BUFFER_SIZE_KEY, &config.entries[BUFFER_SIZE_KEY], "must be greater than zero")
            })?),
        };

        let max_connections = config
            .get_optional::<usize>(MAX_CONNECTIONS_KEY)?
            .and_then(NonZeroUsize::new);
        let exclusive_uploads = config.get_bool(EXCLUSIVE_UPLOADS_KEY)?.unwrap_or(false);
        let log_file = config
            .get(LOG_FILE_KEY)
            .filter(|value| !value.is_empty())
            .map(|value| config.resolve_path(value));

        let mut settings = Self::new(save_dir)
            .with_transfer_addr(SocketAddr::new(ip, transfer_port))
            .with_heartbeat_addr(SocketAddr::new(ip, heartbeat_port))
            .with_max_connections(max_connections)
            .with_exclusive_uploads(exclusive_uploads);
        if let Some(size) = buffer_size {
            settings = settings.with_buffer_size(size);
        }
        if let Some(path) = log_file {
            settings = settings.with_log_file(path);
        }
        Ok(settings)
    }

    /// Sets the address of the transfer listener.
    pub fn with_transfer_addr(mut self, addr: SocketAddr) -> Self {
        self.transfer_addr = addr;
        self
    }

    /// Sets the address of the heartbeat listener.
    pub fn with_heartbeat_addr(mut self, addr: SocketAddr) -> Self {
        self.heartbeat_addr = addr;
        self
    }

    /// Sets the receive chunk size.
    pub fn with_buffer_size(mut self, size: NonZeroUsize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Bounds live connections per listener. `None` means unbounded.
    pub fn with_max_connections(mut self, limit: Option<NonZeroUsize>) -> Self {
        self.max_connections = limit;
        self
    }

    /// Serialises uploads that target the same file name.
    pub fn with_exclusive_uploads(mut self, enabled: bool) -> Self {
        self.exclusive_uploads = enabled;
        self
    }

    /// Mirrors log output into `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Sets how long shutdown waits for in-flight connections.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Address of the transfer listener.
    pub fn transfer_addr(&self) -> SocketAddr {
        self.transfer_addr
    }

    /// Address of the heartbeat listener.
    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.heartbeat_addr
    }

    /// Directory uploads are stored in.
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Receive chunk size in bytes.
    pub fn buffer_size(&self) -> NonZeroUsize {
        self.buffer_size
    }

    /// Live connection bound per listener.
    pub fn max_connections(&self) -> Option<NonZeroUsize> {
        self.max_connections
    }

    /// Whether same-name uploads are serialised.
    pub fn exclusive_uploads(&self) -> bool {
        self.exclusive_uploads
    }

    /// Optional log file.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Shutdown drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}
