//! crates/logging/src/verbosity.rs
//! Verbosity levels selected by repeated `-v` flags.

use tracing::level_filters::LevelFilter;

/// Verbosity requested on the command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VerbosityConfig {
    level: u8,
}

impl VerbosityConfig {
    /// Creates a configuration from the number of `-v` flags (0-255).
    ///
    /// Level 0 keeps the connection-level events the server always reports,
    /// level 1 adds per-session detail such as each received ping, and level 2
    /// and above enables trace output.
    #[must_use]
    pub const fn from_verbose_level(level: u8) -> Self {
        Self { level }
    }

    /// Returns the raw verbose level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.level
    }

    /// Returns the most verbose level that will be recorded.
    #[must_use]
    pub const fn max_level(self) -> LevelFilter {
        match self.level {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Returns the filter directive equivalent to [`Self::max_level`].
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self.level {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
