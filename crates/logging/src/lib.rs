#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` installs the process-wide [`tracing`] subscriber used by the
//! upload server. Every component logs through the standard `tracing` macros
//! under an `upload::*` target; this crate decides where those events go and
//! how much of them is kept.
//!
//! # Design
//!
//! - [`VerbosityConfig`] maps the number of `-v` flags to a level filter.
//! - [`LogConfig`] bundles verbosity with an optional append-only log file.
//! - [`init_tracing`] installs a console layer, plus a plain-text file layer
//!   when a log file is configured. `RUST_LOG` overrides the verbosity-derived
//!   filter when set.
//!
//! # Examples
//!
//! ```
//! use logging::{LogConfig, VerbosityConfig};
//!
//! let config = LogConfig::new(VerbosityConfig::from_verbose_level(1));
//! assert_eq!(config.verbosity().directive(), "debug");
//! assert!(config.log_file().is_none());
//! ```

mod subscriber;
mod verbosity;

pub use subscriber::{LogConfig, LoggingError, init_tracing};
pub use verbosity::VerbosityConfig;
