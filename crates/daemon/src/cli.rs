//! crates/daemon/src/cli.rs
//!
//! Command-line parsing for `upload-server`.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, builder::PathBufValueParser};

use crate::config::DEFAULT_CONFIG_PATH;

/// Name the binary reports in help and version output.
pub const PROGRAM_NAME: &str = "upload-server";

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ParsedArgs {
    pub(crate) show_help: bool,
    pub(crate) show_version: bool,
    pub(crate) config_path: PathBuf,
    pub(crate) verbosity: u8,
}

fn clap_command() -> Command {
    Command::new(PROGRAM_NAME)
        .about("Resumable TCP file upload server with a ping/pong heartbeat port.")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .help("Show this help message and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .short('V')
                .help("Output version information and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .help("Read settings from PATH instead of ./config.txt.")
                .value_parser(PathBufValueParser::new()),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Increase log detail; repeat for more.")
                .action(ArgAction::Count),
        )
}

pub(crate) fn parse_args<I, S>(arguments: I) -> Result<ParsedArgs, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();
    if args.is_empty() {
        args.push(OsString::from(PROGRAM_NAME));
    }

    let mut matches = clap_command().try_get_matches_from(args)?;

    Ok(ParsedArgs {
        show_help: matches.get_flag("help"),
        show_version: matches.get_flag("version"),
        config_path: matches
            .remove_one::<PathBuf>("config")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        verbosity: matches.get_count("verbose"),
    })
}

pub(crate) fn render_help() -> String {
    clap_command().render_help().to_string()
}

pub(crate) fn render_version() -> String {
    format!("{PROGRAM_NAME} {}\n", env!("CARGO_PKG_VERSION"))
}
