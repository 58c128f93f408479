// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! Most watcher settings come from the environment (see
//! [`crate::config::WatcherSettings`]); only the display name and log level
//! are flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for the `cmdwatch` watcher daemon.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdwatch",
    version,
    about = "Execute queued commands for a remote control panel.",
    long_about = None
)]
pub struct CliArgs {
    /// Display name published in the watcher registry.
    #[arg(long, value_name = "NAME")]
    pub name: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Command-line arguments for `cmdwatch-ctl`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdwatch-ctl",
    version,
    about = "Drive cmdwatch watchers over ssh + rsync.",
    long_about = None
)]
pub struct CtlArgs {
    /// Path to the client config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "cmdwatch.toml")]
    pub config: PathBuf,

    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: CtlCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CtlCommand {
    /// List watchers whose heartbeat is fresh.
    Watchers,

    /// Append lines to a session's command queue.
    Send {
        watcher: String,
        session: String,
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Print a session's output log, optionally following it.
    Tail {
        watcher: String,
        session: String,
        #[arg(long)]
        follow: bool,
    },

    /// Stage a remote file and fetch it.
    Download {
        watcher: String,
        session: String,
        remote_path: String,
        local_path: PathBuf,
    },

    /// Upload a local file into the session through the staging area.
    Upload {
        watcher: String,
        session: String,
        local_path: PathBuf,
        remote_path: String,
    },

    /// Mirror the whole session directory to the local mirror.
    Sync {
        watcher: String,
        session: String,
        #[arg(long)]
        delete: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

pub fn parse_ctl() -> CtlArgs {
    CtlArgs::parse()
}
