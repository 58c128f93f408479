// src/logging.rs

//! Logging setup for `cmdwatch` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `CMDWATCH_LOG` environment variable, either a bare level ("debug") or
//!    a full filter directive ("cmdwatch::engine=trace,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR; the command output the client sees lives in the
//! session's output log, never in the daemon's own streams.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "CMDWATCH_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directive = resolve_directive(cli_level, std::env::var(LOG_ENV_VAR).ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter {directive:?}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Pick the filter directive from the CLI flag or the environment value.
pub fn resolve_directive(cli_level: Option<LogLevel>, env_value: Option<String>) -> String {
    if let Some(lvl) = cli_level {
        return level_name(lvl).to_string();
    }

    match env_value {
        Some(raw) if !raw.trim().is_empty() => {
            let raw = raw.trim();
            match parse_level_str(raw) {
                Some(lvl) => level_name(lvl).to_string(),
                None => raw.to_string(),
            }
        }
        _ => "info".to_string(),
    }
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

fn parse_level_str(s: &str) -> Option<LogLevel> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(LogLevel::Error),
        "warn" | "warning" => Some(LogLevel::Warn),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        "trace" => Some(LogLevel::Trace),
        _ => None,
    }
}
