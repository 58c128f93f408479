// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmdwatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("path escapes session root: {0}")]
    PathEscape(String),

    #[error("invalid internal command: {0}")]
    InvalidDirective(String),

    #[error("unknown internal command: {0}")]
    UnknownDirective(String),

    #[error("staged file missing: {0}")]
    StagedFileMissing(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("sync failed: {0}")]
    Sync(String),

    #[error("sync timed out after {secs}s: {what}")]
    SyncTimeout { what: String, secs: u64 },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CmdwatchError>;
