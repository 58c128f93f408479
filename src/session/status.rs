// src/session/status.rs

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs::write_atomic;

/// Prompt snapshot written to `.watcher_status.json` after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub user: String,
    pub host: String,
    /// Working directory as the command sees it (host path or container path).
    pub cwd: String,
    /// Same directory relative to the session root (`.` for the root).
    pub cwd_rel: String,
    pub conda_env: Option<String>,
    pub mode: String,
}

impl StatusRecord {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).context("serialising status record")?;
        write_atomic(path, &json)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
        serde_json::from_slice(&raw).with_context(|| format!("parsing {:?}", path))
    }
}

/// Login name of the watcher process.
pub fn current_user() -> String {
    whoami::username().unwrap_or_else(|_| "unknown".to_string())
}

/// Short host name (up to the first dot).
pub fn short_hostname() -> String {
    let full = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into());
    full.split('.').next().unwrap_or("unknown").to_string()
}

/// `uid:gid` of the watcher process, used for `docker -u`.
pub fn current_uid_gid() -> String {
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    format!("{uid}:{gid}")
}
