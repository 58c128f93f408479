// src/transfer/mod.rs

//! Watcher half of staged file transfers.
//!
//! Downloads: a session file is copied atomically into the single download
//! slot, where the client's next pull picks it up. Uploads: the client pushes
//! the file into `.staged_uploads/<token>` and then queues a move directive;
//! the watcher waits briefly for the token to appear and replaces the
//! destination atomically.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::errors::{CmdwatchError, Result};
use crate::fs::copy_atomic;
use crate::fs::paths::{display_rel, is_plain_name, resolve_session_path, validate_relative};
use crate::session::SessionPaths;

/// How long `move_staged_file` waits for the pushed file to show up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadWait {
    pub retries: u32,
    pub interval: Duration,
}

impl Default for UploadWait {
    fn default() -> Self {
        Self {
            retries: 20,
            interval: Duration::from_millis(250),
        }
    }
}

/// Offer `rel` for download. A previous unclaimed offer is replaced.
pub fn stage_for_download(paths: &SessionPaths, rel: &str) -> Result<PathBuf> {
    let source = resolve_session_path(paths.root(), rel)?;
    let meta = fs::metadata(&source)
        .map_err(|_| CmdwatchError::NotAFile(rel.to_string()))?;
    if !meta.is_file() {
        return Err(CmdwatchError::NotAFile(rel.to_string()));
    }

    let slot = paths.download_slot();
    copy_atomic(&source, &slot)?;
    info!(source = %rel, bytes = meta.len(), "staged file for download");
    Ok(slot)
}

/// Deliver an uploaded file from the staging area to `rel`.
pub async fn move_staged_file(
    paths: &SessionPaths,
    token: &str,
    rel: &str,
    wait: UploadWait,
) -> Result<PathBuf> {
    if !is_plain_name(token) {
        return Err(CmdwatchError::PathEscape(token.to_string()));
    }
    let rel_path = validate_relative(rel)?;
    if rel_path.as_os_str().is_empty() {
        return Err(CmdwatchError::InvalidDirective(
            "upload destination must name a file".to_string(),
        ));
    }
    let dest = paths.root().join(&rel_path);
    let staged = paths.staged_upload(token);

    if !wait_for_file(&staged, wait).await {
        warn!(token, "staged upload never arrived");
        return Err(CmdwatchError::StagedFileMissing(token.to_string()));
    }

    copy_atomic(&staged, &dest)?;
    if let Err(e) = fs::remove_file(&staged) {
        warn!(token, error = %e, "could not remove staged upload");
    }

    info!(token, dest = %display_rel(&rel_path), "delivered staged upload");
    Ok(dest)
}

async fn wait_for_file(path: &Path, wait: UploadWait) -> bool {
    for attempt in 0..=wait.retries {
        if path.is_file() {
            return true;
        }
        if attempt < wait.retries {
            debug!(attempt, path = ?path, "waiting for staged upload");
            tokio::time::sleep(wait.interval).await;
        }
    }
    false
}

/// Delete staged uploads older than `max_age`. Returns how many were removed.
pub fn sweep_expired(staging_dir: &Path, max_age: Duration, now: SystemTime) -> Result<usize> {
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified = meta.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "could not remove expired upload"),
            }
        }
    }

    if removed > 0 {
        info!(removed, "swept expired staged uploads");
    }
    Ok(removed)
}
