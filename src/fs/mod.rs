// src/fs/mod.rs

//! Filesystem helpers shared by the watcher.
//!
//! Everything the client may read concurrently (status record, heartbeat,
//! staged files, delivered uploads) is written through a sibling temp file
//! and renamed into place, so a mirror never picks up half a file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

pub mod paths;

pub use paths::{normalize_within, resolve_session_path, validate_relative};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path for `target`, unique within this process.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(".{name}.tmp-{}-{seq}", std::process::id());
    match target.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
    }
    Ok(())
}

/// Write `contents` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_path_for(path);

    let result = (|| -> Result<()> {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("creating temp file {:?}", tmp))?;
        file.write_all(contents)
            .with_context(|| format!("writing temp file {:?}", tmp))?;
        file.sync_all().ok();
        fs::rename(&tmp, path).with_context(|| format!("renaming {:?} -> {:?}", tmp, path))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Copy `src` over `dst` via temp file + rename; `dst` is never written in place.
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst)?;
    let tmp = temp_path_for(dst);

    let result = (|| -> Result<()> {
        fs::copy(src, &tmp).with_context(|| format!("copying {:?} -> {:?}", src, tmp))?;
        fs::rename(&tmp, dst).with_context(|| format!("renaming {:?} -> {:?}", tmp, dst))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
