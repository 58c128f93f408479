// src/fs/paths.rs

//! Session-relative path handling.
//!
//! Every directive that names a file does so relative to the session root.
//! These helpers are purely lexical: they reject escapes before anything on
//! disk is touched.

use std::path::{Component, Path, PathBuf};

use crate::errors::{CmdwatchError, Result};

/// Validate a directive path argument and return it in normalised form.
///
/// Rejected:
/// - absolute paths (`/etc/passwd`, `C:\...`)
/// - any `..` component, even one that would stay inside the root
///
/// `.` components are dropped, so `"."` and `""` both mean the session root
/// and come back as an empty path.
pub fn validate_relative(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.contains('\0') {
        return Err(CmdwatchError::PathEscape(raw.to_string()));
    }

    let path = Path::new(raw);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(CmdwatchError::PathEscape(raw.to_string()));
            }
        }
    }
    Ok(clean)
}

/// Join a validated relative path onto the session root.
pub fn resolve_session_path(root: &Path, raw: &str) -> Result<PathBuf> {
    Ok(root.join(validate_relative(raw)?))
}

/// Resolve a `cd` target against the current session-relative cwd.
///
/// Unlike [`validate_relative`], `..` is allowed as long as the result stays
/// inside the root, and absolute targets are accepted when they point into
/// the root. Returns the new session-relative cwd.
pub fn normalize_within(root: &Path, cwd: &Path, target: &str) -> Result<PathBuf> {
    let target_path = Path::new(target);

    let (mut stack, rest): (Vec<PathBuf>, PathBuf) = if target_path.is_absolute() {
        let rel = relative_to_root(root, target_path)
            .ok_or_else(|| CmdwatchError::PathEscape(target.to_string()))?;
        (Vec::new(), rel)
    } else {
        let base = cwd
            .components()
            .filter_map(|c| match c {
                Component::Normal(p) => Some(PathBuf::from(p)),
                _ => None,
            })
            .collect();
        (base, target_path.to_path_buf())
    };

    for component in rest.components() {
        match component {
            Component::Normal(part) => stack.push(PathBuf::from(part)),
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(CmdwatchError::PathEscape(target.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CmdwatchError::PathEscape(target.to_string()));
            }
        }
    }

    Ok(stack.into_iter().collect())
}

/// Express an absolute path relative to `root`.
///
/// Tries a direct `strip_prefix` first; if that fails (symlinked roots,
/// `/private/var` style aliases) both sides are canonicalised and compared
/// again. Returns `None` if the path is not under `root`.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<PathBuf> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_path_buf());
    }

    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(rel.to_path_buf());
        }
    }

    None
}

/// Render a session-relative path with forward slashes (`.` for the root).
pub fn display_rel(rel: &Path) -> String {
    let s = rel.to_string_lossy().replace('\\', "/");
    if s.is_empty() { ".".to_string() } else { s }
}

/// True if `token` is usable as a single file name inside a staging dir.
pub fn is_plain_name(token: &str) -> bool {
    !token.is_empty()
        && token != "."
        && token != ".."
        && !token.contains('/')
        && !token.contains('\\')
        && !token.contains('\0')
}
