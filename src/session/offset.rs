// src/session/offset.rs

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use crate::fs::write_atomic;

/// Byte position in `commands.txt` up to which lines have been consumed.
#[derive(Debug, Clone)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored offset. Missing file means 0; garbage means 0 and the
    /// file is rewritten.
    pub fn load(&self) -> Result<u64> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("reading {:?}", self.path)),
        };

        match raw.trim().parse::<u64>() {
            Ok(offset) => Ok(offset),
            Err(_) => {
                warn!(path = ?self.path, content = %raw.trim(), "unreadable read offset; resetting to 0");
                self.store(0)?;
                Ok(0)
            }
        }
    }

    pub fn store(&self, offset: u64) -> Result<()> {
        write_atomic(&self.path, offset.to_string().as_bytes())
    }
}
