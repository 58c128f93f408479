// src/session/log.rs

//! Append-only writer for `commands.log`.
//!
//! The poll loop (directives, `cd`, rejections) and the worker (shell output)
//! both append, so every write goes through one mutex around
//! open-append-close. Readers tail the file by byte offset and must never
//! observe half of a frame.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use regex::Regex;

use crate::protocol::ExitFrame;

const ANSI_PATTERN: &str = r"\x1B\[[0-?]*[ -/]*[@-~]";
const TRUNCATION_NOTICE: &str = "\n...[truncated]";

#[derive(Debug)]
pub struct OutputLog {
    path: PathBuf,
    keep_ansi: bool,
    max_chars: usize,
    ansi: Regex,
    lock: Mutex<()>,
}

impl OutputLog {
    /// `max_chars == 0` disables the per-append bound.
    pub fn new(path: impl Into<PathBuf>, keep_ansi: bool, max_chars: usize) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            keep_ansi,
            max_chars,
            ansi: Regex::new(ANSI_PATTERN).context("compiling ANSI escape pattern")?,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strip ANSI escapes (unless kept) and apply the size bound.
    pub fn sanitize(&self, text: &str) -> String {
        let text = if self.keep_ansi {
            text.to_string()
        } else {
            self.ansi.replace_all(text, "").into_owned()
        };

        if self.max_chars == 0 {
            return text;
        }
        match text.char_indices().nth(self.max_chars) {
            Some((cut, _)) => format!("{}{TRUNCATION_NOTICE}", &text[..cut]),
            None => text,
        }
    }

    /// Append one unit: sanitized text, then the frame if given.
    ///
    /// Trailing whitespace of the combined block is dropped and a single
    /// newline written, so a frame always ends its own line.
    pub fn append(&self, text: &str, frame: Option<ExitFrame>) -> Result<()> {
        let mut block = self.sanitize(text);
        if let Some(frame) = frame {
            block.push_str(&frame.render());
        }
        let trimmed = block.trim_end();
        self.write_locked(format!("{trimmed}\n").as_bytes())
    }

    /// Append one streamed output line.
    pub fn append_line(&self, line: &str) -> Result<()> {
        self.append(line, None)
    }

    pub fn append_frame(&self, frame: ExitFrame) -> Result<()> {
        self.append("", Some(frame))
    }

    /// Truncate the log to zero bytes.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard()?;
        fs::write(&self.path, b"").with_context(|| format!("truncating {:?}", self.path))
    }

    /// Current size in bytes (0 if the file does not exist yet).
    pub fn size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_context(|| format!("stat {:?}", self.path)),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("output log lock poisoned"))
    }

    fn write_locked(&self, bytes: &[u8]) -> Result<()> {
        let _guard = self.guard()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {:?}", self.path))?;
        file.write_all(bytes)
            .with_context(|| format!("appending to {:?}", self.path))?;
        Ok(())
    }
}
