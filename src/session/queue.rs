// src/session/queue.rs

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::session::offset::OffsetStore;

/// One complete queue line and the byte offset just past its newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLine {
    pub text: String,
    pub end_offset: u64,
}

/// Tails the command queue from a persisted byte offset.
///
/// Only `\n`-terminated lines are returned; a partially written last line
/// stays in the file until its newline arrives. The offset never moves
/// backwards except when the queue is observed shorter than the offset
/// (the client truncated or replaced it), which resets it to zero.
#[derive(Debug)]
pub struct QueueReader {
    path: PathBuf,
    store: OffsetStore,
    offset: u64,
}

impl QueueReader {
    pub fn open(path: impl Into<PathBuf>, store: OffsetStore) -> Result<Self> {
        let offset = store.load()?;
        Ok(Self {
            path: path.into(),
            store,
            offset,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read all complete lines after the current offset without consuming them.
    pub fn pending(&mut self) -> Result<Vec<QueueLine>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("opening queue {:?}", self.path)),
        };

        let len = file
            .metadata()
            .with_context(|| format!("stat queue {:?}", self.path))?
            .len();

        if len < self.offset {
            info!(offset = self.offset, len, "command queue shrank; restarting from 0");
            self.commit(0)?;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)
            .with_context(|| format!("reading queue {:?}", self.path))?;

        let mut lines = Vec::new();
        let mut start = 0usize;
        for (idx, byte) in buf.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            let raw = &buf[start..idx];
            let text = String::from_utf8_lossy(raw)
                .trim_end_matches('\r')
                .to_string();
            lines.push(QueueLine {
                text,
                end_offset: self.offset + idx as u64 + 1,
            });
            start = idx + 1;
        }

        if start < buf.len() {
            debug!(bytes = buf.len() - start, "partial queue line pending");
        }
        Ok(lines)
    }

    /// Advance and persist the offset. Moving backwards is ignored.
    pub fn advance_to(&mut self, end_offset: u64) -> Result<()> {
        if end_offset <= self.offset {
            return Ok(());
        }
        self.commit(end_offset)
    }

    fn commit(&mut self, offset: u64) -> Result<()> {
        self.store.store(offset)?;
        self.offset = offset;
        Ok(())
    }
}
