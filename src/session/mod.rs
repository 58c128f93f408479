// src/session/mod.rs

//! On-disk layout of one session directory.
//!
//! - [`offset`] persists the queue read position.
//! - [`queue`] tails `commands.txt` line by line.
//! - [`log`] appends framed output to `commands.log`.
//! - [`status`] writes the `.watcher_status.json` snapshot.

pub mod log;
pub mod offset;
pub mod queue;
pub mod status;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::protocol::files;

pub use log::OutputLog;
pub use offset::OffsetStore;
pub use queue::{QueueLine, QueueReader};
pub use status::StatusRecord;

/// Paths of every per-session file, rooted at the session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue(&self) -> PathBuf {
        self.root.join(files::COMMAND_QUEUE)
    }

    pub fn output_log(&self) -> PathBuf {
        self.root.join(files::OUTPUT_LOG)
    }

    pub fn read_offset(&self) -> PathBuf {
        self.root.join(files::READ_OFFSET)
    }

    pub fn status(&self) -> PathBuf {
        self.root.join(files::STATUS)
    }

    pub fn runtime_config(&self) -> PathBuf {
        self.root.join(files::RUNTIME_CONFIG)
    }

    pub fn ls_result(&self) -> PathBuf {
        self.root.join(files::LS_RESULT)
    }

    pub fn upload_staging_dir(&self) -> PathBuf {
        self.root.join(files::UPLOAD_STAGING_DIR)
    }

    pub fn staged_upload(&self, token: &str) -> PathBuf {
        self.upload_staging_dir().join(token)
    }

    pub fn download_slot(&self) -> PathBuf {
        self.root.join(files::DOWNLOAD_SLOT)
    }

    pub fn docker_images(&self) -> PathBuf {
        self.root.join(files::DOCKER_IMAGES)
    }

    pub fn docker_containers(&self) -> PathBuf {
        self.root.join(files::DOCKER_CONTAINERS)
    }

    pub fn script_output(&self) -> PathBuf {
        self.root.join(files::SCRIPT_OUTPUT)
    }

    /// Create the session directory and the files the client expects to find.
    ///
    /// Existing files are left untouched; a restarted watcher resumes from
    /// the persisted offset.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating session dir {:?}", self.root))?;
        fs::create_dir_all(self.upload_staging_dir())
            .with_context(|| format!("creating staging dir {:?}", self.upload_staging_dir()))?;

        for path in [self.queue(), self.output_log()] {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("creating {:?}", path))?;
        }
        Ok(())
    }
}
