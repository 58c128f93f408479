// src/registry/heartbeat.rs

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fs::write_atomic;
use crate::registry::epoch_secs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub display_name: String,
    pub last_heartbeat: f64,
}

/// Publishes and withdraws this watcher's heartbeat record.
#[derive(Debug, Clone)]
pub struct Registrar {
    path: PathBuf,
    display_name: String,
}

impl Registrar {
    pub fn new(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the record with the current time.
    pub fn beat(&self) -> Result<()> {
        self.beat_at(SystemTime::now())
    }

    pub fn beat_at(&self, now: SystemTime) -> Result<()> {
        let record = HeartbeatRecord {
            display_name: self.display_name.clone(),
            last_heartbeat: epoch_secs(now),
        };
        let json = serde_json::to_vec(&record).context("serialising heartbeat")?;
        write_atomic(&self.path, &json)?;
        debug!(path = ?self.path, "heartbeat written");
        Ok(())
    }

    /// Remove the record; a missing record is not an error.
    pub fn unregister(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = ?self.path, "unregistered watcher");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {:?}", self.path)),
        }
    }
}
