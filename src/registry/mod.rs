// src/registry/mod.rs

//! File-based watcher discovery.
//!
//! Each running watcher keeps `<registry>/<watcher_id>.json` fresh; clients
//! mirror the registry directory and treat recently touched records as live.

pub mod heartbeat;
pub mod reader;

use std::time::{SystemTime, UNIX_EPOCH};

pub use heartbeat::{HeartbeatRecord, Registrar};
pub use reader::{DEFAULT_LIVENESS_TIMEOUT, WatcherInfo, load_active_watchers};

/// Seconds since the Unix epoch as a float, the registry's time format.
pub fn epoch_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
