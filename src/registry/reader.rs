// src/registry/reader.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::registry::epoch_secs;

pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Timestamp keys accepted in heartbeat records, in order of preference.
const HEARTBEAT_KEYS: &[&str] = &["last_heartbeat", "last_seen", "heartbeat_ts"];

#[derive(Debug, Clone, PartialEq)]
pub struct WatcherInfo {
    pub watcher_id: String,
    pub display_name: String,
    pub last_heartbeat: f64,
}

/// List watchers whose heartbeat is younger than `timeout`, sorted by id.
///
/// Unparsable records are skipped. When two records resolve to the same
/// watcher id the fresher one wins. A missing directory yields an empty list.
pub fn load_active_watchers(
    registry_dir: &Path,
    timeout: Duration,
    now: SystemTime,
) -> Result<Vec<WatcherInfo>> {
    let entries = match fs::read_dir(registry_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let now_secs = epoch_secs(now);
    let mut live: BTreeMap<String, WatcherInfo> = BTreeMap::new();

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(info) = parse_record(&path) else {
            debug!(path = ?path, "skipping unreadable registry record");
            continue;
        };

        if now_secs - info.last_heartbeat > timeout.as_secs_f64() {
            debug!(watcher = %info.watcher_id, "skipping stale watcher");
            continue;
        }

        match live.get(&info.watcher_id) {
            Some(existing) if existing.last_heartbeat >= info.last_heartbeat => {}
            _ => {
                live.insert(info.watcher_id.clone(), info);
            }
        }
    }

    Ok(live.into_values().collect())
}

fn parse_record(path: &Path) -> Option<WatcherInfo> {
    let raw = fs::read_to_string(path).ok()?;
    let data: Value = serde_json::from_str(&raw).ok()?;
    let obj = data.as_object()?;

    let ts = match HEARTBEAT_KEYS.iter().find_map(|k| obj.get(*k)) {
        Some(value) => as_f64(value)?,
        None => epoch_secs(fs::metadata(path).ok()?.modified().ok()?),
    };

    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let watcher_id = obj
        .get("watcher_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(stem);
    if watcher_id.is_empty() {
        return None;
    }

    let display_name = obj
        .get("display_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| watcher_id.clone());

    Some(WatcherInfo {
        watcher_id,
        display_name,
        last_heartbeat: ts,
    })
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
