// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CmdwatchError, Result};
use crate::types::{ExecMode, SessionKey};

pub const DEFAULT_MOUNT_PATH: &str = "/workspace";

/// Per-session runtime configuration (`.runner_config.json`).
///
/// Written by the client, read by the watcher before every dispatch:
///
/// ```json
/// {
///   "mode": "docker_exec",
///   "container_name": "dev",
///   "image": "python:3.12",
///   "mount_path": "/workspace",
///   "extra_args": "--gpus all"
/// }
/// ```
///
/// The panel writes empty strings for unset fields; those count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: Option<ExecMode>,

    #[serde(default)]
    pub container_name: Option<String>,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub mount_path: Option<String>,

    /// Extra `docker` arguments as one shell-quoted string.
    #[serde(default)]
    pub extra_args: Option<String>,
}

/// Fully resolved routing parameters for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRuntime {
    pub mode: ExecMode,
    pub container_name: Option<String>,
    pub image: Option<String>,
    pub mount_path: String,
    pub extra_args: Vec<String>,
}

impl Default for EffectiveRuntime {
    fn default() -> Self {
        Self {
            mode: ExecMode::Host,
            container_name: None,
            image: None,
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            extra_args: Vec::new(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RuntimeConfig {
    /// Combine the session file with the watcher's static settings.
    ///
    /// Priority: an explicit `mode` in the session file wins, then a mode
    /// from the static settings, then plain host. Individual fields missing
    /// from the winning source fall back to the other one.
    pub fn resolve(file: Option<&RuntimeConfig>, fallback: &RuntimeConfig) -> Result<EffectiveRuntime> {
        let empty = RuntimeConfig::default();
        let file = file.unwrap_or(&empty);

        let (primary, secondary, mode) = match (file.mode, fallback.mode) {
            (Some(mode), _) => (file, fallback, mode),
            (None, Some(mode)) => (fallback, file, mode),
            (None, None) => (file, fallback, ExecMode::Host),
        };

        let pick = |f: fn(&RuntimeConfig) -> &Option<String>| {
            non_empty(f(primary)).or_else(|| non_empty(f(secondary)))
        };

        let mount_path = pick(|c| &c.mount_path).unwrap_or_else(|| DEFAULT_MOUNT_PATH.to_string());
        if !mount_path.starts_with('/') {
            return Err(CmdwatchError::ConfigError(format!(
                "mount_path must be absolute (got {mount_path:?})"
            )));
        }

        let extra_args = match pick(|c| &c.extra_args) {
            Some(raw) => shell_words::split(&raw).map_err(|e| {
                CmdwatchError::ConfigError(format!("cannot parse extra_args {raw:?}: {e}"))
            })?,
            None => Vec::new(),
        };

        let trimmed = mount_path.trim_end_matches('/');
        let mount_path = if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() };

        Ok(EffectiveRuntime {
            mode,
            container_name: pick(|c| &c.container_name),
            image: pick(|c| &c.image),
            mount_path,
            extra_args,
        })
    }
}

/// Client configuration as read from TOML, before validation.
///
/// ```toml
/// [remote]
/// server = "me@build-box"
/// base_path = "/srv/cmdwatch"
///
/// [local]
/// mirror_dir = "/home/me/cmdwatch_mirror"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawClientConfig {
    pub remote: RemoteSection,

    pub local: LocalSection,

    #[serde(default)]
    pub structure: StructureSection,

    #[serde(default)]
    pub timing: TimingSection,
}

/// `[remote]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    /// rsync/ssh destination, e.g. `user@host`.
    pub server: String,
    /// Absolute directory on the remote host holding sessions and registry.
    pub base_path: String,
}

/// `[local]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSection {
    /// Local mirror of the remote base directory.
    pub mirror_dir: PathBuf,
}

/// `[structure]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StructureSection {
    #[serde(default = "default_sessions_dir_name")]
    pub sessions_dir_name: String,

    #[serde(default = "default_registry_dir_name")]
    pub registry_dir_name: String,
}

fn default_sessions_dir_name() -> String {
    "sessions".to_string()
}

fn default_registry_dir_name() -> String {
    "_registry".to_string()
}

impl Default for StructureSection {
    fn default() -> Self {
        Self {
            sessions_dir_name: default_sessions_dir_name(),
            registry_dir_name: default_registry_dir_name(),
        }
    }
}

/// `[timing]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_log_fetch_interval_ms")]
    pub log_fetch_interval_ms: u64,

    #[serde(default = "default_heartbeat_timeout_sec")]
    pub heartbeat_timeout_sec: u64,
}

fn default_log_fetch_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_timeout_sec() -> u64 {
    30
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            log_fetch_interval_ms: default_log_fetch_interval_ms(),
            heartbeat_timeout_sec: default_heartbeat_timeout_sec(),
        }
    }
}

/// Validated client configuration. Build it with `ClientConfig::try_from`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub remote: RemoteSection,
    pub local: LocalSection,
    pub structure: StructureSection,
    pub timing: TimingSection,
}

impl ClientConfig {
    pub(crate) fn new_unchecked(raw: RawClientConfig) -> Self {
        Self {
            remote: raw.remote,
            local: raw.local,
            structure: raw.structure,
            timing: raw.timing,
        }
    }

    pub fn log_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.timing.log_fetch_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.heartbeat_timeout_sec)
    }

    fn remote_base(&self) -> &str {
        self.remote.base_path.trim_end_matches('/')
    }

    /// `<base>/<sessions>/<watcher>/<session>` on the remote host (no trailing slash).
    pub fn remote_session_dir(&self, key: &SessionKey) -> String {
        format!(
            "{}/{}/{}/{}",
            self.remote_base(),
            self.structure.sessions_dir_name,
            key.watcher_id,
            key.session_name
        )
    }

    pub fn remote_registry_dir(&self) -> String {
        format!("{}/{}", self.remote_base(), self.structure.registry_dir_name)
    }

    pub fn local_session_dir(&self, key: &SessionKey) -> PathBuf {
        self.local
            .mirror_dir
            .join(&self.structure.sessions_dir_name)
            .join(&key.watcher_id)
            .join(&key.session_name)
    }

    pub fn local_registry_dir(&self) -> PathBuf {
        self.local.mirror_dir.join(&self.structure.registry_dir_name)
    }
}
