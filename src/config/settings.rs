// src/config/settings.rs

//! Watcher settings, read from the environment.
//!
//! The daemon is started by the client over ssh with everything it needs in
//! environment variables. [`WatcherSettings::from_lookup`] takes the lookup as
//! a closure so tests can feed a map instead of touching the process env.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::config::model::RuntimeConfig;
use crate::errors::{CmdwatchError, Result};
use crate::types::ExecMode;

pub const ENV_COMMANDS_DIR: &str = "COMMANDS_DIR";
pub const ENV_SESSIONS_ROOT: &str = "REMOTE_SESSIONS_ROOT";
pub const ENV_REGISTRY_DIR_NAME: &str = "REGISTRY_DIR_NAME";
pub const ENV_POLL_SEC: &str = "WATCHER_POLL_SEC";
pub const ENV_KEEP_ANSI: &str = "KEEP_ANSI";
pub const ENV_MAX_OUTPUT_CHARS: &str = "WATCHER_MAX_OUTPUT_CHARS";
pub const ENV_ALLOWED_CMDS: &str = "WATCHER_ALLOWED_CMDS";
pub const ENV_EXEC_MODE: &str = "WATCHER_EXEC_MODE";
pub const ENV_CONTAINER_NAME: &str = "WATCHER_CONTAINER_NAME";
pub const ENV_IMAGE: &str = "WATCHER_IMAGE";
pub const ENV_MOUNT_PATH: &str = "WATCHER_MOUNT_PATH";
pub const ENV_EXTRA_ARGS: &str = "WATCHER_EXTRA_ARGS";
pub const ENV_DOCKER_BIN: &str = "WATCHER_DOCKER_BIN";
pub const ENV_CONDA_DEFAULT_ENV: &str = "CONDA_DEFAULT_ENV";

pub const DEFAULT_REGISTRY_DIR_NAME: &str = "_registry";
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 200_000;
pub const DEFAULT_POLL_SEC: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Session directory this watcher is bound to (absolute).
    pub session_dir: PathBuf,
    /// Human-readable name published in the heartbeat record.
    pub display_name: String,
    /// Registry identity: the session directory's parent name.
    pub watcher_id: String,
    pub registry_dir: PathBuf,

    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub upload_expiry: Duration,

    pub keep_ansi: bool,
    /// 0 disables the bound.
    pub max_output_chars: usize,
    /// First shell token allow-list; empty allows everything.
    pub allowed_commands: Vec<String>,

    /// Routing settings used when the session has no runtime config mode.
    pub static_runtime: RuntimeConfig,
    pub docker_bin: String,
    /// Environment active at startup (`CONDA_DEFAULT_ENV`).
    pub initial_env: Option<String>,
}

impl WatcherSettings {
    /// Build settings from the process environment.
    pub fn from_env(display_name: &str) -> Result<Self> {
        Self::from_lookup(display_name, |key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(display_name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(CmdwatchError::ConfigError(
                "watcher display name must not be empty".to_string(),
            ));
        }

        let session_dir = match get(ENV_COMMANDS_DIR) {
            Some(dir) => absolutize(Path::new(&dir))?,
            None => std::env::current_dir()?,
        };

        let watcher_id = session_dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CmdwatchError::ConfigError(format!(
                    "cannot derive watcher id: {} has no parent directory",
                    session_dir.display()
                ))
            })?;

        let registry_name =
            get(ENV_REGISTRY_DIR_NAME).unwrap_or_else(|| DEFAULT_REGISTRY_DIR_NAME.to_string());
        let registry_dir = match get(ENV_SESSIONS_ROOT) {
            Some(root) => {
                let root = PathBuf::from(root);
                match root.parent() {
                    Some(parent) => parent.join(&registry_name),
                    None => root.join(&registry_name),
                }
            }
            None => {
                warn!(
                    "{} is not set; deriving registry location from the session directory",
                    ENV_SESSIONS_ROOT
                );
                session_dir
                    .ancestors()
                    .nth(3)
                    .unwrap_or(session_dir.as_path())
                    .join(&registry_name)
            }
        };

        let poll_secs = match get(ENV_POLL_SEC) {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                CmdwatchError::ConfigError(format!("{ENV_POLL_SEC} must be a number (got {raw:?})"))
            })?,
            None => DEFAULT_POLL_SEC,
        };
        if !poll_secs.is_finite() || poll_secs <= 0.0 {
            return Err(CmdwatchError::ConfigError(format!(
                "{ENV_POLL_SEC} must be > 0 (got {poll_secs})"
            )));
        }
        let poll_interval = Duration::try_from_secs_f64(poll_secs).map_err(|_| {
            CmdwatchError::ConfigError(format!("{ENV_POLL_SEC} is out of range (got {poll_secs})"))
        })?;

        let max_output_chars = match get(ENV_MAX_OUTPUT_CHARS) {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                CmdwatchError::ConfigError(format!(
                    "{ENV_MAX_OUTPUT_CHARS} must be a non-negative integer (got {raw:?})"
                ))
            })?,
            None => DEFAULT_MAX_OUTPUT_CHARS,
        };

        let allowed_commands = get(ENV_ALLOWED_CMDS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mode = match get(ENV_EXEC_MODE) {
            Some(raw) => Some(raw.parse::<ExecMode>().map_err(|e| {
                CmdwatchError::ConfigError(format!("{ENV_EXEC_MODE}: {e}"))
            })?),
            None => None,
        };

        let static_runtime = RuntimeConfig {
            mode,
            container_name: get(ENV_CONTAINER_NAME),
            image: get(ENV_IMAGE),
            mount_path: get(ENV_MOUNT_PATH),
            extra_args: get(ENV_EXTRA_ARGS),
        };

        // Surface bad static routing at startup rather than on first dispatch.
        RuntimeConfig::resolve(None, &static_runtime)?;

        Ok(Self {
            session_dir,
            display_name: display_name.to_string(),
            watcher_id,
            registry_dir,
            poll_interval,
            heartbeat_interval: Duration::from_secs(4),
            sweep_interval: Duration::from_secs(5 * 60),
            upload_expiry: Duration::from_secs(60 * 60),
            keep_ansi: get(ENV_KEEP_ANSI).as_deref() == Some("1"),
            max_output_chars,
            allowed_commands,
            static_runtime,
            docker_bin: get(ENV_DOCKER_BIN).unwrap_or_else(|| "docker".to_string()),
            initial_env: get(ENV_CONDA_DEFAULT_ENV),
        })
    }

    /// Path of the heartbeat record for this watcher.
    pub fn heartbeat_path(&self) -> PathBuf {
        self.registry_dir.join(format!("{}.json", self.watcher_id))
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
