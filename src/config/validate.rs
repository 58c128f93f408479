// src/config/validate.rs

use crate::config::model::{ClientConfig, RawClientConfig};
use crate::errors::{CmdwatchError, Result};

impl TryFrom<RawClientConfig> for ClientConfig {
    type Error = CmdwatchError;

    fn try_from(raw: RawClientConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ClientConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawClientConfig) -> Result<()> {
    validate_remote(cfg)?;
    validate_structure(cfg)?;
    validate_timing(cfg)?;
    Ok(())
}

fn validate_remote(cfg: &RawClientConfig) -> Result<()> {
    if cfg.remote.server.trim().is_empty() {
        return Err(CmdwatchError::ConfigError(
            "[remote].server must not be empty".to_string(),
        ));
    }

    if !cfg.remote.base_path.starts_with('/') {
        return Err(CmdwatchError::ConfigError(format!(
            "[remote].base_path must be an absolute path (got {:?})",
            cfg.remote.base_path
        )));
    }

    if cfg.local.mirror_dir.as_os_str().is_empty() {
        return Err(CmdwatchError::ConfigError(
            "[local].mirror_dir must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_structure(cfg: &RawClientConfig) -> Result<()> {
    for (key, value) in [
        ("sessions_dir_name", &cfg.structure.sessions_dir_name),
        ("registry_dir_name", &cfg.structure.registry_dir_name),
    ] {
        if !crate::fs::paths::is_plain_name(value) {
            return Err(CmdwatchError::ConfigError(format!(
                "[structure].{key} must be a single directory name (got {value:?})"
            )));
        }
    }

    if cfg.structure.sessions_dir_name == cfg.structure.registry_dir_name {
        return Err(CmdwatchError::ConfigError(
            "[structure] sessions and registry directories must differ".to_string(),
        ));
    }

    Ok(())
}

fn validate_timing(cfg: &RawClientConfig) -> Result<()> {
    if cfg.timing.log_fetch_interval_ms == 0 {
        return Err(CmdwatchError::ConfigError(
            "[timing].log_fetch_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.timing.heartbeat_timeout_sec == 0 {
        return Err(CmdwatchError::ConfigError(
            "[timing].heartbeat_timeout_sec must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}
