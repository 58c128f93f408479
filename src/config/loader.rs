// src/config/loader.rs

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::config::model::{ClientConfig, RawClientConfig, RuntimeConfig};
use crate::errors::Result;

/// Read the client TOML without semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawClientConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawClientConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load and validate the client configuration.
///
/// This is the entry point the control binary uses; everything downstream
/// works with a [`ClientConfig`] and can assume the server name is set, the
/// remote base is absolute and the intervals are non-zero.
pub fn load_client_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let raw = load_from_path(&path)?;
    ClientConfig::try_from(raw)
}

/// Read `.runner_config.json` from a session directory.
///
/// A missing file yields `Ok(None)`: the session simply has no override yet.
/// A present but malformed file is an error so the caller can log it and
/// fall back to the static settings.
pub fn load_runtime_config(path: impl AsRef<Path>) -> Result<Option<RuntimeConfig>> {
    let contents = match fs::read_to_string(path.as_ref()) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    let config: RuntimeConfig = serde_json::from_str(&contents)?;
    Ok(Some(config))
}
