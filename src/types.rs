use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where an accepted shell command is executed.
///
/// - `Host`: directly on the watcher's host, optionally inside a conda env.
/// - `DockerExec`: inside a long-lived named container, created on demand.
/// - `DockerRun`: inside a fresh container that is removed afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    Host,
    #[serde(alias = "container-exec", alias = "container_exec")]
    DockerExec,
    #[serde(alias = "container-run", alias = "container_run")]
    DockerRun,
}

impl ExecMode {
    pub fn is_container(self) -> bool {
        !matches!(self, ExecMode::Host)
    }

    pub fn label(self) -> &'static str {
        match self {
            ExecMode::Host => "host",
            ExecMode::DockerExec => "docker_exec",
            ExecMode::DockerRun => "docker_run",
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ExecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "host" => Ok(ExecMode::Host),
            "docker_exec" | "container_exec" => Ok(ExecMode::DockerExec),
            "docker_run" | "container_run" => Ok(ExecMode::DockerRun),
            other => Err(format!(
                "invalid execution mode: {other} (expected \"host\", \"docker_exec\" or \"docker_run\")"
            )),
        }
    }
}

/// Identity of one session: the watcher that owns it plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub watcher_id: String,
    pub session_name: String,
}

impl SessionKey {
    pub fn new(watcher_id: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self {
            watcher_id: watcher_id.into(),
            session_name: session_name.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.watcher_id, self.session_name)
    }
}
