// src/exec/docker.rs

//! Container lifecycle behind a trait.
//!
//! The router only needs to know whether a named container is running,
//! stopped or absent, and to create or start it. The watcher also caches
//! image and container names for the client. Production talks to the
//! `docker` CLI; tests plug in an in-memory fake.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{CmdwatchError, Result};
use crate::exec::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Absent,
}

/// Everything needed to create a long-lived container for exec mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Session root on the host, bind-mounted at `mount_path`.
    pub host_root: PathBuf,
    pub mount_path: String,
    /// `uid:gid` the container runs as.
    pub user: String,
    pub extra_args: Vec<String>,
}

impl ContainerSpec {
    /// Arguments (without the program) for `docker run -d ... tail -f /dev/null`.
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-v".to_string(),
            format!("{}:{}", self.host_root.display(), self.mount_path),
            "-u".to_string(),
            self.user.clone(),
            "-w".to_string(),
            self.mount_path.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(self.image.clone());
        args.extend(["tail", "-f", "/dev/null"].map(String::from));
        args
    }
}

pub trait ContainerRuntime: Send + Sync {
    /// Program name used when composing `exec`/`run` command lines.
    fn program(&self) -> &str;

    fn inspect<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ContainerState>>;

    fn create_detached<'a>(&'a self, spec: &'a ContainerSpec) -> BoxFuture<'a, Result<()>>;

    fn start<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Image names as `repository:tag`, untagged images omitted.
    fn list_images(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Names of all containers, running or not.
    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// `ContainerRuntime` backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[String]) -> Result<(bool, String, String)> {
        debug!(bin = %self.bin, ?args, "invoking container CLI");
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CmdwatchError::Container(format!("cannot run {}: {e}", self.bin)))?;

        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }

    async fn run_checked(&self, args: &[String]) -> Result<String> {
        let (ok, stdout, stderr) = self.run(args).await?;
        if !ok {
            return Err(CmdwatchError::Container(format!(
                "{} {} failed: {}",
                self.bin,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr
            )));
        }
        Ok(stdout)
    }
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

impl ContainerRuntime for DockerCli {
    fn program(&self) -> &str {
        &self.bin
    }

    fn inspect<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ContainerState>> {
        Box::pin(async move {
            let (ok, stdout, _) = self
                .run(&to_args(&["inspect", "-f", "{{.State.Running}}", name]))
                .await?;
            if !ok {
                return Ok(ContainerState::Absent);
            }
            Ok(match stdout.trim() {
                "true" => ContainerState::Running,
                _ => ContainerState::Stopped,
            })
        })
    }

    fn create_detached<'a>(&'a self, spec: &'a ContainerSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run_checked(&spec.create_args()).await?;
            info!(container = %spec.name, image = %spec.image, "created container");
            Ok(())
        })
    }

    fn start<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run_checked(&to_args(&["start", name])).await?;
            info!(container = %name, "started container");
            Ok(())
        })
    }

    fn list_images(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let stdout = self
                .run_checked(&to_args(&["images", "--format", "{{.Repository}}:{{.Tag}}"]))
                .await?;
            Ok(non_empty_lines(&stdout)
                .filter(|l| !l.contains("<none>"))
                .collect())
        })
    }

    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let stdout = self
                .run_checked(&to_args(&["ps", "-a", "--format", "{{.Names}}"]))
                .await?;
            Ok(non_empty_lines(&stdout).collect())
        })
    }
}
