// src/exec/router.rs

//! Resolve a command line into what actually gets spawned.
//!
//! The result is always a host shell line run with `sh -c`; container modes
//! wrap the user's command into a `docker exec`/`docker run` invocation.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::EffectiveRuntime;
use crate::errors::{CmdwatchError, Result};
use crate::exec::ShellJob;
use crate::exec::docker::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::session::status::current_uid_gid;
use crate::types::ExecMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Final host shell line.
    pub command: String,
    /// Notice to log before the command output (container created/started).
    pub annotation: Option<String>,
    /// Directory the host process is spawned in.
    pub host_cwd: PathBuf,
}

/// Wrap a string in single quotes for POSIX sh.
pub fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// True for an environment that needs explicit activation.
fn needs_activation(env: &str) -> bool {
    !env.is_empty() && env != "base"
}

/// Container-side working directory: mount path joined with the logical cwd.
pub fn container_workdir(mount_path: &str, cwd_rel: &Path) -> String {
    let rel = cwd_rel.to_string_lossy().replace('\\', "/");
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        mount_path.to_string()
    } else if mount_path.ends_with('/') {
        format!("{mount_path}{rel}")
    } else {
        format!("{mount_path}/{rel}")
    }
}

/// Build the route for `command` (the job's line, possibly rewritten).
pub async fn route_command(
    command: &str,
    job: &ShellJob,
    session_root: &Path,
    runtime: &EffectiveRuntime,
    containers: &dyn ContainerRuntime,
) -> Result<Route> {
    let host_cwd = session_root.join(&job.cwd_rel);
    let workdir = container_workdir(&runtime.mount_path, &job.cwd_rel);

    let route = match runtime.mode {
        ExecMode::Host => {
            let command = match job.env.as_deref() {
                Some(env) if needs_activation(env) => format!(
                    "eval \"$(conda shell.posix hook)\" && conda activate {} && {command}",
                    single_quote(env)
                ),
                _ => command.to_string(),
            };
            Route {
                command,
                annotation: None,
                host_cwd,
            }
        }

        ExecMode::DockerExec => {
            let name = runtime.container_name.as_deref().ok_or_else(|| {
                CmdwatchError::Container("docker_exec mode requires a container name".to_string())
            })?;

            let annotation = match containers.inspect(name).await? {
                ContainerState::Running => None,
                ContainerState::Stopped => {
                    containers.start(name).await?;
                    Some(format!("[Watcher] Started container '{name}'"))
                }
                ContainerState::Absent => {
                    let image = runtime.image.as_deref().ok_or_else(|| {
                        CmdwatchError::Container(format!(
                            "container '{name}' does not exist and no image is configured"
                        ))
                    })?;
                    let spec = ContainerSpec {
                        name: name.to_string(),
                        image: image.to_string(),
                        host_root: session_root.to_path_buf(),
                        mount_path: runtime.mount_path.clone(),
                        user: current_uid_gid(),
                        extra_args: runtime.extra_args.clone(),
                    };
                    containers.create_detached(&spec).await?;
                    Some(format!("[Watcher] Created container '{name}' from image '{image}'"))
                }
            };

            let prefix = shell_words::join([containers.program(), "exec", "-w", &workdir, name]);
            Route {
                command: format!("{prefix} sh -c {}", single_quote(command)),
                annotation,
                host_cwd: session_root.to_path_buf(),
            }
        }

        ExecMode::DockerRun => {
            let image = runtime.image.as_deref().ok_or_else(|| {
                CmdwatchError::Container("docker_run mode requires an image".to_string())
            })?;

            let mut args: Vec<String> = vec![
                containers.program().to_string(),
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:{}", session_root.display(), runtime.mount_path),
                "-u".to_string(),
                current_uid_gid(),
                "-w".to_string(),
                workdir,
            ];
            args.extend(runtime.extra_args.iter().cloned());
            args.push(image.to_string());

            Route {
                command: format!("{} sh -c {}", shell_words::join(&args), single_quote(command)),
                annotation: None,
                host_cwd: session_root.to_path_buf(),
            }
        }
    };

    debug!(mode = %runtime.mode, command = %route.command, "routed command");
    Ok(route)
}
