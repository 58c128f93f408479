// src/exec/task_runner.rs

//! Run one shell job to completion.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::{RuntimeConfig, load_runtime_config};
use crate::exec::ShellJob;
use crate::exec::executor_loop::WorkerContext;
use crate::exec::router::{Route, route_command};
use crate::exec::script::{rewrite_python, run_script};
use crate::protocol::{ExitFrame, FAILURE_EXIT_CODE};

/// Run `job` and append its output and user frame to the log.
///
/// Failures before or while spawning are reported in the log as a single
/// error line with frame 1, so every accepted line still gets its frame.
pub async fn run_job(job: ShellJob, ctx: &WorkerContext) {
    let line = job.line.clone();
    let frame = match run_job_inner(&job, ctx).await {
        Ok(code) => {
            info!(cmd = %line, exit_code = code, "command finished");
            ctx.log.append_frame(ExitFrame::user(code))
        }
        Err(err) => {
            error!(cmd = %line, error = %format!("{err:#}"), "command failed to run");
            ctx.log.append(
                &format!("[ERROR] Failed to process command '{line}': {err:#}"),
                Some(ExitFrame::user(FAILURE_EXIT_CODE)),
            )
        }
    };

    if let Err(e) = frame {
        error!(cmd = %line, error = %e, "could not write exit frame");
    }

    // The poll loop may be gone during shutdown.
    let _ = ctx.refresh_tx.send(());
}

async fn run_job_inner(job: &ShellJob, ctx: &WorkerContext) -> Result<i32> {
    let file_cfg = match load_runtime_config(ctx.paths.runtime_config()) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable runtime config");
            None
        }
    };
    let effective = RuntimeConfig::resolve(file_cfg.as_ref(), &ctx.static_runtime)?;

    let script = rewrite_python(&job.line);
    let command = script.as_deref().unwrap_or(&job.line);

    let route = route_command(
        command,
        job,
        ctx.paths.root(),
        &effective,
        ctx.containers.as_ref(),
    )
    .await?;

    if let Some(note) = &route.annotation {
        ctx.log.append_line(note)?;
    }

    if script.is_some() {
        run_script(&route, ctx).await
    } else {
        stream_command(&route, ctx).await
    }
}

/// Spawn the routed command and stream merged stdout/stderr into the log.
async fn stream_command(route: &Route, ctx: &WorkerContext) -> Result<i32> {
    info!(cmd = %route.command, cwd = ?route.host_cwd, "starting command process");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&route.command)
        .current_dir(spawn_dir(route, ctx.paths.root()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning '{}'", route.command))?;

    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;

    let mut out = BufReader::new(stdout).split(b'\n');
    let mut err = BufReader::new(stderr).split(b'\n');
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let segment = tokio::select! {
            seg = out.next_segment(), if out_open => {
                let seg = seg.context("reading stdout")?;
                out_open = seg.is_some();
                seg
            }
            seg = err.next_segment(), if err_open => {
                let seg = seg.context("reading stderr")?;
                err_open = seg.is_some();
                seg
            }
        };

        if let Some(bytes) = segment {
            let text = String::from_utf8_lossy(&bytes);
            ctx.log.append_line(text.trim_end_matches('\r'))?;
        }
    }

    let status = child.wait().await.context("waiting for command process")?;
    Ok(exit_code(status))
}

/// Numeric exit code; signals map to `128 + signo` like a shell would.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// Directory to spawn in; falls back to the session root if the logical cwd
/// has disappeared since it was entered.
pub(crate) fn spawn_dir(route: &Route, root: &Path) -> PathBuf {
    if route.host_cwd.is_dir() {
        route.host_cwd.clone()
    } else {
        debug!(cwd = ?route.host_cwd, "working directory vanished; using session root");
        root.to_path_buf()
    }
}
