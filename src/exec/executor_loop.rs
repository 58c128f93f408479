// src/exec/executor_loop.rs

//! The single shell worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::exec::ShellJob;
use crate::exec::docker::ContainerRuntime;
use crate::exec::task_runner::run_job;
use crate::session::{OutputLog, SessionPaths};

/// Jobs waiting beyond this block the poll loop until the worker catches up.
pub const JOB_QUEUE_CAPACITY: usize = 64;

/// Everything the worker needs; shared read-only with the poll loop.
///
/// The worker never sees the interpreter state itself, only the snapshot
/// carried by each job.
pub struct WorkerContext {
    pub paths: SessionPaths,
    pub log: Arc<OutputLog>,
    pub containers: Arc<dyn ContainerRuntime>,
    /// Routing settings from the environment, used under the session file.
    pub static_runtime: RuntimeConfig,
    /// Asks the poll loop to rewrite the status record.
    pub refresh_tx: mpsc::UnboundedSender<()>,
}

/// Spawn the background worker and return its job sender.
///
/// Jobs run strictly in submission order, one at a time. The worker exits
/// once every sender has been dropped.
pub fn spawn_executor(ctx: Arc<WorkerContext>) -> mpsc::Sender<ShellJob> {
    let (tx, mut rx) = mpsc::channel::<ShellJob>(JOB_QUEUE_CAPACITY);

    tokio::spawn(async move {
        info!("shell worker started");

        while let Some(job) = rx.recv().await {
            run_job(job, &ctx).await;
        }

        info!("shell worker finished (channel closed)");
    });

    tx
}
