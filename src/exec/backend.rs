// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The poll loop hands accepted shell lines to an `ExecutorBackend` instead
//! of a raw mpsc sender, so tests can record submitted jobs without spawning
//! processes.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::{CmdwatchError, Result};
use crate::exec::executor_loop::{WorkerContext, spawn_executor};
use crate::exec::{BoxFuture, ShellJob};

pub trait ExecutorBackend: Send {
    /// Queue a job for execution. Resolves once the job is accepted, not
    /// when it finishes.
    fn submit(&mut self, job: ShellJob) -> BoxFuture<'_, Result<()>>;
}

/// Production backend: forwards jobs to the single worker task.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ShellJob>,
}

impl RealExecutorBackend {
    /// Spawns the worker immediately.
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let tx = spawn_executor(ctx);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn submit(&mut self, job: ShellJob) -> BoxFuture<'_, Result<()>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(job)
                .await
                .map_err(|_| CmdwatchError::Other(anyhow::anyhow!("shell worker has stopped")))
        })
    }
}
