// src/exec/mod.rs

//! Shell execution layer.
//!
//! Accepted queue lines become [`ShellJob`]s. They are executed strictly one
//! at a time by a single background worker, with output streamed into the
//! session's output log.
//!
//! - [`backend`] provides the `ExecutorBackend` trait the poll loop submits
//!   jobs through, and the production `RealExecutorBackend`.
//! - [`executor_loop`] owns the worker task and its bounded job channel.
//! - [`task_runner`] runs one job: route, spawn, stream, frame.
//! - [`router`] turns a command line into its final host/container form.
//! - [`docker`] abstracts container lifecycle calls behind `ContainerRuntime`.
//! - [`script`] handles interpreter scripts that stream through a side file.

pub mod backend;
pub mod docker;
pub mod executor_loop;
pub mod router;
pub mod script;
pub mod task_runner;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use docker::{ContainerRuntime, ContainerSpec, ContainerState, DockerCli};
pub use executor_loop::{JOB_QUEUE_CAPACITY, WorkerContext, spawn_executor};
pub use router::{Route, route_command};

/// Boxed `Send` future used at the trait seams of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One accepted shell line plus the interpreter state it was accepted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellJob {
    pub line: String,
    /// Logical cwd, relative to the session root.
    pub cwd_rel: PathBuf,
    /// Active conda environment, if any.
    pub env: Option<String>,
}
