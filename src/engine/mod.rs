// src/engine/mod.rs

//! Command-processing engine of the watcher.
//!
//! This module ties together:
//! - classification of queue lines into [`QueueItem`]s
//! - the interpreter state (`cwd`, active environment)
//! - the internal-directive table
//! - the poll loop that tails the queue, emits frames and keeps the
//!   heartbeat and status record fresh
//!
//! The pure planning logic lives in [`core`]; directives are in
//! [`directives`]; the async/IO shell is implemented in [`runtime`].

use std::path::PathBuf;

/// A queue line after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// Blank line or `#` comment.
    Skip,
    /// `_internal_<name>::<arg>...`
    Directive { name: String, args: Vec<String> },
    /// `cd [path]`; `None` means the session root.
    ChangeDir { target: Option<String> },
    /// `conda activate [name]`; `None` selects `base`.
    CondaActivate { env: Option<String> },
    CondaDeactivate,
    /// Anything else, run through the shell worker.
    Shell(String),
}

/// Interpreter state owned by the poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherState {
    /// Logical cwd, relative to the session root (empty = root).
    pub cwd_rel: PathBuf,
    /// Active conda environment.
    pub active_env: Option<String>,
}

impl WatcherState {
    pub fn new(active_env: Option<String>) -> Self {
        Self {
            cwd_rel: PathBuf::new(),
            active_env,
        }
    }

    pub fn reset_cwd(&mut self) {
        self.cwd_rel = PathBuf::new();
    }
}

pub mod core;
pub mod directives;
pub mod runtime;

pub use core::{LineAction, classify, is_allowed, plan};
pub use directives::{DirectiveContext, DirectiveReply, DirectiveTable};
pub use runtime::Watcher;
