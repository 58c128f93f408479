// src/engine/core.rs

//! Pure line planning.
//!
//! Given a queue line and the interpreter state, decide what the IO shell
//! should do with it. Nothing in here touches the filesystem, spawns
//! processes or awaits; `conda` state changes are applied directly because
//! they are purely in-memory.

use crate::engine::{QueueItem, WatcherState};
use crate::exec::ShellJob;
use crate::protocol::{DIRECTIVE_PREFIX, ExitFrame, FIELD_SEPARATOR, REJECTED_EXIT_CODE};
use crate::types::ExecMode;

/// What the IO shell must do for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Nothing; no frame.
    Skip,
    /// Append `text` followed by `frame`.
    Reply { text: String, frame: ExitFrame },
    /// Run an internal directive through the table.
    Directive { name: String, args: Vec<String> },
    /// Resolve and apply a `cd` (needs the filesystem).
    ChangeDir { target: Option<String> },
    /// Hand the job to the shell worker.
    Submit(ShellJob),
}

/// Classify a raw queue line.
pub fn classify(raw: &str) -> QueueItem {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return QueueItem::Skip;
    }

    if let Some(payload) = line.strip_prefix(DIRECTIVE_PREFIX) {
        let mut parts = payload.split(FIELD_SEPARATOR).map(str::to_string);
        let name = parts.next().unwrap_or_default();
        return QueueItem::Directive {
            name,
            args: parts.collect(),
        };
    }

    let first = line.split_whitespace().next().unwrap_or_default();
    match first {
        "cd" => classify_cd(line),
        "conda" => classify_conda(line),
        _ => QueueItem::Shell(line.to_string()),
    }
}

/// `cd` with at most one plain argument changes the watcher's cwd; anything
/// more elaborate (`cd x && make`) is an ordinary shell line.
fn classify_cd(line: &str) -> QueueItem {
    match shell_words::split(line).as_deref() {
        Ok([_]) => QueueItem::ChangeDir { target: None },
        Ok([_, target]) if !has_shell_operator(line) => QueueItem::ChangeDir {
            target: Some(target.clone()),
        },
        _ => QueueItem::Shell(line.to_string()),
    }
}

fn classify_conda(line: &str) -> QueueItem {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["conda", "activate"] => QueueItem::CondaActivate { env: None },
        ["conda", "activate", name] => QueueItem::CondaActivate {
            env: Some(name.to_string()),
        },
        ["conda", "deactivate"] => QueueItem::CondaDeactivate,
        _ => QueueItem::Shell(line.to_string()),
    }
}

fn has_shell_operator(line: &str) -> bool {
    line.contains(['|', '&', ';', '<', '>', '(', ')', '`', '\n'])
}

/// Allow-list check on the first shell token.
///
/// An empty list allows everything; a line that cannot be tokenised is
/// rejected.
pub fn is_allowed(line: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match shell_words::split(line) {
        Ok(words) => words
            .first()
            .is_some_and(|first| allowed.iter().any(|a| a == first)),
        Err(_) => false,
    }
}

fn rejection(line: &str) -> LineAction {
    LineAction::Reply {
        text: format!("[Watcher] Command not allowed: {line}"),
        frame: ExitFrame::user(REJECTED_EXIT_CODE),
    }
}

/// Decide the action for `item`, applying in-memory state changes.
///
/// `mode` is the execution mode currently in effect; environment switches
/// only mean something on the host.
pub fn plan(
    item: QueueItem,
    state: &mut WatcherState,
    allowed: &[String],
    mode: ExecMode,
) -> LineAction {
    match item {
        QueueItem::Skip => LineAction::Skip,

        QueueItem::Directive { name, args } => LineAction::Directive { name, args },

        QueueItem::ChangeDir { target } => {
            let line = match &target {
                Some(t) => format!("cd {t}"),
                None => "cd".to_string(),
            };
            if !is_allowed(&line, allowed) {
                return rejection(&line);
            }
            LineAction::ChangeDir { target }
        }

        QueueItem::CondaActivate { env } => {
            let env = env.unwrap_or_else(|| "base".to_string());
            if mode.is_container() {
                return container_env_notice(mode);
            }
            let text = format!("[Watcher] Activated environment '{env}'");
            state.active_env = Some(env);
            LineAction::Reply {
                text,
                frame: ExitFrame::user(0),
            }
        }

        QueueItem::CondaDeactivate => {
            if mode.is_container() {
                return container_env_notice(mode);
            }
            state.active_env = None;
            LineAction::Reply {
                text: "[Watcher] Deactivated environment".to_string(),
                frame: ExitFrame::user(0),
            }
        }

        QueueItem::Shell(line) => {
            if !is_allowed(&line, allowed) {
                return rejection(&line);
            }
            LineAction::Submit(ShellJob {
                line,
                cwd_rel: state.cwd_rel.clone(),
                env: state.active_env.clone(),
            })
        }
    }
}

fn container_env_notice(mode: ExecMode) -> LineAction {
    LineAction::Reply {
        text: format!("[Watcher] conda environments are not managed in {mode} mode; ignored"),
        frame: ExitFrame::user(0),
    }
}

