// src/exec/script.rs

//! Interpreter scripts that stream through a side file.
//!
//! Long-running Python scripts are started unbuffered with their merged
//! output redirected to `.script_output.log`; the worker tails that file into
//! the output log every 100 ms and appends the exit frame when the process
//! ends.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::exec::executor_loop::WorkerContext;
use crate::exec::router::Route;
use crate::exec::task_runner::{exit_code, spawn_dir};
use crate::session::OutputLog;

pub const TAIL_INTERVAL: Duration = Duration::from_millis(100);

const SHELL_OPERATORS: &[char] = &['|', '&', ';', '<', '>', '(', ')', '$', '`', '\n'];

fn is_python(program: &str) -> bool {
    let base = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.strip_prefix("python") {
        Some("") => true,
        Some(rest) => rest.starts_with('3') && rest.chars().all(|c| c.is_ascii_digit() || c == '.'),
        None => false,
    }
}

/// Rewrite `python script.py ...` into `python -u script.py ...`.
///
/// Returns `None` for anything that is not a plain interpreter-on-script
/// invocation, including lines with shell operators.
pub fn rewrite_python(line: &str) -> Option<String> {
    if line.contains(SHELL_OPERATORS) {
        return None;
    }
    let mut words = shell_words::split(line).ok()?;
    if !is_python(words.first()?) {
        return None;
    }
    if !words.iter().skip(1).any(|w| w.ends_with(".py")) {
        return None;
    }
    if !words.iter().skip(1).any(|w| w == "-u") {
        words.insert(1, "-u".to_string());
    }
    Some(shell_words::join(&words))
}

/// Incremental line reader over a file that another process appends to.
#[derive(Debug)]
pub struct SideFileTail {
    path: PathBuf,
    pos: u64,
    partial: Vec<u8>,
}

impl SideFileTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pos: 0,
            partial: Vec::new(),
        }
    }

    /// Copy newly completed lines into `log`. With `finished`, a trailing
    /// line without newline is flushed too.
    pub fn drain(&mut self, log: &OutputLog, finished: bool) -> Result<usize> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).with_context(|| format!("opening {:?}", self.path)),
        };
        file.seek(SeekFrom::Start(self.pos))?;
        let read = file.read_to_end(&mut self.partial)?;
        self.pos += read as u64;

        let mut emitted = 0;
        while let Some(idx) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=idx).collect();
            let text = String::from_utf8_lossy(&line[..idx]);
            log.append_line(text.trim_end_matches('\r'))?;
            emitted += 1;
        }

        if finished && !self.partial.is_empty() {
            let text = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            log.append_line(&text)?;
            emitted += 1;
        }
        Ok(emitted)
    }
}

/// Run a routed script command with output redirected to the side file.
pub async fn run_script(route: &Route, ctx: &WorkerContext) -> Result<i32> {
    let side_path = ctx.paths.script_output();
    let out = File::create(&side_path).with_context(|| format!("creating {:?}", side_path))?;
    let err = out.try_clone().context("duplicating side file handle")?;

    info!(cmd = %route.command, side_file = ?side_path, "starting script process");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&route.command)
        .current_dir(spawn_dir(route, ctx.paths.root()))
        .env("PYTHONUNBUFFERED", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning script '{}'", route.command))?;

    let mut tail = SideFileTail::new(&side_path);
    let mut ticker = tokio::time::interval(TAIL_INTERVAL);

    let status = loop {
        tokio::select! {
            status = child.wait() => break status.context("waiting for script process")?,
            _ = ticker.tick() => {
                tail.drain(&ctx.log, false)?;
            }
        }
    };

    let flushed = tail.drain(&ctx.log, true)?;
    debug!(flushed, "final side file drain");

    if let Err(e) = fs::remove_file(&side_path) {
        debug!(error = %e, "could not remove side file");
    }
    Ok(exit_code(status))
}
