// src/engine/directives.rs

//! Internal directives (`_internal_<name>::<args>`).
//!
//! Directives run synchronously on the poll loop, never through the shell
//! worker. Each one is registered with its exact argument count; the
//! dispatcher checks arity before calling the handler.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::WatcherState;
use crate::errors::{CmdwatchError, Result};
use crate::exec::{BoxFuture, ContainerRuntime};
use crate::fs::paths::{display_rel, normalize_within, validate_relative};
use crate::fs::write_atomic;
use crate::protocol::{ExitFrame, FAILURE_EXIT_CODE, ls_done_line};
use crate::session::{OutputLog, SessionPaths};
use crate::transfer::{self, UploadWait};

/// State and handles the directive handlers operate on.
pub struct DirectiveContext {
    pub state: WatcherState,
    pub paths: SessionPaths,
    pub log: Arc<OutputLog>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub upload_wait: UploadWait,
}

/// Result of a directive, before it is written to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveReply {
    pub text: String,
    pub code: i32,
    /// Set by `list_dir`: the path to announce with `__LS_DONE__::`.
    pub listing_done: Option<String>,
}

impl DirectiveReply {
    pub fn ok() -> Self {
        Self::text("")
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: 0,
            listing_done: None,
        }
    }

    pub fn failed(err: &CmdwatchError) -> Self {
        Self {
            text: err.to_string(),
            code: FAILURE_EXIT_CODE,
            listing_done: None,
        }
    }

    /// Text and frame as appended to the output log.
    pub fn render(&self) -> (String, ExitFrame) {
        let text = match &self.listing_done {
            Some(rel) => ls_done_line(rel),
            None => self.text.clone(),
        };
        (text, ExitFrame::internal(self.code))
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, Result<DirectiveReply>>;

pub type Handler = for<'a> fn(&'a mut DirectiveContext, Vec<String>) -> HandlerFuture<'a>;

#[derive(Clone, Copy)]
struct DirectiveSpec {
    arity: usize,
    handler: Handler,
}

/// Name → (arity, handler) registry.
pub struct DirectiveTable {
    entries: HashMap<&'static str, DirectiveSpec>,
}

impl DirectiveTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Table with every built-in directive registered.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register("clear_log", 0, clear_log);
        table.register("delete_path", 1, delete_path);
        table.register("stage_file_for_download", 1, stage_file_for_download);
        table.register("move_staged_file", 2, move_staged_file);
        table.register("create_file", 1, create_file);
        table.register("create_dir", 1, create_dir);
        table.register("create_link", 2, create_link);
        table.register("list_dir", 1, list_dir);
        table.register("get_docker_images", 0, get_docker_images);
        table.register("get_docker_containers", 0, get_docker_containers);
        table.register("reset_cwd", 0, reset_cwd);
        table
    }

    pub fn register(&mut self, name: &'static str, arity: usize, handler: Handler) {
        self.entries.insert(name, DirectiveSpec { arity, handler });
    }

    /// Run a directive. Errors are folded into a failed reply.
    pub async fn dispatch(
        &self,
        ctx: &mut DirectiveContext,
        name: &str,
        args: Vec<String>,
    ) -> DirectiveReply {
        match self.try_dispatch(ctx, name, args).await {
            Ok(reply) => reply,
            Err(err) => {
                info!(directive = %name, error = %err, "directive failed");
                DirectiveReply::failed(&err)
            }
        }
    }

    async fn try_dispatch(
        &self,
        ctx: &mut DirectiveContext,
        name: &str,
        args: Vec<String>,
    ) -> Result<DirectiveReply> {
        let spec = self
            .entries
            .get(name)
            .copied()
            .ok_or_else(|| CmdwatchError::UnknownDirective(name.to_string()))?;

        if args.len() != spec.arity {
            return Err(CmdwatchError::InvalidDirective(format!(
                "{name} expects {} argument(s), got {}",
                spec.arity,
                args.len()
            )));
        }

        debug!(directive = %name, ?args, "running directive");
        (spec.handler)(ctx, args).await
    }
}

/// Apply a `cd` to the interpreter state.
///
/// Returns the text and user exit code to log.
pub fn change_dir(ctx: &mut DirectiveContext, target: Option<&str>) -> (String, i32) {
    let target = target.map(str::trim).unwrap_or("");
    if matches!(target, "" | "~" | "~/") {
        ctx.state.reset_cwd();
        return (String::new(), 0);
    }

    let root = ctx.paths.root();
    let rel = match normalize_within(root, &ctx.state.cwd_rel, target) {
        Ok(rel) => rel,
        Err(_) => {
            return (
                format!("cd: path escapes session root: {target}"),
                FAILURE_EXIT_CODE,
            );
        }
    };

    if !root.join(&rel).is_dir() {
        return (
            format!("cd: no such file or directory: {target}"),
            FAILURE_EXIT_CODE,
        );
    }

    debug!(cwd = %display_rel(&rel), "changed directory");
    ctx.state.cwd_rel = rel;
    (String::new(), 0)
}

/// Validate `rel` and insist it names something below the root.
fn non_root_path(root: &Path, raw: &str) -> Result<(PathBuf, PathBuf)> {
    let rel = validate_relative(raw)?;
    if rel.as_os_str().is_empty() {
        return Err(CmdwatchError::InvalidDirective(
            "path must not be the session root".to_string(),
        ));
    }
    Ok((root.join(&rel), rel))
}

fn arg(args: &[String], idx: usize) -> &str {
    args.get(idx).map(String::as_str).unwrap_or_default()
}

fn clear_log<'a>(ctx: &'a mut DirectiveContext, _args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        ctx.log.clear()?;
        info!("output log cleared");
        Ok(DirectiveReply::text("[Watcher] Log file cleared."))
    })
}

fn delete_path<'a>(ctx: &'a mut DirectiveContext, args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (target, rel) = non_root_path(ctx.paths.root(), arg(&args, 0))?;

        let meta = fs::symlink_metadata(&target)?;
        if meta.is_dir() {
            fs::remove_dir_all(&target)?;
        } else {
            fs::remove_file(&target)?;
        }

        if ctx.state.cwd_rel.starts_with(&rel) {
            ctx.state.reset_cwd();
        }

        info!(path = %display_rel(&rel), "deleted path");
        Ok(DirectiveReply::ok())
    })
}

fn stage_file_for_download<'a>(
    ctx: &'a mut DirectiveContext,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        transfer::stage_for_download(&ctx.paths, arg(&args, 0))?;
        Ok(DirectiveReply::ok())
    })
}

fn move_staged_file<'a>(ctx: &'a mut DirectiveContext, args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        transfer::move_staged_file(&ctx.paths, arg(&args, 0), arg(&args, 1), ctx.upload_wait)
            .await?;
        Ok(DirectiveReply::ok())
    })
}

fn create_file<'a>(ctx: &'a mut DirectiveContext, args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (target, _) = non_root_path(ctx.paths.root(), arg(&args, 0))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&target)?;
        Ok(DirectiveReply::ok())
    })
}

fn create_dir<'a>(ctx: &'a mut DirectiveContext, args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        let rel = validate_relative(arg(&args, 0))?;
        fs::create_dir_all(ctx.paths.root().join(rel))?;
        Ok(DirectiveReply::ok())
    })
}

fn create_link<'a>(ctx: &'a mut DirectiveContext, args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        let root = ctx.paths.root();
        let source_raw = arg(&args, 0).trim();
        // Both ends stay inside the root, or later directives could follow
        // the link out of it.
        let source = root.join(validate_relative(source_raw)?);
        if fs::symlink_metadata(&source).is_err() {
            return Err(CmdwatchError::IoError(std::io::Error::new(
                ErrorKind::NotFound,
                format!("link source does not exist: {source_raw}"),
            )));
        }

        let (link, _) = non_root_path(root, arg(&args, 1))?;
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(&source, &link)?;
        info!(source = ?source, link = ?link, "created symlink");
        Ok(DirectiveReply::ok())
    })
}

fn list_dir<'a>(ctx: &'a mut DirectiveContext, args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        let raw = arg(&args, 0).trim().to_string();
        // Escapes fail before the result file is touched.
        let rel = validate_relative(&raw)?;
        let dir = ctx.paths.root().join(&rel);
        let result_path = ctx.paths.ls_result();

        let (contents, code) = match read_listing(&dir) {
            Ok(entries) => {
                let mut body = entries.join("\n");
                if !body.is_empty() {
                    body.push('\n');
                }
                (body, 0)
            }
            Err(e) => (format!("ERROR: {e}\n"), FAILURE_EXIT_CODE),
        };
        write_atomic(&result_path, contents.as_bytes())?;

        Ok(DirectiveReply {
            text: String::new(),
            code,
            listing_done: Some(raw),
        })
    })
}

fn read_listing(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    Ok(entries)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    write_atomic(path, body.as_bytes())?;
    Ok(())
}

fn get_docker_images<'a>(ctx: &'a mut DirectiveContext, _args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        let images = ctx.containers.list_images().await?;
        write_lines(&ctx.paths.docker_images(), &images)?;
        debug!(count = images.len(), "cached image list");
        Ok(DirectiveReply::ok())
    })
}

fn get_docker_containers<'a>(
    ctx: &'a mut DirectiveContext,
    _args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let names = ctx.containers.list_containers().await?;
        write_lines(&ctx.paths.docker_containers(), &names)?;
        debug!(count = names.len(), "cached container list");
        Ok(DirectiveReply::ok())
    })
}

fn reset_cwd<'a>(ctx: &'a mut DirectiveContext, _args: Vec<String>) -> HandlerFuture<'a> {
    Box::pin(async move {
        ctx.state.reset_cwd();
        Ok(DirectiveReply::ok())
    })
}
