// src/engine/runtime.rs

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info, warn};

use crate::config::{RuntimeConfig, WatcherSettings, load_runtime_config};
use crate::engine::core::{LineAction, classify, plan};
use crate::engine::directives::{DirectiveContext, DirectiveTable, change_dir};
use crate::engine::WatcherState;
use crate::errors::Result;
use crate::exec::router::container_workdir;
use crate::exec::{ContainerRuntime, ExecutorBackend};
use crate::fs::paths::display_rel;
use crate::protocol::{ExitFrame, FAILURE_EXIT_CODE};
use crate::registry::Registrar;
use crate::session::status::{current_user, short_hostname};
use crate::session::{OffsetStore, OutputLog, QueueLine, QueueReader, SessionPaths, StatusRecord};
use crate::transfer::{UploadWait, sweep_expired};
use crate::types::ExecMode;

/// The watcher's poll loop: tails the queue, interprets lines, emits frames.
///
/// Shell lines are handed to an `ExecutorBackend`; everything else
/// (directives, `cd`, environment switches, rejections) is handled here so
/// the interpreter state has a single owner.
pub struct Watcher<E: ExecutorBackend> {
    settings: WatcherSettings,
    queue: QueueReader,
    directives: DirectiveTable,
    ctx: DirectiveContext,
    executor: E,
    registrar: Registrar,
    refresh_rx: mpsc::UnboundedReceiver<()>,
    user: String,
    host: String,
}

impl<E: ExecutorBackend> fmt::Debug for Watcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("watcher_id", &self.settings.watcher_id)
            .field("offset", &self.queue.offset())
            .field("state", &self.ctx.state)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Watcher<E> {
    /// Bind to the session directory in `settings`, creating its layout.
    ///
    /// `refresh_rx` receives status-refresh requests from the shell worker.
    pub fn new(
        settings: WatcherSettings,
        log: Arc<OutputLog>,
        containers: Arc<dyn ContainerRuntime>,
        executor: E,
        refresh_rx: mpsc::UnboundedReceiver<()>,
    ) -> Result<Self> {
        let paths = SessionPaths::new(&settings.session_dir);
        paths.ensure_layout()?;

        let queue = QueueReader::open(paths.queue(), OffsetStore::new(paths.read_offset()))?;
        let registrar = Registrar::new(settings.heartbeat_path(), &settings.display_name);

        let ctx = DirectiveContext {
            state: WatcherState::new(settings.initial_env.clone()),
            paths,
            log,
            containers,
            upload_wait: UploadWait::default(),
        };

        Ok(Self {
            settings,
            queue,
            directives: DirectiveTable::standard(),
            ctx,
            executor,
            registrar,
            refresh_rx,
            user: current_user(),
            host: short_hostname(),
        })
    }

    /// Override how long uploads are awaited.
    pub fn with_upload_wait(mut self, wait: UploadWait) -> Self {
        self.ctx.upload_wait = wait;
        self
    }

    pub fn state(&self) -> &WatcherState {
        &self.ctx.state
    }

    pub fn offset(&self) -> u64 {
        self.queue.offset()
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.ctx.paths
    }

    /// Process every complete line currently in the queue.
    ///
    /// Each line's offset is persisted before the line is acted on, so a
    /// crash can drop a line but never run it twice.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let lines = self.queue.pending()?;
        let mut processed = 0;

        for line in lines {
            self.queue.advance_to(line.end_offset)?;
            debug!(offset = line.end_offset, line = %line.text, "consumed queue line");

            if let Err(err) = self.process_line(&line).await {
                error!(line = %line.text, error = %err, "failed to process command");
                self.ctx.log.append(
                    &format!("[ERROR] Failed to process command '{}': {err}", line.text.trim()),
                    Some(ExitFrame::user(FAILURE_EXIT_CODE)),
                )?;
            }
            processed += 1;
        }

        Ok(processed)
    }

    async fn process_line(&mut self, line: &QueueLine) -> Result<()> {
        let item = classify(&line.text);
        let mode = self.effective_mode();
        let action = plan(item, &mut self.ctx.state, &self.settings.allowed_commands, mode);

        match action {
            LineAction::Skip => return Ok(()),

            LineAction::Reply { text, frame } => {
                self.ctx.log.append(&text, Some(frame))?;
            }

            LineAction::Directive { name, args } => {
                let reply = self.directives.dispatch(&mut self.ctx, &name, args).await;
                info!(directive = %name, exit_code = reply.code, "directive finished");
                let (text, frame) = reply.render();
                self.ctx.log.append(&text, Some(frame))?;
            }

            LineAction::ChangeDir { target } => {
                let (text, code) = change_dir(&mut self.ctx, target.as_deref());
                self.ctx.log.append(&text, Some(ExitFrame::user(code)))?;
            }

            LineAction::Submit(job) => {
                info!(cmd = %job.line, cwd = %display_rel(&job.cwd_rel), "queued shell command");
                self.executor.submit(job).await?;
                // Status follows once the worker reports completion.
                return Ok(());
            }
        }

        // The frame is already written; a failed refresh must not add another.
        if let Err(e) = self.refresh_status() {
            warn!(error = %e, "status refresh failed");
        }
        Ok(())
    }

    /// Runtime configuration in effect right now, falling back to the
    /// static settings if the session file is unreadable.
    fn effective_mode(&self) -> ExecMode {
        let file = load_runtime_config(self.ctx.paths.runtime_config()).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable runtime config");
            None
        });
        match RuntimeConfig::resolve(file.as_ref(), &self.settings.static_runtime) {
            Ok(runtime) => runtime.mode,
            Err(e) => {
                warn!(error = %e, "invalid runtime config; assuming host mode");
                ExecMode::Host
            }
        }
    }

    /// Rewrite `.watcher_status.json` from the current state.
    pub fn refresh_status(&self) -> Result<()> {
        let file = load_runtime_config(self.ctx.paths.runtime_config()).unwrap_or(None);
        let runtime = RuntimeConfig::resolve(file.as_ref(), &self.settings.static_runtime)
            .unwrap_or_default();

        let cwd_rel = &self.ctx.state.cwd_rel;
        let cwd = if runtime.mode.is_container() {
            container_workdir(&runtime.mount_path, cwd_rel)
        } else {
            self.ctx.paths.root().join(cwd_rel).display().to_string()
        };

        let record = StatusRecord {
            user: self.user.clone(),
            host: self.host.clone(),
            cwd,
            cwd_rel: display_rel(cwd_rel),
            conda_env: self.ctx.state.active_env.clone(),
            mode: runtime.mode.label().to_string(),
        };
        record.write_to(&self.ctx.paths.status())?;
        Ok(())
    }

    fn sweep(&self) {
        let staging = self.ctx.paths.upload_staging_dir();
        if let Err(e) = sweep_expired(&staging, self.settings.upload_expiry, SystemTime::now()) {
            warn!(error = %e, "staged upload sweep failed");
        }
    }

    fn heartbeat(&self) {
        if let Err(e) = self.registrar.beat() {
            warn!(error = %e, "heartbeat write failed");
        }
    }

    /// Main loop. Returns after `shutdown` resolves; the heartbeat record is
    /// removed on the way out.
    pub async fn run<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        info!(
            watcher_id = %self.settings.watcher_id,
            name = %self.settings.display_name,
            session = ?self.settings.session_dir,
            offset = self.queue.offset(),
            "watcher started"
        );

        self.heartbeat();
        if let Err(e) = self.refresh_status() {
            warn!(error = %e, "initial status write failed");
        }

        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beat = interval_at(
            Instant::now() + self.settings.heartbeat_interval,
            self.settings.heartbeat_interval,
        );
        let mut sweep = interval(self.settings.sweep_interval);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "poll cycle failed; retrying next tick");
                    }
                }
                Some(()) = self.refresh_rx.recv() => {
                    if let Err(e) = self.refresh_status() {
                        warn!(error = %e, "status refresh failed");
                    }
                }
                _ = beat.tick() => self.heartbeat(),
                _ = sweep.tick() => self.sweep(),
            }
        }

        if let Err(e) = self.registrar.unregister() {
            warn!(error = %e, "could not remove heartbeat record");
        }
        info!("watcher exiting");
        Ok(())
    }
}
