// src/sync/manager.rs

//! Mirror primitive with timeouts and a busy indicator.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::debug;

use crate::errors::{CmdwatchError, Result};
use crate::exec::BoxFuture;

/// Per-call-site timeouts.
pub mod timeouts {
    use std::time::Duration;

    pub const LOG_PULL: Duration = Duration::from_secs(30);
    pub const STATUS_PULL: Duration = Duration::from_secs(10);
    pub const QUEUE_PUSH: Duration = Duration::from_secs(30);
    pub const STAGED_TRANSFER: Duration = Duration::from_secs(60);
    pub const DIR_MIRROR: Duration = Duration::from_secs(60);
    pub const REGISTRY_PULL: Duration = Duration::from_secs(10);
    pub const CACHED_LIST_PULL: Duration = Duration::from_secs(5);
    pub const REMOTE_MKDIR: Duration = Duration::from_secs(10);
}

/// One side of a mirror operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    Local(&'a Path),
    /// Absolute path on the remote host.
    Remote(&'a str),
}

impl fmt::Display for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(p) => write!(f, "{}", p.display()),
            Endpoint::Remote(p) => write!(f, "remote:{p}"),
        }
    }
}

/// How bytes move between the client and the remote host.
pub trait Transport: Send + Sync {
    /// Mirror `src` onto `dst`. Directory endpoints end in `/`.
    fn mirror<'a>(
        &'a self,
        src: Endpoint<'a>,
        dst: Endpoint<'a>,
        delete: bool,
    ) -> BoxFuture<'a, Result<()>>;

    /// Run a shell command on the remote host and return its stdout.
    fn remote_exec<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// `rsync -rtlDz` and `ssh` as subprocesses.
#[derive(Debug, Clone)]
pub struct RsyncTransport {
    server: String,
    rsync_bin: String,
    ssh_bin: String,
}

impl RsyncTransport {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            rsync_bin: "rsync".to_string(),
            ssh_bin: "ssh".to_string(),
        }
    }

    fn render(&self, endpoint: Endpoint<'_>) -> String {
        match endpoint {
            Endpoint::Local(p) => p.to_string_lossy().into_owned(),
            Endpoint::Remote(p) => format!("{}:{p}", self.server),
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, ?args, "running transport command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CmdwatchError::Sync(format!("cannot run {program}: {e}")))?;

        if !output.status.success() {
            return Err(CmdwatchError::Sync(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Transport for RsyncTransport {
    fn mirror<'a>(
        &'a self,
        src: Endpoint<'a>,
        dst: Endpoint<'a>,
        delete: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut args = vec!["-rtlDz".to_string()];
            if delete {
                args.push("--delete".to_string());
            }
            args.push(self.render(src));
            args.push(self.render(dst));
            self.run(&self.rsync_bin, &args).await.map(|_| ())
        })
    }

    fn remote_exec<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let args = vec![self.server.clone(), command.to_string()];
            self.run(&self.ssh_bin, &args).await
        })
    }
}

struct BusyInner {
    active: AtomicUsize,
    tx: watch::Sender<bool>,
}

/// Counts in-flight heavyweight operations; observers see `true` while any
/// are running.
#[derive(Clone)]
pub struct BusyIndicator {
    inner: Arc<BusyInner>,
}

impl fmt::Debug for BusyIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyIndicator")
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for BusyIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl BusyIndicator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(BusyInner {
                active: AtomicUsize::new(0),
                tx,
            }),
        }
    }

    pub fn raise(&self) -> BusyGuard {
        if self.inner.active.fetch_add(1, Ordering::SeqCst) == 0 {
            self.inner.tx.send_replace(true);
        }
        BusyGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }
}

/// Lowers the indicator when dropped.
pub struct BusyGuard {
    inner: Arc<BusyInner>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.tx.send_replace(false);
        }
    }
}

fn dir_form(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// Transport plus timeouts and busy state.
pub struct SyncManager<T: Transport> {
    transport: T,
    busy: BusyIndicator,
}

impl<T: Transport> fmt::Debug for SyncManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncManager")
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SyncManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            busy: BusyIndicator::new(),
        }
    }

    pub fn busy(&self) -> &BusyIndicator {
        &self.busy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn guarded<R, F>(
        &self,
        what: &str,
        limit: Duration,
        lightweight: bool,
        op: F,
    ) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        let _guard = (!lightweight).then(|| self.busy.raise());
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(CmdwatchError::SyncTimeout {
                what: what.to_string(),
                secs: limit.as_secs(),
            }),
        }
    }

    pub async fn pull_file(
        &self,
        remote: &str,
        local: &Path,
        limit: Duration,
        lightweight: bool,
    ) -> Result<()> {
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let what = format!("pull {remote}");
        self.guarded(
            &what,
            limit,
            lightweight,
            self.transport
                .mirror(Endpoint::Remote(remote), Endpoint::Local(local), false),
        )
        .await
    }

    pub async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        limit: Duration,
        lightweight: bool,
    ) -> Result<()> {
        let what = format!("push {remote}");
        self.guarded(
            &what,
            limit,
            lightweight,
            self.transport
                .mirror(Endpoint::Local(local), Endpoint::Remote(remote), false),
        )
        .await
    }

    /// Mirror a remote directory's contents into `local`.
    pub async fn pull_dir(
        &self,
        remote: &str,
        local: &Path,
        delete: bool,
        limit: Duration,
        lightweight: bool,
    ) -> Result<()> {
        std::fs::create_dir_all(local)?;
        let remote = dir_form(remote);
        let local = dir_form(&local.to_string_lossy());
        let what = format!("pull dir {remote}");
        self.guarded(
            &what,
            limit,
            lightweight,
            self.transport.mirror(
                Endpoint::Remote(&remote),
                Endpoint::Local(Path::new(&local)),
                delete,
            ),
        )
        .await
    }

    /// `mkdir -p` on the remote host.
    pub async fn remote_mkdir(&self, remote: &str, limit: Duration) -> Result<()> {
        let command = format!("mkdir -p {}", shell_words::quote(remote));
        let what = format!("mkdir {remote}");
        self.guarded(&what, limit, true, self.transport.remote_exec(&command))
            .await
            .map(|_| ())
    }
}
