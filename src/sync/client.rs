// src/sync/client.rs

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, RuntimeConfig};
use crate::errors::{CmdwatchError, Result};
use crate::fs::write_atomic;
use crate::protocol::files;
use crate::registry::{WatcherInfo, load_active_watchers};
use crate::session::StatusRecord;
use crate::sync::decode::{LogEvent, decode_log_delta};
use crate::sync::manager::{SyncManager, Transport, timeouts};
use crate::types::SessionKey;

/// Lines of history decoded when attaching to a session.
pub const ATTACH_TAIL_LINES: usize = 500;

/// Result of one poll of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PollUpdate {
    pub key: SessionKey,
    pub events: Vec<LogEvent>,
    /// The log shrank since the last poll; the view should be cleared.
    pub truncated: bool,
    /// A user frame arrived, so the prompt should be redrawn.
    pub prompt_refresh: bool,
    pub status: Option<StatusRecord>,
}

impl PollUpdate {
    fn new(key: SessionKey, events: Vec<LogEvent>, truncated: bool, status: Option<StatusRecord>) -> Self {
        let prompt_refresh = events
            .iter()
            .any(|e| matches!(e, LogEvent::Exit(frame) if !frame.internal));
        Self {
            key,
            events,
            truncated,
            prompt_refresh,
            status,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && !self.truncated
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client view of the watchers behind one remote base directory.
pub struct WatcherClient<T: Transport> {
    config: ClientConfig,
    sync: SyncManager<T>,
    offsets: Mutex<HashMap<SessionKey, u64>>,
    polling: AtomicBool,
}

impl<T: Transport + 'static> WatcherClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            sync: SyncManager::new(transport),
            offsets: Mutex::new(HashMap::new()),
            polling: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sync(&self) -> &SyncManager<T> {
        &self.sync
    }

    pub(crate) fn remote_file(&self, key: &SessionKey, name: &str) -> String {
        format!("{}/{name}", self.config.remote_session_dir(key))
    }

    pub(crate) fn local_file(&self, key: &SessionKey, name: &str) -> PathBuf {
        self.config.local_session_dir(key).join(name)
    }

    fn offset_of(&self, key: &SessionKey) -> Result<u64> {
        let offsets = self
            .offsets
            .lock()
            .map_err(|_| anyhow!("offset table lock poisoned"))?;
        Ok(offsets.get(key).copied().unwrap_or(0))
    }

    fn set_offset(&self, key: &SessionKey, offset: u64) -> Result<()> {
        let mut offsets = self
            .offsets
            .lock()
            .map_err(|_| anyhow!("offset table lock poisoned"))?;
        offsets.insert(key.clone(), offset);
        Ok(())
    }

    /// Pull the registry and list live watchers.
    pub async fn list_watchers(&self) -> Result<Vec<WatcherInfo>> {
        let local = self.config.local_registry_dir();
        self.sync
            .pull_dir(
                &self.config.remote_registry_dir(),
                &local,
                true,
                timeouts::REGISTRY_PULL,
                true,
            )
            .await?;
        load_active_watchers(&local, self.config.heartbeat_timeout(), SystemTime::now())
    }

    /// Append `lines` to the session's queue and push it.
    ///
    /// Nothing is written unless every line is a single line.
    pub async fn send_command(&self, key: &SessionKey, lines: &[String]) -> Result<()> {
        if let Some(bad) = lines.iter().find(|l| l.contains('\n')) {
            return Err(CmdwatchError::InvalidDirective(format!(
                "queue lines must not contain newlines: {bad:?}"
            )));
        }

        let local = self.local_file(key, files::COMMAND_QUEUE);
        let remote = self.remote_file(key, files::COMMAND_QUEUE);

        // Start from the remote queue so the push never shrinks it.
        if !local.exists() {
            if let Err(e) = self
                .sync
                .pull_file(&remote, &local, timeouts::QUEUE_PUSH, true)
                .await
            {
                debug!(session = %key, error = %e, "no remote queue to seed from");
            }
        }

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&local)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        drop(file);

        self.sync
            .push_file(&local, &remote, timeouts::QUEUE_PUSH, true)
            .await?;
        info!(session = %key, count = lines.len(), "sent commands");
        Ok(())
    }

    /// Write and push the session's runtime configuration.
    pub async fn push_runtime_config(&self, key: &SessionKey, cfg: &RuntimeConfig) -> Result<()> {
        let local = self.local_file(key, files::RUNTIME_CONFIG);
        write_atomic(&local, &serde_json::to_vec_pretty(cfg)?)?;
        self.sync
            .push_file(
                &local,
                &self.remote_file(key, files::RUNTIME_CONFIG),
                timeouts::QUEUE_PUSH,
                false,
            )
            .await
    }

    async fn pull_log_and_status(&self, key: &SessionKey, lightweight: bool) -> Result<Option<StatusRecord>> {
        self.sync
            .pull_file(
                &self.remote_file(key, files::OUTPUT_LOG),
                &self.local_file(key, files::OUTPUT_LOG),
                timeouts::LOG_PULL,
                lightweight,
            )
            .await?;

        let status_path = self.local_file(key, files::STATUS);
        if let Err(e) = self
            .sync
            .pull_file(
                &self.remote_file(key, files::STATUS),
                &status_path,
                timeouts::STATUS_PULL,
                true,
            )
            .await
        {
            debug!(session = %key, error = %e, "status pull failed");
        }
        Ok(StatusRecord::read_from(&status_path).ok())
    }

    /// Mirror the log once and decode what was appended since the last poll.
    ///
    /// Returns `Ok(None)` if another poll is still running.
    pub async fn poll_once(&self, key: &SessionKey) -> Result<Option<PollUpdate>> {
        if self
            .polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(session = %key, "poll already in flight; skipping");
            return Ok(None);
        }
        let _in_flight = InFlight(&self.polling);

        let status = self.pull_log_and_status(key, true).await?;

        let log_path = self.local_file(key, files::OUTPUT_LOG);
        let mut offset = self.offset_of(key)?;
        let size = file_len(&log_path)?;

        let truncated = size < offset;
        if truncated {
            info!(session = %key, offset, size, "output log truncated");
            offset = 0;
        }

        let (text, consumed) = read_complete_lines(&log_path, offset)?;
        self.set_offset(key, offset + consumed)?;

        Ok(Some(PollUpdate::new(
            key.clone(),
            decode_log_delta(&text),
            truncated,
            status,
        )))
    }

    /// First look at a session: decode the recent tail and start tracking
    /// from the end of the log.
    pub async fn attach(&self, key: &SessionKey) -> Result<PollUpdate> {
        let status = self.pull_log_and_status(key, false).await?;

        let log_path = self.local_file(key, files::OUTPUT_LOG);
        let (text, consumed) = read_complete_lines(&log_path, 0)?;
        self.set_offset(key, consumed)?;

        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(ATTACH_TAIL_LINES);
        let tail = lines[start..].join("\n");

        let mut update = PollUpdate::new(key.clone(), decode_log_delta(&tail), false, status);
        // History, not news.
        update.prompt_refresh = false;
        Ok(update)
    }

    /// Poll `key` every `every` on spawned tasks; updates arrive on the
    /// returned channel in completion order. Failed polls are logged and
    /// skipped. Polling stops when the receiver is dropped.
    pub fn spawn_polling(
        self: &Arc<Self>,
        key: SessionKey,
        every: Duration,
    ) -> (mpsc::Receiver<PollUpdate>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let client = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let client = Arc::clone(&client);
                let key = key.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match client.poll_once(&key).await {
                        Ok(Some(update)) if !update.is_empty() || update.status.is_some() => {
                            let _ = tx.send(update).await;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(session = %key, error = %e, "log poll failed"),
                    }
                });
            }
            debug!("polling stopped");
        });

        (rx, handle)
    }

    /// Mirror a cached name list (`.docker_images.txt` and friends).
    pub async fn pull_cached_list(&self, key: &SessionKey, name: &str) -> Result<Vec<String>> {
        let local = self.local_file(key, name);
        self.sync
            .pull_file(&self.remote_file(key, name), &local, timeouts::CACHED_LIST_PULL, true)
            .await?;
        let raw = fs::read_to_string(&local)?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Mirror the whole session directory locally.
    pub async fn mirror_session(&self, key: &SessionKey, delete: bool) -> Result<PathBuf> {
        let local = self.config.local_session_dir(key);
        self.sync
            .pull_dir(
                &self.config.remote_session_dir(key),
                &local,
                delete,
                timeouts::DIR_MIRROR,
                false,
            )
            .await?;
        Ok(local)
    }
}

fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Text from `offset` up to the last newline, and how many bytes that is.
fn read_complete_lines(path: &Path, offset: u64) -> Result<(String, u64)> {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((String::new(), 0)),
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let consumed = match buf.iter().rposition(|b| *b == b'\n') {
        Some(idx) => idx + 1,
        None => 0,
    };
    buf.truncate(consumed);
    Ok((String::from_utf8_lossy(&buf).into_owned(), consumed as u64))
}
