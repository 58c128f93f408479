// src/sync/transfer.rs

//! Client half of staged transfers.
//!
//! Upload: push the file to `.staged_uploads/<token>`, then queue
//! `move_staged_file` so the watcher swaps it into place. Download: queue
//! `stage_file_for_download`, wait for its internal frame, then pull the
//! download slot.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{CmdwatchError, Result};
use crate::fs::paths::validate_relative;
use crate::protocol::{directive_line, files};
use crate::sync::client::WatcherClient;
use crate::sync::decode::LogEvent;
use crate::sync::manager::{Transport, timeouts};
use crate::types::SessionKey;

/// Unique staging token: `<epoch millis>-<8 hex chars>`.
pub fn new_upload_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{millis}-{}", &suffix[..8])
}

/// Stage `local` on the remote host and ask the watcher to move it to `rel`.
///
/// Returns the token used. Delivery happens asynchronously on the watcher.
pub async fn upload_file<T: Transport + 'static>(
    client: &WatcherClient<T>,
    key: &SessionKey,
    local: &Path,
    rel: &str,
) -> Result<String> {
    validate_relative(rel)?;
    if !local.is_file() {
        return Err(CmdwatchError::NotAFile(local.display().to_string()));
    }

    let token = new_upload_token();
    let staging_dir = client.remote_file(key, files::UPLOAD_STAGING_DIR);
    client
        .sync()
        .remote_mkdir(&staging_dir, timeouts::REMOTE_MKDIR)
        .await?;
    client
        .sync()
        .push_file(
            local,
            &format!("{staging_dir}/{token}"),
            timeouts::STAGED_TRANSFER,
            false,
        )
        .await?;

    let line = directive_line("move_staged_file", &[&token, rel]);
    client.send_command(key, &[line]).await?;
    info!(session = %key, token = %token, dest = %rel, "upload staged");
    Ok(token)
}

/// Queue a download offer for `rel`.
pub async fn request_download<T: Transport + 'static>(
    client: &WatcherClient<T>,
    key: &SessionKey,
    rel: &str,
) -> Result<()> {
    validate_relative(rel)?;
    let line = directive_line("stage_file_for_download", &[rel]);
    client.send_command(key, &[line]).await
}

/// Modification time of the download slot as last mirrored, if there is one.
async fn slot_stamp<T: Transport + 'static>(
    client: &WatcherClient<T>,
    key: &SessionKey,
) -> Option<SystemTime> {
    let mirrored = client.local_file(key, files::DOWNLOAD_SLOT);
    client
        .sync()
        .pull_file(
            &client.remote_file(key, files::DOWNLOAD_SLOT),
            &mirrored,
            timeouts::STAGED_TRANSFER,
            true,
        )
        .await
        .ok()?;
    fs::metadata(&mirrored).and_then(|m| m.modified()).ok()
}

/// Offer, wait for the watcher's internal frame, then fetch.
///
/// The client must already be attached to `key` so that only frames written
/// after the request are considered. Frames of other directives can still
/// arrive first, so a success frame only counts once the slot has changed,
/// and a failure only when its reason names `rel`.
pub async fn download_file<T: Transport + 'static>(
    client: &WatcherClient<T>,
    key: &SessionKey,
    rel: &str,
    local: &Path,
    poll_every: Duration,
    limit: Duration,
) -> Result<()> {
    let before = slot_stamp(client, key).await;
    request_download(client, key, rel).await?;

    let deadline = Instant::now() + limit;
    loop {
        if Instant::now() >= deadline {
            return Err(CmdwatchError::SyncTimeout {
                what: format!("waiting for {rel} to be staged"),
                secs: limit.as_secs(),
            });
        }
        tokio::time::sleep(poll_every).await;

        let Some(update) = client.poll_once(key).await? else {
            continue;
        };

        let mut reason = None;
        for event in &update.events {
            match event {
                LogEvent::Output(text) => reason = Some(text.as_str()),
                LogEvent::Exit(frame) if frame.internal => {
                    if frame.code == 0 {
                        let stamp = slot_stamp(client, key).await;
                        if stamp.is_some() && stamp != before {
                            let mirrored = client.local_file(key, files::DOWNLOAD_SLOT);
                            if let Some(parent) = local.parent() {
                                fs::create_dir_all(parent)?;
                            }
                            fs::copy(&mirrored, local)?;
                            info!(session = %key, source = %rel, "download fetched");
                            return Ok(());
                        }
                        debug!(session = %key, "slot unchanged; frame belongs to another directive");
                    } else if let Some(text) = reason.filter(|t| t.contains(rel)) {
                        return Err(CmdwatchError::Sync(format!(
                            "staging {rel} failed (code {}): {text}",
                            frame.code
                        )));
                    }
                    reason = None;
                }
                _ => reason = None,
            }
        }
        debug!(session = %key, "download not staged yet");
    }
}
