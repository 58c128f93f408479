use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use cmdwatch::errors::{CmdwatchError, Result};
use cmdwatch::exec::BoxFuture;
use cmdwatch::sync::{Endpoint, Transport};

/// Transport that maps remote paths into a local directory.
///
/// `Remote("/srv/x")` lives at `<remote_root>/srv/x`. Mirrors are plain
/// copies that keep the source mtime, like `rsync -t`; `remote_exec` understands `mkdir -p <path>` only.
pub struct FakeTransport {
    remote_root: PathBuf,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(remote_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every mirror sleep first (for overlap tests).
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Where a remote path lives on the local disk.
    pub fn remote_path(&self, remote: &str) -> PathBuf {
        self.remote_root.join(remote.trim_start_matches('/'))
    }

    fn resolve(&self, endpoint: Endpoint<'_>) -> PathBuf {
        match endpoint {
            Endpoint::Local(p) => p.to_path_buf(),
            Endpoint::Remote(p) => self.remote_path(p),
        }
    }
}

fn copy_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::copy(src, dst)?;
    let modified = fs::metadata(src)?.modified()?;
    fs::OpenOptions::new().write(true).open(dst)?.set_modified(modified)
}

fn copy_tree(src: &Path, dst: &Path, delete: bool) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target, delete)?;
        } else {
            copy_file(&entry.path(), &target)?;
        }
    }
    if delete {
        for entry in fs::read_dir(dst)? {
            let entry = entry?;
            if !src.join(entry.file_name()).exists() {
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
        }
    }
    Ok(())
}

impl Transport for FakeTransport {
    fn mirror<'a>(
        &'a self,
        src: Endpoint<'a>,
        dst: Endpoint<'a>,
        delete: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("mirror {src} -> {dst}"));
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let from = self.resolve(src);
            let to = self.resolve(dst);
            if from.is_dir() {
                copy_tree(&from, &to, delete)?;
            } else if from.is_file() {
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent)?;
                }
                copy_file(&from, &to)?;
            } else {
                return Err(CmdwatchError::Sync(format!("no such file: {src}")));
            }
            Ok(())
        })
    }

    fn remote_exec<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("exec {command}"));
            let words: Vec<&str> = command.split_whitespace().collect();
            match words.as_slice() {
                ["mkdir", "-p", path] => {
                    let path = path.trim_matches('\'');
                    fs::create_dir_all(self.remote_path(path))?;
                    Ok(String::new())
                }
                _ => Err(CmdwatchError::Sync(format!("unsupported remote command: {command}"))),
            }
        })
    }
}
