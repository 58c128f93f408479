use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use cmdwatch::config::{ClientConfig, RawClientConfig, WatcherSettings};
use cmdwatch::engine::Watcher;
use cmdwatch::exec::ContainerRuntime;
use cmdwatch::session::{OutputLog, SessionPaths};

use crate::fake_executor::RecordingBackend;

/// Create `<base>/sessions/<watcher>/<session>` and return it.
pub fn session_dir(base: &Path, watcher: &str, session: &str) -> PathBuf {
    let dir = base.join("sessions").join(watcher).join(session);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Builder for `WatcherSettings` backed by an in-memory environment.
pub struct SettingsBuilder {
    name: String,
    env: HashMap<String, String>,
}

impl SettingsBuilder {
    /// Settings bound to `session_dir`, with the registry as a sibling of
    /// the sessions root and a fast poll interval.
    pub fn new(session_dir: &Path) -> Self {
        let sessions_root = session_dir
            .parent()
            .and_then(Path::parent)
            .unwrap_or(session_dir);
        let mut env = HashMap::new();
        env.insert("COMMANDS_DIR".to_string(), session_dir.display().to_string());
        env.insert(
            "REMOTE_SESSIONS_ROOT".to_string(),
            sessions_root.display().to_string(),
        );
        env.insert("WATCHER_POLL_SEC".to_string(), "0.05".to_string());
        Self {
            name: "test watcher".to_string(),
            env,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn allowed(self, commands: &str) -> Self {
        self.env("WATCHER_ALLOWED_CMDS", commands)
    }

    pub fn build(self) -> WatcherSettings {
        let env = self.env;
        WatcherSettings::from_lookup(&self.name, |k| env.get(k).cloned())
            .expect("valid watcher settings")
    }
}

/// Parse a client config from TOML text and validate it.
pub fn client_config(toml_text: &str) -> ClientConfig {
    let raw: RawClientConfig = toml::from_str(toml_text).expect("valid TOML");
    ClientConfig::try_from(raw).expect("valid client config")
}

/// Client config pointing at `/srv/cmdwatch` with the mirror under `mirror`.
pub fn default_client_config(mirror: &Path) -> ClientConfig {
    client_config(&format!(
        "[remote]\nserver = \"tester@remote\"\nbase_path = \"/srv/cmdwatch\"\n\n[local]\nmirror_dir = \"{}\"\n\n[timing]\nlog_fetch_interval_ms = 50\n",
        mirror.display()
    ))
}

/// Watcher over `settings` whose shell lines are only recorded.
///
/// Returns the backend handle so tests can inspect submitted jobs.
pub fn recording_watcher(
    settings: WatcherSettings,
    containers: Arc<dyn ContainerRuntime>,
) -> (Watcher<RecordingBackend>, RecordingBackend) {
    let paths = SessionPaths::new(&settings.session_dir);
    let log = Arc::new(
        OutputLog::new(
            paths.output_log(),
            settings.keep_ansi,
            settings.max_output_chars,
        )
        .expect("output log"),
    );
    let (_refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    let backend = RecordingBackend::new();
    let watcher = Watcher::new(settings, log, containers, backend.clone(), refresh_rx)
        .expect("watcher over test session");
    (watcher, backend)
}
