// tests/config.rs

mod common;
use crate::common::builders::{SettingsBuilder, client_config, session_dir};

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use cmdwatch::config::{
    ClientConfig, RawClientConfig, RuntimeConfig, WatcherSettings, load_client_config,
    load_runtime_config,
};
use cmdwatch::errors::CmdwatchError;
use cmdwatch::types::{ExecMode, SessionKey};

type TestResult = Result<(), Box<dyn Error>>;

const MINIMAL: &str = r#"
[remote]
server = "me@build-box"
base_path = "/srv/cmdwatch/"

[local]
mirror_dir = "/home/me/mirror"
"#;

fn try_config(text: &str) -> Result<ClientConfig, CmdwatchError> {
    let raw: RawClientConfig = toml::from_str(text)?;
    ClientConfig::try_from(raw)
}

#[test]
fn client_config_defaults_and_paths() {
    let cfg = client_config(MINIMAL);
    let key = SessionKey::new("gpu", "train");

    assert_eq!(cfg.log_fetch_interval(), Duration::from_secs(1));
    assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.remote_session_dir(&key), "/srv/cmdwatch/sessions/gpu/train");
    assert_eq!(cfg.remote_registry_dir(), "/srv/cmdwatch/_registry");
    assert_eq!(
        cfg.local_session_dir(&key),
        PathBuf::from("/home/me/mirror/sessions/gpu/train")
    );
    assert_eq!(cfg.local_registry_dir(), PathBuf::from("/home/me/mirror/_registry"));
}

#[test]
fn client_config_validation_errors() {
    let cases = [
        MINIMAL.replace(r#"server = "me@build-box""#, r#"server = "  ""#),
        MINIMAL.replace("/srv/cmdwatch/", "srv/cmdwatch"),
        format!("{MINIMAL}\n[structure]\nsessions_dir_name = \"a/b\"\n"),
        format!("{MINIMAL}\n[structure]\nsessions_dir_name = \"x\"\nregistry_dir_name = \"x\"\n"),
        format!("{MINIMAL}\n[timing]\nlog_fetch_interval_ms = 0\n"),
        format!("{MINIMAL}\n[timing]\nheartbeat_timeout_sec = 0\n"),
    ];
    for text in cases {
        match try_config(&text) {
            Err(CmdwatchError::ConfigError(_)) => {}
            other => panic!("expected ConfigError for {text:?}, got {other:?}"),
        }
    }
}

#[test]
fn client_config_loads_from_disk() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("cmdwatch.toml");
    fs::write(&path, MINIMAL)?;

    let cfg = load_client_config(&path)?;
    assert_eq!(cfg.remote.server, "me@build-box");

    assert!(matches!(
        load_client_config(tmp.path().join("missing.toml")),
        Err(CmdwatchError::IoError(_))
    ));
    fs::write(&path, "[remote\n")?;
    assert!(matches!(load_client_config(&path), Err(CmdwatchError::TomlError(_))));
    Ok(())
}

#[test]
fn runtime_config_file_is_optional() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join(".runner_config.json");
    assert_eq!(load_runtime_config(&path)?, None);

    fs::write(&path, "  \n")?;
    assert_eq!(load_runtime_config(&path)?, None);

    fs::write(&path, r#"{"mode": "container-run", "image": "alpine"}"#)?;
    let cfg = load_runtime_config(&path)?.unwrap();
    assert_eq!(cfg.mode, Some(ExecMode::DockerRun));
    assert_eq!(cfg.image.as_deref(), Some("alpine"));

    fs::write(&path, "{")?;
    assert!(matches!(load_runtime_config(&path), Err(CmdwatchError::JsonError(_))));
    Ok(())
}

#[test]
fn session_mode_beats_static_mode_beats_host() -> TestResult {
    let static_cfg = RuntimeConfig {
        mode: Some(ExecMode::DockerExec),
        container_name: Some("dev".to_string()),
        image: Some("python:3.12".to_string()),
        ..RuntimeConfig::default()
    };

    let resolved = RuntimeConfig::resolve(None, &static_cfg)?;
    assert_eq!(resolved.mode, ExecMode::DockerExec);
    assert_eq!(resolved.container_name.as_deref(), Some("dev"));
    assert_eq!(resolved.mount_path, "/workspace");

    let file = RuntimeConfig {
        mode: Some(ExecMode::DockerRun),
        image: Some(String::new()),
        mount_path: Some("/code/".to_string()),
        extra_args: Some("--gpus all -e 'A=b c'".to_string()),
        ..RuntimeConfig::default()
    };
    let resolved = RuntimeConfig::resolve(Some(&file), &static_cfg)?;
    assert_eq!(resolved.mode, ExecMode::DockerRun);
    // Empty strings count as unset.
    assert_eq!(resolved.image.as_deref(), Some("python:3.12"));
    assert_eq!(resolved.mount_path, "/code");
    assert_eq!(resolved.extra_args, vec!["--gpus", "all", "-e", "A=b c"]);

    let resolved = RuntimeConfig::resolve(None, &RuntimeConfig::default())?;
    assert_eq!(resolved.mode, ExecMode::Host);
    Ok(())
}

#[test]
fn relative_mount_paths_are_rejected() {
    let file = RuntimeConfig {
        mount_path: Some("workspace".to_string()),
        ..RuntimeConfig::default()
    };
    assert!(matches!(
        RuntimeConfig::resolve(Some(&file), &RuntimeConfig::default()),
        Err(CmdwatchError::ConfigError(_))
    ));
}

#[test]
fn exec_mode_accepts_both_spellings() {
    assert_eq!("container-exec".parse::<ExecMode>(), Ok(ExecMode::DockerExec));
    assert_eq!("DOCKER_RUN".parse::<ExecMode>(), Ok(ExecMode::DockerRun));
    assert_eq!("host".parse::<ExecMode>(), Ok(ExecMode::Host));
    assert!("vm".parse::<ExecMode>().is_err());
}

#[test]
fn settings_derive_identity_and_registry_from_the_session_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let root = session_dir(tmp.path(), "gpu-box", "train");

    let settings = SettingsBuilder::new(&root)
        .name("GPU box")
        .allowed("python, ls ,")
        .env("KEEP_ANSI", "1")
        .env("WATCHER_MAX_OUTPUT_CHARS", "100")
        .build();

    assert_eq!(settings.watcher_id, "gpu-box");
    assert_eq!(settings.display_name, "GPU box");
    assert_eq!(settings.registry_dir, tmp.path().join("_registry"));
    assert_eq!(settings.heartbeat_path(), tmp.path().join("_registry/gpu-box.json"));
    assert_eq!(settings.allowed_commands, vec!["python", "ls"]);
    assert!(settings.keep_ansi);
    assert_eq!(settings.max_output_chars, 100);
    assert_eq!(settings.poll_interval, Duration::from_millis(50));
    assert_eq!(settings.heartbeat_interval, Duration::from_secs(4));
    assert_eq!(settings.docker_bin, "docker");
}

#[test]
fn settings_fall_back_to_ancestors_without_sessions_root() {
    let tmp = tempfile::tempdir().unwrap();
    let root = session_dir(tmp.path(), "w1", "s1");
    let env: HashMap<&str, String> =
        HashMap::from([("COMMANDS_DIR", root.display().to_string())]);

    let settings = WatcherSettings::from_lookup("w", |k| env.get(k).cloned()).unwrap();

    assert_eq!(settings.registry_dir, tmp.path().join("_registry"));
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.max_output_chars, 200_000);
    assert!(settings.allowed_commands.is_empty());
    assert!(!settings.keep_ansi);
}

#[test]
fn invalid_settings_are_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = session_dir(tmp.path(), "w1", "s1");
    let dir = root.display().to_string();

    let cases: Vec<(&str, Vec<(&str, &str)>)> = vec![
        ("  ", vec![]),
        ("w", vec![("WATCHER_POLL_SEC", "0")]),
        ("w", vec![("WATCHER_POLL_SEC", "soon")]),
        ("w", vec![("WATCHER_POLL_SEC", "1e30")]),
        ("w", vec![("WATCHER_EXEC_MODE", "vm")]),
        ("w", vec![("WATCHER_MOUNT_PATH", "relative")]),
        ("w", vec![("WATCHER_MAX_OUTPUT_CHARS", "-1")]),
    ];

    for (name, extra) in cases {
        let mut env: HashMap<&str, String> = HashMap::from([("COMMANDS_DIR", dir.clone())]);
        for (k, v) in &extra {
            env.insert(*k, v.to_string());
        }
        let result = WatcherSettings::from_lookup(name, |k| env.get(k).cloned());
        assert!(
            matches!(result, Err(CmdwatchError::ConfigError(_))),
            "expected ConfigError for {name:?} {extra:?}"
        );
    }
}
