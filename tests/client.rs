// tests/client.rs

mod common;
use crate::common::builders::{
    SettingsBuilder, default_client_config, recording_watcher, session_dir,
};
use crate::common::{
    FakeContainerRuntime, FakeTransport, RecordingBackend, init_tracing, touch, with_timeout,
};

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cmdwatch::config::{RuntimeConfig, load_runtime_config};
use cmdwatch::engine::Watcher;
use cmdwatch::errors::CmdwatchError;
use cmdwatch::protocol::ExitFrame;
use cmdwatch::registry::Registrar;
use cmdwatch::sync::transfer::{download_file, upload_file};
use cmdwatch::sync::{LogEvent, WatcherClient, decode_log_delta};
use cmdwatch::types::{ExecMode, SessionKey};

type TestResult = Result<(), Box<dyn Error>>;

/// A client and a watcher sharing one fake remote host.
struct Rig {
    _tmp: tempfile::TempDir,
    mirror: PathBuf,
    /// The watcher's session directory on the "remote" side.
    session_root: PathBuf,
    key: SessionKey,
    client: WatcherClient<FakeTransport>,
    watcher: Watcher<RecordingBackend>,
    backend: RecordingBackend,
}

fn rig() -> Rig {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let remote_root = tmp.path().join("remote");
    let mirror = tmp.path().join("mirror");

    let session_root = session_dir(&remote_root.join("srv/cmdwatch"), "w1", "s1");
    let settings = SettingsBuilder::new(&session_root).name("Watcher one").build();
    let (watcher, backend) =
        recording_watcher(settings, Arc::new(FakeContainerRuntime::new("docker")));

    let client = WatcherClient::new(
        default_client_config(&mirror),
        FakeTransport::new(&remote_root),
    );

    Rig {
        _tmp: tmp,
        mirror,
        session_root,
        key: SessionKey::new("w1", "s1"),
        client,
        watcher,
        backend,
    }
}

fn remote_log(rig: &Rig) -> PathBuf {
    rig.session_root.join("commands.log")
}

fn append_remote_log(rig: &Rig, text: &str) {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(remote_log(rig))
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[tokio::test]
async fn sent_commands_reach_the_watcher_and_replies_come_back() -> TestResult {
    let mut r = rig();

    r.client
        .send_command(
            &r.key,
            &["_internal_create_dir::made".to_string(), "cd made".to_string()],
        )
        .await?;
    assert_eq!(r.watcher.poll_once().await?, 2);
    assert!(r.session_root.join("made").is_dir());

    let update = r.client.poll_once(&r.key).await?.expect("no poll in flight");
    assert_eq!(
        update.events,
        vec![
            LogEvent::Exit(ExitFrame::internal(0)),
            LogEvent::Exit(ExitFrame::user(0)),
        ]
    );
    assert!(update.prompt_refresh);
    assert!(!update.truncated);

    let status = update.status.expect("status mirrored");
    assert_eq!(status.cwd_rel, "made");
    assert_eq!(status.mode, "host");

    r.client.send_command(&r.key, &["make all".to_string()]).await?;
    r.watcher.poll_once().await?;
    assert_eq!(r.backend.lines(), vec!["make all".to_string()]);
    Ok(())
}

#[tokio::test]
async fn queue_pushes_start_from_the_remote_copy() -> TestResult {
    let r = rig();
    fs::write(r.session_root.join("commands.txt"), "echo earlier\n")?;

    r.client.send_command(&r.key, &["echo later".to_string()]).await?;

    assert_eq!(
        fs::read_to_string(r.session_root.join("commands.txt"))?,
        "echo earlier\necho later\n"
    );
    let local = r.mirror.join("sessions/w1/s1/commands.txt");
    assert_eq!(fs::read_to_string(local)?, "echo earlier\necho later\n");
    Ok(())
}

#[tokio::test]
async fn a_rejected_batch_leaves_nothing_behind() -> TestResult {
    let mut r = rig();
    let result = r
        .client
        .send_command(&r.key, &["echo first".to_string(), "echo a\necho b".to_string()])
        .await;
    assert!(matches!(result, Err(CmdwatchError::InvalidDirective(_))));

    r.client.send_command(&r.key, &["echo second".to_string()]).await?;
    r.watcher.poll_once().await?;

    assert_eq!(r.backend.lines(), vec!["echo second".to_string()]);
    Ok(())
}

#[tokio::test]
async fn polls_decode_only_complete_new_lines() -> TestResult {
    let r = rig();
    append_remote_log(&r, "hi\n\n__CMD_EXIT_CODE__::0\npart");

    let update = r.client.poll_once(&r.key).await?.unwrap();
    assert_eq!(
        update.events,
        vec![
            LogEvent::Output("hi".to_string()),
            LogEvent::Exit(ExitFrame::user(0)),
        ]
    );

    let update = r.client.poll_once(&r.key).await?.unwrap();
    assert!(update.is_empty());

    append_remote_log(&r, "ial\n");
    let update = r.client.poll_once(&r.key).await?.unwrap();
    assert_eq!(update.events, vec![LogEvent::Output("partial".to_string())]);
    assert!(!update.prompt_refresh);
    Ok(())
}

#[tokio::test]
async fn a_shrunken_log_resets_the_view() -> TestResult {
    let r = rig();
    append_remote_log(&r, "a long line of output\n\n__CMD_EXIT_CODE__::0\n");
    r.client.poll_once(&r.key).await?;

    fs::write(remote_log(&r), "fresh\n")?;
    let update = r.client.poll_once(&r.key).await?.unwrap();

    assert!(update.truncated);
    assert_eq!(update.events, vec![LogEvent::Output("fresh".to_string())]);
    Ok(())
}

#[tokio::test]
async fn attach_replays_history_without_prompting() -> TestResult {
    let r = rig();
    append_remote_log(&r, "old\n\n__CMD_EXIT_CODE__::0\n__LS_DONE__::src\n__CMD_EXIT_CODE__::INTERNAL:0\n");

    let update = r.client.attach(&r.key).await?;
    assert_eq!(
        update.events,
        vec![
            LogEvent::Output("old".to_string()),
            LogEvent::Exit(ExitFrame::user(0)),
            LogEvent::ListingDone("src".to_string()),
            LogEvent::Exit(ExitFrame::internal(0)),
        ]
    );
    assert!(!update.prompt_refresh);

    append_remote_log(&r, "new\n\n__CMD_EXIT_CODE__::4\n");
    let update = r.client.poll_once(&r.key).await?.unwrap();
    assert_eq!(
        update.events,
        vec![
            LogEvent::Output("new".to_string()),
            LogEvent::Exit(ExitFrame::user(4)),
        ]
    );
    assert!(update.prompt_refresh);
    Ok(())
}

#[tokio::test]
async fn overlapping_polls_are_skipped() -> TestResult {
    let r = rig();
    append_remote_log(&r, "x\n");
    r.client
        .sync()
        .transport()
        .set_delay(Some(Duration::from_millis(300)));

    let (first, second) = tokio::join!(r.client.poll_once(&r.key), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        r.client.poll_once(&r.key).await
    });

    assert!(first?.is_some());
    assert!(second?.is_none());

    // The flag clears once the first poll finishes.
    r.client.sync().transport().set_delay(None);
    assert!(r.client.poll_once(&r.key).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn listing_watchers_filters_stale_heartbeats() -> TestResult {
    let r = rig();
    let registry = r.session_root.ancestors().nth(3).unwrap().join("_registry");
    let now = SystemTime::now();

    Registrar::new(registry.join("w1.json"), "Watcher one").beat_at(now)?;
    Registrar::new(registry.join("gone.json"), "Gone").beat_at(now - Duration::from_secs(120))?;

    let live = r.client.list_watchers().await?;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].watcher_id, "w1");
    assert_eq!(live[0].display_name, "Watcher one");
    Ok(())
}

#[tokio::test]
async fn uploads_are_staged_then_moved_by_the_watcher() -> TestResult {
    let mut r = rig();
    let local = r.mirror.join("outgoing.txt");
    touch(&local, "payload\n");

    let token = upload_file(&r.client, &r.key, &local, "inbox/data.txt").await?;
    let staged = r.session_root.join(".staged_uploads").join(&token);
    assert_eq!(fs::read_to_string(&staged)?, "payload\n");

    r.watcher.poll_once().await?;

    assert_eq!(
        fs::read_to_string(r.session_root.join("inbox/data.txt"))?,
        "payload\n"
    );
    assert!(!staged.exists());
    Ok(())
}

#[tokio::test]
async fn uploads_refuse_escaping_destinations_and_missing_sources() -> TestResult {
    let r = rig();
    let local = r.mirror.join("outgoing.txt");
    touch(&local, "x");

    assert!(matches!(
        upload_file(&r.client, &r.key, &local, "../evil").await,
        Err(CmdwatchError::PathEscape(_))
    ));
    assert!(matches!(
        upload_file(&r.client, &r.key, &r.mirror.join("nope"), "ok.txt").await,
        Err(CmdwatchError::NotAFile(_))
    ));
    Ok(())
}

#[tokio::test]
async fn downloads_wait_for_the_watcher_to_stage_the_file() -> TestResult {
    let r = rig();
    touch(&r.session_root.join("out/result.csv"), "a,b\n1,2\n");
    let Rig {
        client,
        key,
        mut watcher,
        mirror,
        ..
    } = r;
    client.attach(&key).await?;

    let target = mirror.join("result.csv");
    let drive = async {
        while watcher.poll_once().await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    tokio::select! {
        result = download_file(
            &client,
            &key,
            "out/result.csv",
            &target,
            Duration::from_millis(20),
            Duration::from_secs(5),
        ) => result?,
        _ = drive => panic!("watcher loop stopped"),
    }

    assert_eq!(fs::read_to_string(&target)?, "a,b\n1,2\n");
    Ok(())
}

#[tokio::test]
async fn downloads_ignore_frames_of_earlier_directives() -> TestResult {
    let r = rig();
    touch(&r.session_root.join("out/result.csv"), "fresh\n");
    let slot = r.session_root.join(".staged_for_download");
    touch(&slot, "stale\n");
    fs::OpenOptions::new()
        .write(true)
        .open(&slot)?
        .set_modified(SystemTime::now() - Duration::from_secs(3600))?;

    let Rig {
        client,
        key,
        mut watcher,
        mirror,
        ..
    } = r;
    client.attach(&key).await?;

    // One success frame and one unrelated failure land before the request.
    client
        .send_command(
            &key,
            &[
                "_internal_create_dir::x".to_string(),
                "_internal_delete_path::nope".to_string(),
            ],
        )
        .await?;
    assert_eq!(watcher.poll_once().await?, 2);

    let target = mirror.join("result.csv");
    let drive = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        while watcher.poll_once().await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    tokio::select! {
        result = download_file(
            &client,
            &key,
            "out/result.csv",
            &target,
            Duration::from_millis(20),
            Duration::from_secs(5),
        ) => result?,
        _ = drive => panic!("watcher loop stopped"),
    }

    assert_eq!(fs::read_to_string(&target)?, "fresh\n");
    Ok(())
}

#[tokio::test]
async fn failed_staging_surfaces_the_watcher_reason() -> TestResult {
    let r = rig();
    let Rig {
        client,
        key,
        mut watcher,
        mirror,
        ..
    } = r;
    client.attach(&key).await?;

    let target = mirror.join("missing.csv");
    let drive = async {
        while watcher.poll_once().await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    let result = tokio::select! {
        result = download_file(
            &client,
            &key,
            "missing.csv",
            &target,
            Duration::from_millis(20),
            Duration::from_secs(5),
        ) => result,
        _ = drive => panic!("watcher loop stopped"),
    };

    match result {
        Err(CmdwatchError::Sync(msg)) => assert!(msg.contains("missing.csv"), "{msg}"),
        other => panic!("expected a staging failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn runtime_config_lands_in_the_remote_session() -> TestResult {
    let r = rig();
    let cfg = RuntimeConfig {
        mode: Some(ExecMode::DockerExec),
        container_name: Some("dev".to_string()),
        image: Some("python:3.12".to_string()),
        ..RuntimeConfig::default()
    };

    r.client.push_runtime_config(&r.key, &cfg).await?;

    let pushed = load_runtime_config(r.session_root.join(".runner_config.json"))?;
    assert_eq!(pushed, Some(cfg));
    Ok(())
}

#[tokio::test]
async fn cached_lists_come_back_trimmed() -> TestResult {
    let r = rig();
    fs::write(
        r.session_root.join(".docker_images.txt"),
        "alpine:3\n\n  python:3.12 \n",
    )?;

    let images = r.client.pull_cached_list(&r.key, ".docker_images.txt").await?;

    assert_eq!(images, vec!["alpine:3".to_string(), "python:3.12".to_string()]);
    assert!(r.client.pull_cached_list(&r.key, ".docker_containers.txt").await.is_err());
    Ok(())
}

#[tokio::test]
async fn session_mirror_copies_the_whole_directory() -> TestResult {
    let r = rig();
    touch(&r.session_root.join("out/result.csv"), "1,2\n");

    let local = r.client.mirror_session(&r.key, false).await?;

    assert_eq!(local, r.mirror.join("sessions/w1/s1"));
    assert_eq!(fs::read_to_string(local.join("out/result.csv"))?, "1,2\n");
    Ok(())
}

#[tokio::test]
async fn only_heavy_transfers_raise_the_busy_indicator() -> TestResult {
    let r = rig();
    let sync = r.client.sync();
    let mut busy = sync.busy().subscribe();
    let local = r.mirror.join("payload.bin");
    touch(&local, "data");
    sync.transport().set_delay(Some(Duration::from_millis(200)));

    let remote = "/srv/cmdwatch/sessions/w1/s1/payload.bin";
    let (pushed, seen) = tokio::join!(
        sync.push_file(&local, remote, Duration::from_secs(5), false),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sync.busy().is_busy()
        }
    );
    pushed?;
    assert!(seen);
    assert!(busy.has_changed()?);
    assert!(!*busy.borrow_and_update());
    assert!(!sync.busy().is_busy());

    let back_path = r.mirror.join("back.bin");
    let (pulled, seen) = tokio::join!(
        sync.pull_file(remote, &back_path, Duration::from_secs(5), true),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sync.busy().is_busy()
        }
    );
    pulled?;
    assert!(!seen);
    assert!(!busy.has_changed()?);
    Ok(())
}

#[tokio::test]
async fn background_polling_delivers_new_output() -> TestResult {
    let r = rig();
    let log = remote_log(&r);
    let client = Arc::new(r.client);
    client.attach(&r.key).await?;

    let (mut rx, handle) = client.spawn_polling(r.key.clone(), Duration::from_millis(20));
    {
        use std::io::Write;
        fs::OpenOptions::new()
            .append(true)
            .open(&log)?
            .write_all(b"from the loop\n\n__CMD_EXIT_CODE__::0\n")?;
    }

    // Status-only updates may arrive first.
    let update = with_timeout(async {
        loop {
            match rx.recv().await {
                Some(update) if update.events.is_empty() => continue,
                other => break other,
            }
        }
    })
    .await
    .expect("polling task alive");
    handle.abort();

    assert_eq!(
        update.events,
        vec![
            LogEvent::Output("from the loop".to_string()),
            LogEvent::Exit(ExitFrame::user(0)),
        ]
    );
    assert!(update.prompt_refresh);
    Ok(())
}

#[test]
fn log_deltas_decode_into_ordered_events() {
    assert_eq!(decode_log_delta(""), vec![]);
    assert_eq!(
        decode_log_delta("a\nb\n\n"),
        vec![LogEvent::Output("a\nb".to_string())]
    );
    assert_eq!(
        decode_log_delta("[Watcher] Command not allowed: rm\n__CMD_EXIT_CODE__::126\n"),
        vec![
            LogEvent::Output("[Watcher] Command not allowed: rm".to_string()),
            LogEvent::Exit(ExitFrame::user(126)),
        ]
    );
    assert_eq!(
        decode_log_delta("no newline__CMD_EXIT_CODE__::2\n"),
        vec![
            LogEvent::Output("no newline".to_string()),
            LogEvent::Exit(ExitFrame::user(2)),
        ]
    );
    // A damaged code still counts as a frame.
    assert_eq!(
        decode_log_delta("__CMD_EXIT_CODE__::oops\n"),
        vec![LogEvent::Exit(ExitFrame {
            code: -1,
            internal: false
        })]
    );
}
