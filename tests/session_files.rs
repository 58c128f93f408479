// tests/session_files.rs

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use cmdwatch::exec::script::{SideFileTail, rewrite_python};
use cmdwatch::fs::paths::{display_rel, is_plain_name, normalize_within, validate_relative};
use cmdwatch::fs::{copy_atomic, write_atomic};
use cmdwatch::protocol::ExitFrame;
use cmdwatch::session::status::{current_uid_gid, short_hostname};
use cmdwatch::session::{OffsetStore, OutputLog, QueueReader, SessionPaths, StatusRecord};
use cmdwatch::transfer::sweep_expired;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn layout_is_created_once_and_then_left_alone() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let paths = SessionPaths::new(tmp.path().join("sessions/w/s"));

    paths.ensure_layout()?;
    assert!(paths.queue().is_file());
    assert!(paths.output_log().is_file());
    assert!(paths.upload_staging_dir().is_dir());

    fs::write(paths.queue(), "echo keep\n")?;
    paths.ensure_layout()?;
    assert_eq!(fs::read_to_string(paths.queue())?, "echo keep\n");
    Ok(())
}

#[test]
fn offset_store_treats_missing_and_garbage_as_zero() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = OffsetStore::new(tmp.path().join(".commands.offset"));
    assert_eq!(store.load()?, 0);

    store.store(42)?;
    assert_eq!(store.load()?, 42);

    fs::write(tmp.path().join(".commands.offset"), "forty-two")?;
    assert_eq!(store.load()?, 0);
    assert_eq!(fs::read_to_string(tmp.path().join(".commands.offset"))?, "0");
    Ok(())
}

#[test]
fn queue_reader_returns_complete_lines_with_end_offsets() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let queue = tmp.path().join("commands.txt");
    fs::write(&queue, "one\r\ntwo\nthr")?;

    let mut reader = QueueReader::open(&queue, OffsetStore::new(tmp.path().join("off")))?;
    let lines = reader.pending()?;
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert_eq!(lines[0].end_offset, 5);
    assert_eq!(lines[1].end_offset, 9);

    // `pending` does not consume.
    assert_eq!(reader.offset(), 0);
    reader.advance_to(lines[1].end_offset)?;
    reader.advance_to(lines[0].end_offset)?;
    assert_eq!(reader.offset(), 9);
    assert!(reader.pending()?.is_empty());
    Ok(())
}

#[test]
fn output_log_frames_units_and_strips_ansi() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let log = OutputLog::new(tmp.path().join("commands.log"), false, 0)?;

    log.append_line("\x1b[1;32mbuilt\x1b[0m")?;
    log.append_frame(ExitFrame::user(0))?;
    log.append("listing failed\n", Some(ExitFrame::internal(1)))?;

    assert_eq!(
        fs::read_to_string(log.path())?,
        "built\n\n__CMD_EXIT_CODE__::0\nlisting failed\n\n__CMD_EXIT_CODE__::INTERNAL:1\n"
    );

    log.clear()?;
    assert_eq!(log.size()?, 0);
    Ok(())
}

#[test]
fn output_log_can_keep_ansi_and_bounds_large_output() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let keep = OutputLog::new(tmp.path().join("a.log"), true, 0)?;
    assert_eq!(keep.sanitize("\x1b[31mred"), "\x1b[31mred");

    let bounded = OutputLog::new(tmp.path().join("b.log"), false, 5)?;
    assert_eq!(bounded.sanitize("héllo world"), "héllo\n...[truncated]");
    assert_eq!(bounded.sanitize("short"), "short");
    Ok(())
}

#[test]
fn status_record_is_written_as_json() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join(".watcher_status.json");
    let record = StatusRecord {
        user: "ada".to_string(),
        host: "box".to_string(),
        cwd: "/workspace/src".to_string(),
        cwd_rel: "src".to_string(),
        conda_env: None,
        mode: "docker_exec".to_string(),
    };

    record.write_to(&path)?;
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(json["cwd"], "/workspace/src");
    assert_eq!(json["conda_env"], serde_json::Value::Null);
    assert_eq!(StatusRecord::read_from(&path)?, record);
    Ok(())
}

#[test]
fn relative_paths_reject_escapes() {
    assert_eq!(validate_relative("a/./b").unwrap(), PathBuf::from("a/b"));
    assert_eq!(validate_relative(".").unwrap(), PathBuf::new());
    assert!(validate_relative("../x").is_err());
    assert!(validate_relative("a/../b").is_err());
    assert!(validate_relative("/etc/passwd").is_err());
}

#[test]
fn cd_targets_may_climb_but_not_leave_the_root() {
    let root = Path::new("/srv/s");
    let cwd = Path::new("a/b");
    assert_eq!(normalize_within(root, cwd, "..").unwrap(), PathBuf::from("a"));
    assert_eq!(normalize_within(root, cwd, "../../c").unwrap(), PathBuf::from("c"));
    assert_eq!(normalize_within(root, cwd, "/srv/s/x").unwrap(), PathBuf::from("x"));
    assert!(normalize_within(root, cwd, "../../..").is_err());
    assert!(normalize_within(root, cwd, "/srv/other").is_err());
    assert_eq!(display_rel(Path::new("")), ".");
}

#[test]
fn plain_names_are_single_components() {
    assert!(is_plain_name("1700000000000-ab12cd34"));
    assert!(!is_plain_name(""));
    assert!(!is_plain_name(".."));
    assert!(!is_plain_name("a/b"));
}

#[test]
fn atomic_writes_replace_whole_files() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let target = tmp.path().join("nested/out.txt");
    write_atomic(&target, b"first")?;
    write_atomic(&target, b"second")?;
    assert_eq!(fs::read_to_string(&target)?, "second");

    let copy = tmp.path().join("copy.txt");
    copy_atomic(&target, &copy)?;
    assert_eq!(fs::read_to_string(&copy)?, "second");

    let leftovers: Vec<_> = fs::read_dir(tmp.path().join("nested"))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn python_scripts_are_rewritten_unbuffered() {
    assert_eq!(
        rewrite_python("python train.py --epochs 3").as_deref(),
        Some("python -u train.py --epochs 3")
    );
    assert_eq!(
        rewrite_python("/usr/bin/python3.11 tools/run.py").as_deref(),
        Some("/usr/bin/python3.11 -u tools/run.py")
    );
    assert_eq!(
        rewrite_python("python3 -u main.py").as_deref(),
        Some("python3 -u main.py")
    );
    assert_eq!(rewrite_python("python -c 'print(1)'"), None);
    assert_eq!(rewrite_python("python train.py | tee out.txt"), None);
    assert_eq!(rewrite_python("pythonista app.py"), None);
}

#[test]
fn side_file_tail_copies_complete_lines_then_flushes_the_rest() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let side = tmp.path().join(".script_output.log");
    let log = OutputLog::new(tmp.path().join("commands.log"), false, 0)?;
    let mut tail = SideFileTail::new(&side);

    assert_eq!(tail.drain(&log, false)?, 0);

    fs::write(&side, "epoch 1\nepoch 2\nepo")?;
    assert_eq!(tail.drain(&log, false)?, 2);

    fs::write(&side, "epoch 1\nepoch 2\nepoch 3")?;
    assert_eq!(tail.drain(&log, true)?, 1);

    assert_eq!(
        fs::read_to_string(log.path())?,
        "epoch 1\nepoch 2\nepoch 3\n"
    );
    Ok(())
}

#[test]
fn identity_fields_are_short_and_present() {
    let host = short_hostname();
    assert!(!host.is_empty());
    assert!(!host.contains('.'));

    let uid_gid = current_uid_gid();
    let (uid, gid) = uid_gid.split_once(':').unwrap();
    assert!(uid.parse::<u32>().is_ok());
    assert!(gid.parse::<u32>().is_ok());
}

#[test]
fn sweep_removes_only_expired_uploads() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let staging = tmp.path().join(".staged_uploads");
    fs::create_dir_all(staging.join("nested"))?;
    fs::write(staging.join("old-token"), "old")?;
    fs::write(staging.join("new-token"), "new")?;

    let now = SystemTime::now();
    fs::OpenOptions::new()
        .write(true)
        .open(staging.join("old-token"))?
        .set_modified(now - Duration::from_secs(2 * 3600))?;

    let removed = sweep_expired(&staging, Duration::from_secs(3600), now)?;

    assert_eq!(removed, 1);
    assert!(!staging.join("old-token").exists());
    assert!(staging.join("new-token").exists());
    assert!(staging.join("nested").is_dir());

    assert_eq!(sweep_expired(&tmp.path().join("absent"), Duration::ZERO, now)?, 0);
    Ok(())
}
