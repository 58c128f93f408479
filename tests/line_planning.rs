// tests/line_planning.rs

use std::path::PathBuf;

use cmdwatch::engine::{LineAction, QueueItem, WatcherState, classify, is_allowed, plan};
use cmdwatch::exec::ShellJob;
use cmdwatch::protocol::ExitFrame;
use cmdwatch::types::ExecMode;

fn allow(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn classify_recognises_every_line_kind() {
    assert_eq!(classify(""), QueueItem::Skip);
    assert_eq!(classify("   # just a note"), QueueItem::Skip);
    assert_eq!(
        classify("_internal_create_link::data/a.txt::a"),
        QueueItem::Directive {
            name: "create_link".to_string(),
            args: vec!["data/a.txt".to_string(), "a".to_string()],
        }
    );
    assert_eq!(
        classify("_internal_clear_log"),
        QueueItem::Directive {
            name: "clear_log".to_string(),
            args: vec![],
        }
    );
    assert_eq!(classify("cd"), QueueItem::ChangeDir { target: None });
    assert_eq!(
        classify("cd 'my dir'"),
        QueueItem::ChangeDir {
            target: Some("my dir".to_string())
        }
    );
    assert_eq!(classify("conda activate"), QueueItem::CondaActivate { env: None });
    assert_eq!(
        classify("conda activate torch"),
        QueueItem::CondaActivate {
            env: Some("torch".to_string())
        }
    );
    assert_eq!(classify("conda deactivate"), QueueItem::CondaDeactivate);
    assert_eq!(classify("ls -la"), QueueItem::Shell("ls -la".to_string()));
}

#[test]
fn compound_cd_and_conda_lines_go_to_the_shell() {
    assert_eq!(
        classify("cd build && make"),
        QueueItem::Shell("cd build && make".to_string())
    );
    assert_eq!(classify("cd a b"), QueueItem::Shell("cd a b".to_string()));
    assert_eq!(
        classify("conda env list"),
        QueueItem::Shell("conda env list".to_string())
    );
    // `cdrom` is not `cd`.
    assert_eq!(classify("cdrom eject"), QueueItem::Shell("cdrom eject".to_string()));
}

#[test]
fn allow_list_checks_the_first_token() {
    let list = allow(&["ls", "python"]);
    assert!(is_allowed("ls -la", &list));
    assert!(is_allowed("python -c 'print(1)'", &list));
    assert!(!is_allowed("rm -rf /", &list));
    assert!(!is_allowed("lsblk", &list));
}

#[test]
fn unparsable_lines_are_rejected_only_by_a_non_empty_list() {
    let line = "echo 'unterminated";
    assert!(is_allowed(line, &[]));
    assert!(!is_allowed(line, &allow(&["echo"])));
}

#[test]
fn plan_submits_shell_lines_with_a_state_snapshot() {
    let mut state = WatcherState {
        cwd_rel: PathBuf::from("src"),
        active_env: Some("ml".to_string()),
    };

    let action = plan(classify("make"), &mut state, &[], ExecMode::Host);

    assert_eq!(
        action,
        LineAction::Submit(ShellJob {
            line: "make".to_string(),
            cwd_rel: PathBuf::from("src"),
            env: Some("ml".to_string()),
        })
    );
}

#[test]
fn plan_rejects_disallowed_lines_with_126() {
    let mut state = WatcherState::default();
    let list = allow(&["echo"]);

    assert_eq!(
        plan(classify("curl example.com"), &mut state, &list, ExecMode::Host),
        LineAction::Reply {
            text: "[Watcher] Command not allowed: curl example.com".to_string(),
            frame: ExitFrame::user(126),
        }
    );
    assert_eq!(
        plan(classify("cd /tmp"), &mut state, &list, ExecMode::Host),
        LineAction::Reply {
            text: "[Watcher] Command not allowed: cd /tmp".to_string(),
            frame: ExitFrame::user(126),
        }
    );
}

#[test]
fn directives_bypass_the_allow_list() {
    let mut state = WatcherState::default();
    let action = plan(
        classify("_internal_list_dir::."),
        &mut state,
        &allow(&["echo"]),
        ExecMode::Host,
    );
    assert_eq!(
        action,
        LineAction::Directive {
            name: "list_dir".to_string(),
            args: vec![".".to_string()],
        }
    );
}

#[test]
fn conda_switches_only_apply_on_the_host() {
    let mut state = WatcherState::default();

    let action = plan(classify("conda activate"), &mut state, &[], ExecMode::Host);
    assert_eq!(state.active_env.as_deref(), Some("base"));
    assert_eq!(
        action,
        LineAction::Reply {
            text: "[Watcher] Activated environment 'base'".to_string(),
            frame: ExitFrame::user(0),
        }
    );

    let action = plan(classify("conda deactivate"), &mut state, &[], ExecMode::DockerRun);
    assert_eq!(state.active_env.as_deref(), Some("base"));
    assert_eq!(
        action,
        LineAction::Reply {
            text: "[Watcher] conda environments are not managed in docker_run mode; ignored"
                .to_string(),
            frame: ExitFrame::user(0),
        }
    );
}
