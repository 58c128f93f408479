#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

pub use cmdwatch_test_utils::builders;
pub use cmdwatch_test_utils::fake_containers::{FakeContainerRuntime, write_fake_docker};
pub use cmdwatch_test_utils::fake_executor::RecordingBackend;
pub use cmdwatch_test_utils::fake_transport::FakeTransport;
pub use cmdwatch_test_utils::{init_tracing, wait_until, with_timeout};

use cmdwatch::protocol::EXIT_MARKER_PREFIX;
use cmdwatch::session::SessionPaths;

/// Append newline-terminated lines to a session's command queue.
pub fn enqueue(paths: &SessionPaths, lines: &[&str]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.queue())
        .unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

pub fn read_log(paths: &SessionPaths) -> String {
    fs::read_to_string(paths.output_log()).unwrap_or_default()
}

/// Number of exit frames currently in the log.
pub fn frame_count(paths: &SessionPaths) -> usize {
    read_log(paths)
        .lines()
        .filter(|l| l.contains(EXIT_MARKER_PREFIX))
        .count()
}

pub fn write_runtime_config(paths: &SessionPaths, json: &str) {
    fs::write(paths.runtime_config(), json).unwrap();
}

pub fn touch(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}
