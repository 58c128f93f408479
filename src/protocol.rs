// src/protocol.rs

//! Wire format shared by the watcher and its clients.
//!
//! Nothing here touches the filesystem. The watcher renders frames and
//! markers into the output log; the client parses them back out of the
//! tailed text.

use std::fmt;

/// Sentinel that starts every Exit-Code Frame line.
pub const EXIT_SENTINEL: &str = "__CMD_EXIT_CODE__";

/// `EXIT_SENTINEL` followed by the field separator, as it appears in the log.
pub const EXIT_MARKER_PREFIX: &str = "__CMD_EXIT_CODE__::";

/// Tag placed before the code of frames that must not reach the user prompt.
pub const INTERNAL_TAG: &str = "INTERNAL:";

/// Reserved prefix of internal directives in the command queue.
pub const DIRECTIVE_PREFIX: &str = "_internal_";

/// Separator between directive name and arguments.
pub const FIELD_SEPARATOR: &str = "::";

/// Plain log line announcing that `.ls_result.txt` is ready.
pub const LS_DONE_PREFIX: &str = "__LS_DONE__::";

/// Exit code written for lines rejected by the allow-list.
pub const REJECTED_EXIT_CODE: i32 = 126;

/// Generic failure code for directives and per-line processing errors.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Per-session side files, relative to the session directory.
pub mod files {
    pub const COMMAND_QUEUE: &str = "commands.txt";
    pub const OUTPUT_LOG: &str = "commands.log";
    pub const READ_OFFSET: &str = ".commands.offset";
    pub const STATUS: &str = ".watcher_status.json";
    pub const RUNTIME_CONFIG: &str = ".runner_config.json";
    pub const LS_RESULT: &str = ".ls_result.txt";
    pub const UPLOAD_STAGING_DIR: &str = ".staged_uploads";
    pub const DOWNLOAD_SLOT: &str = ".staged_for_download";
    pub const DOCKER_IMAGES: &str = ".docker_images.txt";
    pub const DOCKER_CONTAINERS: &str = ".docker_containers.txt";
    pub const SCRIPT_OUTPUT: &str = ".script_output.log";
}

/// Completion frame of one executed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitFrame {
    pub code: i32,
    /// Internal frames come from directives and are hidden from the prompt.
    pub internal: bool,
}

impl ExitFrame {
    pub fn user(code: i32) -> Self {
        Self {
            code,
            internal: false,
        }
    }

    pub fn internal(code: i32) -> Self {
        Self {
            code,
            internal: true,
        }
    }

    /// The frame exactly as appended to the log, surrounding newlines included.
    pub fn render(&self) -> String {
        format!("\n{self}\n")
    }
}

impl fmt::Display for ExitFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.internal {
            write!(f, "{EXIT_MARKER_PREFIX}{INTERNAL_TAG}{}", self.code)
        } else {
            write!(f, "{EXIT_MARKER_PREFIX}{}", self.code)
        }
    }
}

/// Split a log line containing an exit marker into the text before the
/// marker and the decoded frame.
///
/// Returns `None` when the line carries no marker. A marker whose code does
/// not parse still counts as a frame (code `-1`), so a damaged frame never
/// leaks into user-visible output.
pub fn parse_exit_line(line: &str) -> Option<(&str, ExitFrame)> {
    let idx = line.find(EXIT_MARKER_PREFIX)?;
    let before = &line[..idx];
    let payload = line[idx + EXIT_MARKER_PREFIX.len()..].trim();

    let (internal, code_str) = match payload.strip_prefix(INTERNAL_TAG) {
        Some(rest) => (true, rest.trim()),
        None => (false, payload),
    };
    let code = code_str.parse::<i32>().unwrap_or(-1);

    Some((before, ExitFrame { code, internal }))
}

/// Session-relative path carried by an `__LS_DONE__::` line.
pub fn parse_ls_done(line: &str) -> Option<&str> {
    line.strip_prefix(LS_DONE_PREFIX)
}

pub fn ls_done_line(rel_path: &str) -> String {
    format!("{LS_DONE_PREFIX}{rel_path}")
}

/// Compose a queue line for an internal directive.
pub fn directive_line(name: &str, args: &[&str]) -> String {
    let mut line = format!("{DIRECTIVE_PREFIX}{name}");
    for arg in args {
        line.push_str(FIELD_SEPARATOR);
        line.push_str(arg);
    }
    line
}
