// src/sync/decode.rs

use crate::protocol::{ExitFrame, parse_exit_line, parse_ls_done};

/// One decoded piece of the output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Consecutive plain lines, joined with `\n`.
    Output(String),
    /// `.ls_result.txt` for this path is ready.
    ListingDone(String),
    Exit(ExitFrame),
}

#[derive(Default)]
struct Coalescer {
    pending: Vec<String>,
}

impl Coalescer {
    fn push(&mut self, line: &str) {
        self.pending.push(line.to_string());
    }

    /// Emit buffered lines. Trailing blank lines are the padding that
    /// precedes a frame and are dropped.
    fn flush(&mut self, events: &mut Vec<LogEvent>) {
        while self.pending.last().is_some_and(|l| l.trim().is_empty()) {
            self.pending.pop();
        }
        if !self.pending.is_empty() {
            events.push(LogEvent::Output(self.pending.join("\n")));
        }
        self.pending.clear();
    }
}

/// Decode newly appended log text into events, in log order.
pub fn decode_log_delta(text: &str) -> Vec<LogEvent> {
    let mut events = Vec::new();
    let mut output = Coalescer::default();

    for line in text.lines() {
        if let Some(rel) = parse_ls_done(line) {
            output.flush(&mut events);
            events.push(LogEvent::ListingDone(rel.to_string()));
        } else if let Some((before, frame)) = parse_exit_line(line) {
            if !before.trim().is_empty() {
                output.push(before);
            }
            output.flush(&mut events);
            events.push(LogEvent::Exit(frame));
        } else {
            output.push(line);
        }
    }

    output.flush(&mut events);
    events
}
