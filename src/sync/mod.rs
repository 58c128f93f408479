// src/sync/mod.rs

//! Client side of the protocol.
//!
//! The client never talks to a watcher directly. It appends to a local copy
//! of the command queue and pushes it, then mirrors the output log and
//! status record back and decodes whatever was appended since last time.
//!
//! - [`manager`] wraps the mirror primitive (`rsync`/`ssh`) with timeouts
//!   and the busy indicator.
//! - [`decode`] turns an output-log delta into events.
//! - [`client`] keeps per-session offsets and polls single-flight.
//! - [`transfer`] is the client half of staged uploads and downloads.

pub mod client;
pub mod decode;
pub mod manager;
pub mod transfer;

pub use client::{ATTACH_TAIL_LINES, PollUpdate, WatcherClient};
pub use decode::{LogEvent, decode_log_delta};
pub use manager::{BusyGuard, BusyIndicator, Endpoint, RsyncTransport, SyncManager, Transport};
