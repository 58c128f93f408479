// src/config/mod.rs

//! Configuration for cmdwatch.
//!
//! Three sources, three formats:
//! - watcher settings come from the environment (`settings.rs`),
//! - the per-session runtime configuration is JSON written by the client
//!   (`model.rs`, re-read before every dispatch),
//! - the client's own config is a TOML file (`model.rs` + `validate.rs`).

pub mod loader;
pub mod model;
pub mod settings;
pub mod validate;

pub use loader::{load_client_config, load_runtime_config};
pub use model::{
    ClientConfig, EffectiveRuntime, LocalSection, RawClientConfig, RemoteSection, RuntimeConfig,
    StructureSection, TimingSection,
};
pub use settings::WatcherSettings;
