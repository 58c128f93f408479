// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sync;
pub mod transfer;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{CliArgs, CtlArgs, CtlCommand};
use crate::config::{WatcherSettings, load_client_config};
use crate::engine::Watcher;
use crate::exec::{ContainerRuntime, DockerCli, RealExecutorBackend, WorkerContext};
use crate::session::{OutputLog, SessionPaths};
use crate::sync::{LogEvent, RsyncTransport, WatcherClient};
use crate::types::SessionKey;

/// Wire a watcher with the production executor around `settings`.
///
/// `containers` is injectable so tests can run the full loop against a fake.
pub fn build_watcher(
    settings: WatcherSettings,
    containers: Arc<dyn ContainerRuntime>,
) -> Result<Watcher<RealExecutorBackend>> {
    let paths = SessionPaths::new(&settings.session_dir);
    let log = Arc::new(OutputLog::new(
        paths.output_log(),
        settings.keep_ansi,
        settings.max_output_chars,
    )?);
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

    let worker = Arc::new(WorkerContext {
        paths,
        log: Arc::clone(&log),
        containers: Arc::clone(&containers),
        static_runtime: settings.static_runtime.clone(),
        refresh_tx,
    });
    let executor = RealExecutorBackend::new(worker);

    let watcher = Watcher::new(settings, log, containers, executor, refresh_rx)?;
    Ok(watcher)
}

/// High-level entry point of the `cmdwatch` watcher daemon.
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = WatcherSettings::from_env(&args.name).context("invalid watcher settings")?;
    info!(
        session = ?settings.session_dir,
        registry = ?settings.registry_dir,
        "loaded watcher settings"
    );

    let containers: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(&settings.docker_bin));
    let watcher = build_watcher(settings, containers).context("cannot open session directory")?;

    watcher.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Entry point of `cmdwatch-ctl`.
pub async fn run_ctl(args: CtlArgs) -> Result<()> {
    let config = load_client_config(&args.config)
        .with_context(|| format!("loading client config {:?}", args.config))?;
    let transport = RsyncTransport::new(&config.remote.server);
    let poll_every = config.log_fetch_interval();
    let client = Arc::new(WatcherClient::new(config, transport));

    match args.command {
        CtlCommand::Watchers => {
            let watchers = client.list_watchers().await?;
            if watchers.is_empty() {
                println!("no live watchers");
            }
            for w in watchers {
                println!("{}\t{}", w.watcher_id, w.display_name);
            }
        }

        CtlCommand::Send {
            watcher,
            session,
            lines,
        } => {
            let key = SessionKey::new(watcher, session);
            client.send_command(&key, &lines).await?;
        }

        CtlCommand::Tail {
            watcher,
            session,
            follow,
        } => {
            let key = SessionKey::new(watcher, session);
            let update = client.attach(&key).await?;
            print_events(&update.events);

            if follow {
                let (mut rx, handle) = client.spawn_polling(key, poll_every);
                loop {
                    tokio::select! {
                        update = rx.recv() => match update {
                            Some(update) => {
                                if update.truncated {
                                    println!("--- log cleared ---");
                                }
                                print_events(&update.events);
                            }
                            None => break,
                        },
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
                handle.abort();
            }
        }

        CtlCommand::Download {
            watcher,
            session,
            remote_path,
            local_path,
        } => {
            let key = SessionKey::new(watcher, session);
            client.attach(&key).await?;
            sync::transfer::download_file(
                &*client,
                &key,
                &remote_path,
                &local_path,
                poll_every,
                Duration::from_secs(120),
            )
            .await?;
            println!("downloaded {remote_path} -> {}", local_path.display());
        }

        CtlCommand::Upload {
            watcher,
            session,
            local_path,
            remote_path,
        } => {
            let key = SessionKey::new(watcher, session);
            let token = sync::transfer::upload_file(&*client, &key, &local_path, &remote_path).await?;
            println!("staged {} as {token} -> {remote_path}", local_path.display());
        }

        CtlCommand::Sync {
            watcher,
            session,
            delete,
        } => {
            let key = SessionKey::new(watcher, session);
            let local = client.mirror_session(&key, delete).await?;
            println!("mirrored {key} -> {}", local.display());
        }
    }

    Ok(())
}

fn print_events(events: &[LogEvent]) {
    for event in events {
        match event {
            LogEvent::Output(text) => println!("{text}"),
            LogEvent::ListingDone(rel) => println!("[listing ready: {rel}]"),
            LogEvent::Exit(frame) if frame.internal => {
                if frame.code != 0 {
                    println!("[internal command failed: {}]", frame.code);
                }
            }
            LogEvent::Exit(frame) => println!("[exit {}]", frame.code),
        }
    }
}
