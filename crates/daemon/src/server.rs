//! Daemon boot and shutdown.
//!
//! Boot order: election (lock + port), store open + migrations, legacy
//! JSON import, services, startup sweep, boundary bind on loopback.
//! Shutdown (signal, idle timer, or fatal) drains in-flight requests,
//! closes the store, and deletes the lock file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use cd_rag::{EmbedClient, RagPipeline};
use cd_store::Store;

use crate::api;
use crate::hub::EventHub;
use crate::lifecycle::{self, Election};
use crate::services::config::ConfigService;
use crate::services::conversations::ConversationService;
use crate::services::{legacy, sweep};
use crate::state::{hash_token, AppState};

/// The daemon exits after this long with zero connected clients.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Run the daemon to completion. Returns cleanly when another live
/// instance already owns the lock.
pub async fn run(dir: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating data dir {}", dir.display()))?;

    let (port, token) = match lifecycle::elect(&dir)? {
        Election::AlreadyRunning { port } => {
            println!("daemon already running on port {port}");
            return Ok(());
        }
        Election::Won { port, token } => (port, token),
    };

    let result = serve(&dir, port, token).await;

    // Clean exit always removes the lock; unclean exits leave it for the
    // next start's liveness check to reclaim.
    lifecycle::remove_lock(&lifecycle::lock_path(&dir));
    result
}

async fn serve(dir: &Path, port: u16, token: String) -> anyhow::Result<()> {
    let store = Store::open(&lifecycle::db_path(dir)).context("opening store")?;

    if let Err(e) = legacy::migrate(dir, &store) {
        tracing::warn!(error = %e, "legacy migration failed, continuing");
    }

    let hub = EventHub::new();
    let config = ConfigService::load(store.clone(), hub.clone()).context("loading config")?;
    let conversations = ConversationService::new(store.clone(), hub.clone());
    let rag = RagPipeline::new(store.clone(), EmbedClient::from_env());
    let shutdown = CancellationToken::new();

    let state = AppState {
        store: store.clone(),
        hub: hub.clone(),
        config,
        conversations: conversations.clone(),
        rag,
        token_hash: hash_token(&token),
        ui_dir: dir.join("webui"),
        started_at: Instant::now(),
        shutdown: shutdown.clone(),
    };

    // Background tasks: stale sweep (plus its startup pass), idle timer,
    // signal handling.
    sweep::spawn(conversations, shutdown.clone());
    spawn_idle_timer(hub.clone(), shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    // An uncaught panic anywhere still takes the clean shutdown path.
    {
        let shutdown = shutdown.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(panic = %info, "uncaught panic, stopping");
            shutdown.cancel();
            previous(info);
        }));
    }

    let app = api::router(state.clone())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            MAX_CONCURRENT_REQUESTS,
        ))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding 127.0.0.1:{port}"))?;
    tracing::info!(port, "consultd listening on loopback");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("serving")?;

    tracing::info!("shutting down");
    store.close();
    Ok(())
}

/// Fire shutdown once the client table has been empty for the idle
/// window. Connected clients rearm the timer just by existing.
fn spawn_idle_timer(hub: EventHub, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(IDLE_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(idle) = hub.idle_for() {
                        if idle >= IDLE_TIMEOUT {
                            tracing::info!(idle_secs = idle.as_secs(), "idle timeout, stopping");
                            shutdown.cancel();
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(term) => term,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT received"),
                _ = term.recv() => tracing::info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("interrupt received");
        }
        shutdown.cancel();
    });
}
