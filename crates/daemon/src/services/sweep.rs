//! Background stale sweep.
//!
//! Every 60 s, active conversations idle past the stale window flip to
//! `archived, timeout`. Sweep errors are logged and swallowed; the task
//! never takes the daemon down.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::services::conversations::ConversationService;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run one pass immediately (startup), then tick until shutdown.
pub fn spawn(conversations: ConversationService, shutdown: CancellationToken) {
    tokio::spawn(async move {
        run_once(&conversations);
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // first tick fires immediately; already swept
        loop {
            tokio::select! {
                _ = interval.tick() => run_once(&conversations),
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

fn run_once(conversations: &ConversationService) {
    if let Err(e) = conversations.sweep_stale() {
        tracing::warn!(error = %e, "stale sweep failed");
    }
}
