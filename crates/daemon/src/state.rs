//! Shared application state passed to all handlers.

use std::time::Instant;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use cd_rag::RagPipeline;
use cd_store::Store;

use crate::hub::EventHub;
use crate::services::config::ConfigService;
use crate::services::conversations::ConversationService;

/// Everything a request handler can reach. Components are passed in
/// explicitly so tests can substitute any of them.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hub: EventHub,
    pub config: ConfigService,
    pub conversations: ConversationService,
    pub rag: RagPipeline,
    /// SHA-256 of the daemon token from the lock file; compared in
    /// constant time against whatever clients present.
    pub token_hash: Vec<u8>,
    /// Directory holding the browser UI bundle, if present.
    pub ui_dir: std::path::PathBuf,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Constant-time check of a presented token.
    pub fn token_matches(&self, presented: &str) -> bool {
        let presented_hash = Sha256::digest(presented.as_bytes());
        bool::from(presented_hash.ct_eq(self.token_hash.as_slice()))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Hash a token for storage in [`AppState::token_hash`].
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// In-memory state for unit tests: blank store, unreachable embed
/// service, fresh hub.
#[cfg(test)]
pub(crate) fn test_state(token: &str) -> AppState {
    use cd_rag::EmbedClient;

    let store = Store::open_in_memory().unwrap();
    let hub = EventHub::new();
    let config = ConfigService::load(store.clone(), hub.clone()).unwrap();
    let conversations = ConversationService::new(store.clone(), hub.clone());
    let rag = RagPipeline::new(store.clone(), EmbedClient::new("http://127.0.0.1:1/embed"));
    AppState {
        store,
        hub,
        config,
        conversations,
        rag,
        token_hash: hash_token(token),
        ui_dir: std::env::temp_dir().join("consultd-test-ui"),
        started_at: Instant::now(),
        shutdown: CancellationToken::new(),
    }
}
