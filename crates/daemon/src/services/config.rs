//! Config service: single-writer, read-any.
//!
//! Reads compose the defaults with stored overrides; writes validate,
//! encrypt credentials, persist atomically, rebuild the provider
//! registry, and broadcast `config:updated`.

use std::sync::Arc;

use parking_lot::RwLock;

use cd_domain::config::{ConfigPatch, DaemonConfig, ProviderSettings, ProvidersConfig};
use cd_domain::event::Event;
use cd_domain::{Error, Result};
use cd_providers::ProviderRegistry;
use cd_store::Store;

use crate::hub::EventHub;
use crate::services::crypto;

const KEY_DEFAULT_MODEL: &str = "defaultModel";
const KEY_MAX_MESSAGES: &str = "maxMessages";
const KEY_REQUEST_TIMEOUT: &str = "requestTimeout";
const KEY_AUTO_OPEN: &str = "autoOpenWebUI";
const KEY_PROVIDERS: &str = "providers";

#[derive(Clone)]
pub struct ConfigService {
    store: Store,
    hub: EventHub,
    cached: Arc<RwLock<DaemonConfig>>,
    registry: Arc<RwLock<Arc<ProviderRegistry>>>,
}

impl ConfigService {
    /// Load the effective config from the store and build the initial
    /// provider registry.
    pub fn load(store: Store, hub: EventHub) -> Result<Self> {
        let config = compose(&store)?;
        let registry = Arc::new(ProviderRegistry::from_config(&config));
        Ok(Self {
            store,
            hub,
            cached: Arc::new(RwLock::new(config)),
            registry: Arc::new(RwLock::new(registry)),
        })
    }

    /// The current effective config, keys in plaintext.
    pub fn current(&self) -> DaemonConfig {
        self.cached.read().clone()
    }

    /// The current provider registry.
    pub fn providers(&self) -> Arc<ProviderRegistry> {
        self.registry.read().clone()
    }

    /// Validate and apply a patch: persist, refresh the cache, rebuild
    /// providers, broadcast. Empty patches are a validation error.
    pub fn apply(&self, patch: ConfigPatch) -> Result<DaemonConfig> {
        if patch.is_empty() {
            return Err(Error::validation("config", "empty patch"));
        }
        patch.validate()?;

        let base = self.current();
        let mut next = patch.apply(&base);

        // A masked key in the patch means "keep what is stored".
        carry_masked_keys(&mut next.providers, &base.providers);

        persist(&self.store, &next)?;
        *self.cached.write() = next.clone();
        *self.registry.write() = Arc::new(ProviderRegistry::from_config(&next));
        self.hub.emit(Event::ConfigUpdated(next.clone()));
        tracing::info!(default_model = %next.default_model, "config updated");
        Ok(next)
    }

    /// Update a single provider in place (the `PUT /providers/:id` path).
    pub fn update_provider(&self, id: &str, settings: ProviderSettings) -> Result<DaemonConfig> {
        let mut providers = self.current().providers;
        match id {
            "deepseek" => providers.deepseek = settings,
            "openai" => providers.openai = settings,
            other => return Err(Error::NotFound(format!("provider {other}"))),
        }
        self.apply(ConfigPatch {
            providers: Some(providers),
            ..Default::default()
        })
    }
}

/// Keep the stored key when a patch echoes back the masked form.
fn carry_masked_keys(next: &mut ProvidersConfig, base: &ProvidersConfig) {
    for (next_settings, base_settings) in [
        (&mut next.deepseek, &base.deepseek),
        (&mut next.openai, &base.openai),
    ] {
        if let Some(key) = &next_settings.api_key {
            if key.starts_with("••••••••") {
                next_settings.api_key = base_settings.api_key.clone();
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Defaults overlaid with stored rows. A stored key that fails to
/// decrypt is dropped with a warning; reads never return ciphertext.
pub fn compose(store: &Store) -> Result<DaemonConfig> {
    let mut cfg = DaemonConfig::default();

    if let Some(raw) = store.config_get(KEY_DEFAULT_MODEL)? {
        if let Ok(value) = serde_json::from_str::<String>(&raw) {
            cfg.default_model = value;
        }
    }
    if let Some(raw) = store.config_get(KEY_MAX_MESSAGES)? {
        if let Ok(value) = serde_json::from_str::<u32>(&raw) {
            cfg.max_messages = value;
        }
    }
    if let Some(raw) = store.config_get(KEY_REQUEST_TIMEOUT)? {
        if let Ok(value) = serde_json::from_str::<u64>(&raw) {
            cfg.request_timeout = value;
        }
    }
    if let Some(raw) = store.config_get(KEY_AUTO_OPEN)? {
        if let Ok(value) = serde_json::from_str::<bool>(&raw) {
            cfg.auto_open_web_ui = value;
        }
    }
    if let Some(raw) = store.config_get(KEY_PROVIDERS)? {
        if let Ok(mut providers) = serde_json::from_str::<ProvidersConfig>(&raw) {
            for settings in [&mut providers.deepseek, &mut providers.openai] {
                if let Some(sealed) = settings.api_key.take() {
                    match crypto::decrypt_key(&sealed) {
                        Ok(plain) => settings.api_key = Some(plain),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping undecryptable provider key");
                        }
                    }
                }
            }
            cfg.providers = providers;
        }
    }
    Ok(cfg)
}

/// Write every config row in one transaction, keys encrypted.
fn persist(store: &Store, cfg: &DaemonConfig) -> Result<()> {
    let mut sealed = cfg.providers.clone();
    for settings in [&mut sealed.deepseek, &mut sealed.openai] {
        if let Some(plain) = settings.api_key.take() {
            settings.api_key = Some(crypto::encrypt_key(&plain)?);
        }
    }

    let entries = vec![
        (
            KEY_DEFAULT_MODEL.to_owned(),
            serde_json::to_string(&cfg.default_model)?,
        ),
        (
            KEY_MAX_MESSAGES.to_owned(),
            serde_json::to_string(&cfg.max_messages)?,
        ),
        (
            KEY_REQUEST_TIMEOUT.to_owned(),
            serde_json::to_string(&cfg.request_timeout)?,
        ),
        (
            KEY_AUTO_OPEN.to_owned(),
            serde_json::to_string(&cfg.auto_open_web_ui)?,
        ),
        (KEY_PROVIDERS.to_owned(), serde_json::to_string(&sealed)?),
    ];
    store.config_set_many(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ConfigService {
        ConfigService::load(Store::open_in_memory().unwrap(), EventHub::new()).unwrap()
    }

    #[test]
    fn defaults_compose_from_an_empty_store() {
        let svc = service();
        assert_eq!(svc.current(), DaemonConfig::default());
    }

    #[test]
    fn apply_persists_and_rereads_decrypted() {
        let svc = service();
        let patch: ConfigPatch = serde_json::from_value(serde_json::json!({
            "defaultModel": "deepseek-chat",
            "maxMessages": 2,
            "providers": {
                "deepseek": { "enabled": true, "apiKey": "sk-live-1234" },
                "openai": {}
            }
        }))
        .unwrap();
        svc.apply(patch).unwrap();

        // The cached view has the plaintext key.
        let cfg = svc.current();
        assert_eq!(cfg.default_model, "deepseek-chat");
        assert_eq!(cfg.max_messages, 2);
        assert_eq!(cfg.providers.deepseek.api_key.as_deref(), Some("sk-live-1234"));

        // The stored row has ciphertext, not plaintext.
        let stored = svc.store.config_get("providers").unwrap().unwrap();
        assert!(!stored.contains("sk-live-1234"));

        // A fresh compose decrypts to the exact supplied bytes.
        let reread = compose(&svc.store).unwrap();
        assert_eq!(reread.providers.deepseek.api_key.as_deref(), Some("sk-live-1234"));

        // Provider registry now resolves the deepseek models.
        assert!(svc.providers().resolve("deepseek-chat").is_ok());
    }

    #[test]
    fn empty_patch_is_rejected() {
        let svc = service();
        let err = svc.apply(ConfigPatch::default()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn masked_key_keeps_the_stored_secret() {
        let svc = service();
        svc.apply(ConfigPatch {
            providers: Some(ProvidersConfig {
                deepseek: ProviderSettings {
                    enabled: true,
                    api_key: Some("sk-original".into()),
                    base_url: None,
                },
                openai: ProviderSettings::default(),
            }),
            ..Default::default()
        })
        .unwrap();

        // Echo back the masked form, as the web UI does on save.
        svc.apply(ConfigPatch {
            providers: Some(ProvidersConfig {
                deepseek: ProviderSettings {
                    enabled: true,
                    api_key: Some("••••••••inal".into()),
                    base_url: None,
                },
                openai: ProviderSettings::default(),
            }),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            svc.current().providers.deepseek.api_key.as_deref(),
            Some("sk-original")
        );
    }

    #[tokio::test]
    async fn apply_broadcasts_a_stripped_snapshot() {
        let svc = service();
        let mut rx = svc.hub.subscribe();
        svc.apply(ConfigPatch {
            max_messages: Some(3),
            ..Default::default()
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "config:updated");
        assert_eq!(event.payload()["maxMessages"], 3);
    }

    #[test]
    fn unknown_provider_id_is_not_found() {
        let svc = service();
        let err = svc
            .update_provider("anthropic", ProviderSettings::default())
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
