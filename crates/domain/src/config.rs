//! Daemon configuration schema.
//!
//! The effective config is the compile-time defaults overlaid with any
//! stored overrides. Writes go through [`ConfigPatch`], which rejects
//! unknown keys and out-of-range values before anything is persisted.

use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "deepseek-reasoner";
pub const DEFAULT_MAX_MESSAGES: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 180_000;

pub const MAX_MESSAGES_RANGE: std::ops::RangeInclusive<u32> = 1..=50;
pub const REQUEST_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 30_000..=600_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Effective config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-provider settings. `api_key` is plaintext in memory; the store
/// layer keeps only ciphertext at rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// The closed set of configured providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub deepseek: ProviderSettings,
    #[serde(default)]
    pub openai: ProviderSettings,
}

/// The full effective daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    pub default_model: String,
    pub max_messages: u32,
    /// Provider HTTP deadline, in milliseconds.
    pub request_timeout: u64,
    #[serde(rename = "autoOpenWebUI")]
    pub auto_open_web_ui: bool,
    pub providers: ProvidersConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_owned(),
            max_messages: DEFAULT_MAX_MESSAGES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_MS,
            auto_open_web_ui: false,
            providers: ProvidersConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Hard cap on persisted messages per conversation.
    pub fn message_cap(&self) -> u32 {
        self.max_messages * 2
    }

    /// A copy with every api key replaced by its masked form, safe for
    /// REST responses and logs.
    pub fn masked(&self) -> Self {
        let mut out = self.clone();
        for settings in [&mut out.providers.deepseek, &mut out.providers.openai] {
            if let Some(key) = &settings.api_key {
                settings.api_key = Some(mask_key(key));
            }
        }
        out
    }

    /// A copy with every api key removed entirely. Event-bus broadcasts
    /// carry this form; they never include ciphertext or plaintext.
    pub fn without_keys(&self) -> Self {
        let mut out = self.clone();
        out.providers.deepseek.api_key = None;
        out.providers.openai.api_key = None;
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A partial config write. Unknown keys fail deserialization, which the
/// boundary surfaces as a 400.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigPatch {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub max_messages: Option<u32>,
    #[serde(default)]
    pub request_timeout: Option<u64>,
    #[serde(default, rename = "autoOpenWebUI")]
    pub auto_open_web_ui: Option<bool>,
    #[serde(default)]
    pub providers: Option<ProvidersConfig>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.default_model.is_none()
            && self.max_messages.is_none()
            && self.request_timeout.is_none()
            && self.auto_open_web_ui.is_none()
            && self.providers.is_none()
    }

    /// Validate ranges and enumerations without applying anything.
    pub fn validate(&self) -> Result<()> {
        if let Some(model) = &self.default_model {
            if catalog::lookup(model).is_none() {
                return Err(Error::validation(
                    "defaultModel",
                    format!("unknown model: {model}"),
                ));
            }
        }
        if let Some(n) = self.max_messages {
            if !MAX_MESSAGES_RANGE.contains(&n) {
                return Err(Error::validation(
                    "maxMessages",
                    format!("must be in [1, 50], got {n}"),
                ));
            }
        }
        if let Some(ms) = self.request_timeout {
            if !REQUEST_TIMEOUT_RANGE.contains(&ms) {
                return Err(Error::validation(
                    "requestTimeout",
                    format!("must be in [30000, 600000], got {ms}"),
                ));
            }
        }
        Ok(())
    }

    /// Apply this patch on top of `base`, returning the new config.
    pub fn apply(&self, base: &DaemonConfig) -> DaemonConfig {
        let mut out = base.clone();
        if let Some(model) = &self.default_model {
            out.default_model = model.clone();
        }
        if let Some(n) = self.max_messages {
            out.max_messages = n;
        }
        if let Some(ms) = self.request_timeout {
            out.request_timeout = ms;
        }
        if let Some(b) = self.auto_open_web_ui {
            out.auto_open_web_ui = b;
        }
        if let Some(p) = &self.providers {
            out.providers = p.clone();
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key masking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mask an api key for display: eight bullets plus the last 4 chars when
/// the key is longer than 4 chars, eight bullets alone otherwise.
pub fn mask_key(key: &str) -> String {
    const BULLETS: &str = "••••••••";
    if key.chars().count() > 4 {
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{BULLETS}{tail}")
    } else {
        BULLETS.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_config() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.default_model, "deepseek-reasoner");
        assert_eq!(cfg.max_messages, 5);
        assert_eq!(cfg.request_timeout, 180_000);
        assert!(!cfg.auto_open_web_ui);
        assert!(!cfg.providers.deepseek.enabled);
        assert!(cfg.providers.openai.api_key.is_none());
    }

    #[test]
    fn patch_rejects_unknown_keys() {
        let raw = r#"{"defaultModel": "deepseek-chat", "bogus": 1}"#;
        assert!(serde_json::from_str::<ConfigPatch>(raw).is_err());
    }

    #[test]
    fn patch_validates_ranges() {
        let patch = ConfigPatch {
            max_messages: Some(0),
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let patch = ConfigPatch {
            max_messages: Some(50),
            request_timeout: Some(30_000),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());

        let patch = ConfigPatch {
            request_timeout: Some(600_001),
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let patch = ConfigPatch {
            default_model: Some("claude-3".into()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let base = DaemonConfig::default();
        let patch = ConfigPatch {
            max_messages: Some(2),
            ..Default::default()
        };
        let next = patch.apply(&base);
        assert_eq!(next.max_messages, 2);
        assert_eq!(next.default_model, base.default_model);
        assert_eq!(next.message_cap(), 4);
    }

    #[test]
    fn mask_key_reveals_only_a_short_tail() {
        assert_eq!(mask_key("sk-abcdef1234"), "••••••••1234");
        assert_eq!(mask_key("abcd"), "••••••••");
        assert_eq!(mask_key(""), "••••••••");
        assert_eq!(mask_key("abcde"), "••••••••bcde");
    }

    #[test]
    fn masked_config_never_carries_plaintext() {
        let mut cfg = DaemonConfig::default();
        cfg.providers.deepseek.api_key = Some("sk-secret-value-9876".into());
        let masked = cfg.masked();
        let key = masked.providers.deepseek.api_key.unwrap();
        assert!(key.starts_with("••••••••"));
        assert!(key.ends_with("9876"));
        assert!(!key.contains("secret"));

        let bare = cfg.without_keys();
        assert!(bare.providers.deepseek.api_key.is_none());
    }

    #[test]
    fn wire_names_are_stable() {
        let v = serde_json::to_value(DaemonConfig::default()).unwrap();
        for key in ["defaultModel", "maxMessages", "requestTimeout", "autoOpenWebUI", "providers"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
    }
}
