//! The fixed model catalogue.
//!
//! "Provider" is a closed sum with two branches, dispatched by model
//! prefix. Adding a model is a change-controlled edit to [`CATALOG`].

use serde::Serialize;

/// Which upstream API a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Deepseek,
    Openai,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deepseek => "deepseek",
            Self::Openai => "openai",
        }
    }

    /// The default chat-completions base URL for this provider.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Deepseek => "https://api.deepseek.com",
            Self::Openai => "https://api.openai.com/v1",
        }
    }
}

/// Request-shaping flags for one catalogue entry.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub id: &'static str,
    pub api_model: &'static str,
    pub provider: ProviderKind,
    pub max_output_tokens: u32,
    pub is_reasoning: bool,
    pub supports_system_prompt: bool,
    /// `reasoning_effort` value sent for OpenAI reasoning models.
    pub reasoning_effort: Option<&'static str>,
    /// Use `max_completion_tokens` instead of `max_tokens` in the body.
    pub uses_completion_token_cap: bool,
}

pub const CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: "deepseek-chat",
        api_model: "deepseek-chat",
        provider: ProviderKind::Deepseek,
        max_output_tokens: 8_192,
        is_reasoning: false,
        supports_system_prompt: true,
        reasoning_effort: None,
        uses_completion_token_cap: false,
    },
    ModelSpec {
        id: "deepseek-reasoner",
        api_model: "deepseek-reasoner",
        provider: ProviderKind::Deepseek,
        max_output_tokens: 64_000,
        is_reasoning: true,
        supports_system_prompt: false,
        reasoning_effort: None,
        uses_completion_token_cap: true,
    },
    ModelSpec {
        id: "gpt-5.2",
        api_model: "gpt-5.2",
        provider: ProviderKind::Openai,
        max_output_tokens: 400_000,
        is_reasoning: true,
        supports_system_prompt: true,
        reasoning_effort: Some("medium"),
        uses_completion_token_cap: false,
    },
    ModelSpec {
        id: "gpt-5.2-pro",
        api_model: "gpt-5.2-pro",
        provider: ProviderKind::Openai,
        max_output_tokens: 400_000,
        is_reasoning: true,
        supports_system_prompt: true,
        reasoning_effort: Some("high"),
        uses_completion_token_cap: false,
    },
];

/// Look up a model by its public id.
pub fn lookup(model: &str) -> Option<&'static ModelSpec> {
    CATALOG.iter().find(|spec| spec.id == model)
}

/// Dispatch by model prefix: `deepseek-*` vs `gpt-*`.
pub fn provider_for(model: &str) -> Option<ProviderKind> {
    if model.starts_with("deepseek-") {
        Some(ProviderKind::Deepseek)
    } else if model.starts_with("gpt-") {
        Some(ProviderKind::Openai)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_is_reachable_by_prefix_dispatch() {
        for spec in CATALOG {
            assert_eq!(provider_for(spec.id), Some(spec.provider), "{}", spec.id);
            assert!(lookup(spec.id).is_some());
        }
        assert!(provider_for("claude-3").is_none());
        assert!(lookup("deepseek-v9").is_none());
    }

    #[test]
    fn reasoner_flags_match_the_table() {
        let reasoner = lookup("deepseek-reasoner").unwrap();
        assert!(reasoner.is_reasoning);
        assert!(!reasoner.supports_system_prompt);
        assert!(reasoner.uses_completion_token_cap);
        assert_eq!(reasoner.max_output_tokens, 64_000);

        let chat = lookup("deepseek-chat").unwrap();
        assert!(!chat.is_reasoning);
        assert!(chat.supports_system_prompt);
        assert_eq!(chat.max_output_tokens, 8_192);

        assert_eq!(lookup("gpt-5.2").unwrap().reasoning_effort, Some("medium"));
        assert_eq!(lookup("gpt-5.2-pro").unwrap().reasoning_effort, Some("high"));
    }
}
