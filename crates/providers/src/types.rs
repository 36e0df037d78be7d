//! Provider-agnostic request and response types.

use serde::{Deserialize, Serialize};

use cd_domain::model::Role;

/// One turn as sent to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The result of one completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
    /// Auxiliary reasoning text some models return alongside the answer.
    pub reasoning_content: Option<String>,
    /// Wall time of the whole call, retries included.
    pub response_time_ms: u64,
}
