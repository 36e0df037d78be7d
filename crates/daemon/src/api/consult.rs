//! `POST /api/consult` — the one-shot REST consultation.
//!
//! Shares the orchestrator with the socket-driven consult op, so both
//! paths write the same store rows and emit the same events.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use cd_domain::Error;

use crate::api::api_error;
use crate::services::consult::{self, ConsultParams};
use crate::state::AppState;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OneShotRequest {
    pub message: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub use_rag: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Pick a model when only a provider was named: the configured default
/// if it belongs to that provider, else the provider's first model.
fn model_for_provider(state: &AppState, provider: &str) -> Result<String, Error> {
    let default_model = state.config.current().default_model;
    let prefix = match provider {
        "deepseek" => "deepseek-",
        "openai" => "gpt-",
        other => return Err(Error::NotFound(format!("provider {other}"))),
    };
    if default_model.starts_with(prefix) {
        return Ok(default_model);
    }
    cd_domain::catalog::CATALOG
        .iter()
        .find(|spec| spec.id.starts_with(prefix))
        .map(|spec| spec.id.to_owned())
        .ok_or_else(|| Error::NotFound(format!("no models for {provider}")))
}

pub async fn one_shot(
    State(state): State<AppState>,
    Json(request): Json<OneShotRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return api_error(&Error::validation("message", "must not be empty"));
    }

    let model = match (&request.model, &request.provider) {
        (Some(model), _) => Some(model.clone()),
        (None, Some(provider)) => match model_for_provider(&state, provider) {
            Ok(model) => Some(model),
            Err(e) => return api_error(&e),
        },
        (None, None) => None,
    };

    let params = ConsultParams {
        question: request.message,
        mode: None,
        context: None,
        doc_ids: None,
        doc_titles: None,
        folder: None,
        model,
        system_prompt: request.system_prompt,
        use_rag: request.use_rag,
    };

    match consult::consult(&state, params).await {
        Ok(reply) => Json(json!({
            "response": reply.answer,
            "model": reply.model,
            "conversationId": reply.conversation_id,
            "usage": reply.metadata.tokens_used,
            "ragContext": reply.rag_context,
        }))
        .into_response(),
        Err(e) => api_error(&e),
    }
}
