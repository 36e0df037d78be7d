//! Provider endpoints: list, inspect, update, remove key, connectivity
//! test.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use cd_domain::catalog::{self, ProviderKind};
use cd_domain::config::{mask_key, DaemonConfig, ProviderSettings};
use cd_domain::{Error, Result};
use cd_providers::ProviderMessage;

use crate::api::api_error;
use crate::state::AppState;

fn kind_for(id: &str) -> Result<ProviderKind> {
    match id {
        "deepseek" => Ok(ProviderKind::Deepseek),
        "openai" => Ok(ProviderKind::Openai),
        other => Err(Error::NotFound(format!("provider {other}"))),
    }
}

fn settings_of<'c>(cfg: &'c DaemonConfig, kind: ProviderKind) -> &'c ProviderSettings {
    match kind {
        ProviderKind::Deepseek => &cfg.providers.deepseek,
        ProviderKind::Openai => &cfg.providers.openai,
    }
}

fn provider_view(cfg: &DaemonConfig, kind: ProviderKind) -> serde_json::Value {
    let settings = settings_of(cfg, kind);
    let models: Vec<&str> = catalog::CATALOG
        .iter()
        .filter(|spec| spec.provider == kind)
        .map(|spec| spec.id)
        .collect();
    json!({
        "id": kind.as_str(),
        "enabled": settings.enabled,
        "apiKey": settings.api_key.as_deref().map(mask_key),
        "baseUrl": settings.base_url.clone()
            .unwrap_or_else(|| kind.default_base_url().to_owned()),
        "models": models,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = state.config.current();
    Json(json!({
        "providers": [
            provider_view(&cfg, ProviderKind::Deepseek),
            provider_view(&cfg, ProviderKind::Openai),
        ]
    }))
}

pub async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match kind_for(&id) {
        Ok(kind) => Json(provider_view(&state.config.current(), kind)).into_response(),
        Err(e) => api_error(&e),
    }
}

/// Partial provider update; absent fields keep their stored values.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderUpdate {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
}

pub async fn put_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProviderUpdate>,
) -> Response {
    let kind = match kind_for(&id) {
        Ok(kind) => kind,
        Err(e) => return api_error(&e),
    };
    let cfg = state.config.current();
    let current = settings_of(&cfg, kind);
    let next = ProviderSettings {
        enabled: update.enabled.unwrap_or(current.enabled),
        api_key: update.api_key.or_else(|| current.api_key.clone()),
        base_url: update.base_url.or_else(|| current.base_url.clone()),
    };
    match state.config.update_provider(&id, next) {
        Ok(updated) => Json(provider_view(&updated, kind)).into_response(),
        Err(e) => api_error(&e),
    }
}

/// Remove the stored key and disable the provider.
pub async fn delete_one(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = kind_for(&id) {
        return api_error(&e);
    }
    match state.config.update_provider(&id, ProviderSettings::default()) {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(e) => api_error(&e),
    }
}

/// One-shot connectivity probe: a minimal completion against the
/// provider's first catalogue model. Persists nothing.
pub async fn test_one(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let kind = match kind_for(&id) {
        Ok(kind) => kind,
        Err(e) => return api_error(&e),
    };
    let model = match catalog::CATALOG.iter().find(|spec| spec.provider == kind) {
        Some(spec) => spec.id,
        None => return api_error(&Error::NotFound(format!("no models for {id}"))),
    };

    let registry = state.config.providers();
    let (client, spec) = match registry.resolve(model) {
        Ok(pair) => pair,
        Err(e) => return api_error(&e),
    };

    let probe = [ProviderMessage::new(
        cd_domain::model::Role::User,
        "Reply with the single word: ok",
    )];
    match client.complete(spec, &probe, None).await {
        Ok(completion) => Json(json!({
            "ok": true,
            "model": model,
            "latencyMs": completion.response_time_ms,
        }))
        .into_response(),
        Err(e) => Json(json!({
            "ok": false,
            "model": model,
            "error": e.public_message(),
        }))
        .into_response(),
    }
}
