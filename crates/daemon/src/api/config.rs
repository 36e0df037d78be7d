//! `GET /api/config` and `PATCH /api/config`.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use cd_domain::config::ConfigPatch;
use cd_domain::Error;

use crate::api::api_error;
use crate::state::AppState;

/// Effective config with masked keys.
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.current().masked())
}

/// Partial update. Unknown keys and empty patches are 400s; the body is
/// decoded manually so the rejection carries the offending field.
pub async fn patch_config(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let patch: ConfigPatch = match serde_json::from_value(body) {
        Ok(patch) => patch,
        Err(e) => {
            return api_error(&Error::validation("config", e.to_string()));
        }
    };
    match state.config.apply(patch) {
        Ok(updated) => Json(updated.masked()).into_response(),
        Err(e) => api_error(&e),
    }
}
