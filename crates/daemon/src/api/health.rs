//! `GET /api/health`.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let embed = state.rag.embedder().health().await;
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.hub.client_count(),
        "uptime": state.uptime_secs(),
        "embedService": embed,
    }))
}
