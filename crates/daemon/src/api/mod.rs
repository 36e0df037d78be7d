pub mod auth;
pub mod chat;
pub mod config;
pub mod consult;
pub mod health;
pub mod ops;
pub mod providers;
pub mod rag;
pub mod statics;
pub mod ws;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use cd_domain::Error;

use crate::state::AppState;

/// Build the full router: REST under `/api`, the event transport at
/// `/ws`, and the SPA fallback for everything else.
pub fn router(state: AppState) -> Router<AppState> {
    let api = Router::new()
        .route("/api/health", get(health::health))
        // Config
        .route("/api/config", get(config::get_config))
        .route("/api/config", axum::routing::patch(config::patch_config))
        // Providers
        .route("/api/providers", get(providers::list))
        .route("/api/providers/:id", get(providers::get_one))
        .route("/api/providers/:id", put(providers::put_one))
        .route("/api/providers/:id", delete(providers::delete_one))
        .route("/api/providers/:id/test", post(providers::test_one))
        // Conversations
        .route("/api/chat/history", get(chat::history))
        .route("/api/chat/archived/all", delete(chat::purge_archived))
        .route("/api/chat/:id", delete(chat::delete_one))
        // One-shot consult
        .route("/api/consult", post(consult::one_shot))
        // RAG corpus
        .route("/api/rag/documents", get(rag::list_documents))
        .route("/api/rag/documents/:id", delete(rag::delete_document))
        .route("/api/rag/documents/:id/chunks", get(rag::document_chunks))
        .route("/api/rag/upload", post(rag::upload))
        .route("/api/rag/search", post(rag::search))
        .route("/api/rag/reindex", post(rag::reindex))
        .route("/api/rag/memory", get(rag::list_memories))
        .route("/api/rag/memory", post(rag::add_memory))
        .route("/api/rag/folders", get(rag::list_folders))
        .route("/api/rag/folders/:name", put(rag::rename_folder))
        .route("/api/rag/folders/:name", delete(rag::delete_folder))
        // Every /api route requires the daemon token.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_daemon_token,
        ));

    Router::new()
        .merge(api)
        // Event transport authenticates inside the handshake.
        .route("/ws", get(ws::upgrade))
        // Everything else is the browser UI with SPA fallback.
        .fallback(statics::serve_ui)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Standardized JSON error response: `{ "success": false, "error": .. }`.
/// Internal detail is logged here and redacted from the body.
pub(crate) fn api_error(e: &Error) -> Response {
    if e.http_status() >= 500 {
        tracing::error!(code = e.code(), error = %e, "request failed");
    }
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": e.public_message(),
            "code": e.code(),
        })),
    )
        .into_response()
}
