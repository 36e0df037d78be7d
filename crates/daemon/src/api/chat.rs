//! Conversation endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use cd_domain::model::Conversation;
use cd_domain::{Error, Result};

use crate::api::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// `active`, `archived`, or absent for both.
    #[serde(default)]
    status: Option<String>,
}

fn with_messages(state: &AppState, conversations: Vec<Conversation>) -> Result<Vec<serde_json::Value>> {
    conversations
        .into_iter()
        .map(|conversation| {
            let messages = state.conversations.messages(&conversation.id)?;
            let mut value = serde_json::to_value(&conversation)?;
            value["messageCount"] = json!(messages.len());
            value["messages"] = serde_json::to_value(&messages)?;
            Ok(value)
        })
        .collect()
}

/// `GET /api/chat/history` — conversations with their messages, newest
/// first, optionally narrowed by status.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let run = || -> Result<serde_json::Value> {
        let mut out = json!({});
        match query.status.as_deref() {
            Some("active") => {
                out["active"] = json!(with_messages(&state, state.conversations.list_active()?)?);
            }
            Some("archived") => {
                out["archived"] =
                    json!(with_messages(&state, state.conversations.list_archived()?)?);
            }
            Some(other) => {
                return Err(Error::validation("status", format!("unknown status: {other}")));
            }
            None => {
                out["active"] = json!(with_messages(&state, state.conversations.list_active()?)?);
                out["archived"] =
                    json!(with_messages(&state, state.conversations.list_archived()?)?);
            }
        }
        Ok(out)
    };
    match run() {
        Ok(body) => Json(body).into_response(),
        Err(e) => api_error(&e),
    }
}

/// `DELETE /api/chat/:id` — hard delete, cascades, broadcasts.
pub async fn delete_one(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.conversations.delete(&id) {
        Ok(true) => Json(json!({ "success": true, "conversationId": id })).into_response(),
        Ok(false) => api_error(&Error::NotFound(format!("conversation {id}"))),
        Err(e) => api_error(&e),
    }
}

/// `DELETE /api/chat/archived/all` — purge every archived conversation.
pub async fn purge_archived(State(state): State<AppState>) -> Response {
    match state.conversations.delete_archived() {
        Ok(ids) => Json(json!({ "success": true, "deleted": ids.len() })).into_response(),
        Err(e) => api_error(&e),
    }
}
