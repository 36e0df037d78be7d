//! Named request/response operations on the event transport.
//!
//! Each op maps to the same service calls the REST surface uses, so a
//! socket client and a REST client observe identical state and events.

use serde_json::{json, Value};

use cd_domain::config::ConfigPatch;
use cd_domain::{Error, Result};

use crate::services::consult::{self, ConsultParams, ContinueParams};
use crate::state::AppState;

pub async fn dispatch(state: &AppState, op: &str, params: Value) -> Result<Value> {
    match op {
        "config:get" => Ok(serde_json::to_value(state.config.current().masked())?),
        "config:update" => {
            let patch: ConfigPatch = serde_json::from_value(params)
                .map_err(|e| Error::validation("config", e.to_string()))?;
            let updated = state.config.apply(patch)?;
            Ok(serde_json::to_value(updated.masked())?)
        }

        "conversation:list" => {
            let active = state.conversations.list_active()?;
            let archived = state.conversations.list_archived()?;
            Ok(json!({ "active": active, "archived": archived }))
        }
        "conversation:get" => {
            let id = required_str(&params, "conversationId")?;
            let conversation = state.conversations.get(&id)?;
            let messages = state.conversations.messages(&id)?;
            Ok(json!({ "conversation": conversation, "messages": messages }))
        }
        "conversation:delete" => {
            let id = required_str(&params, "conversationId")?;
            if !state.conversations.delete(&id)? {
                return Err(Error::NotFound(format!("conversation {id}")));
            }
            Ok(json!({ "conversationId": id }))
        }

        "consult" => {
            let request: ConsultParams = serde_json::from_value(params)
                .map_err(|e| Error::validation("consult", e.to_string()))?;
            Ok(serde_json::to_value(consult::consult(state, request).await?)?)
        }
        "consult:continue" => {
            let request: ContinueParams = serde_json::from_value(params)
                .map_err(|e| Error::validation("continue", e.to_string()))?;
            Ok(serde_json::to_value(
                consult::continue_conversation(state, request).await?,
            )?)
        }
        "consult:end" => {
            let id = required_str(&params, "conversationId")?;
            let outcome = consult::end(state, &id)?;
            if !outcome.ended {
                let reason = outcome
                    .end_reason
                    .map(|r| r.as_str())
                    .unwrap_or("unknown");
                return Err(Error::validation(
                    "conversationId",
                    format!("conversation already archived ({reason})"),
                ));
            }
            Ok(json!({
                "status": "ended",
                "conversationId": outcome.conversation_id,
                "totalMessages": outcome.total_messages,
            }))
        }

        "rag:search" => {
            let query = required_str(&params, "query")?;
            let filters = serde_json::from_value(params.clone())
                .map_err(|e| Error::validation("filters", e.to_string()))?;
            let retrieval = state.rag.retrieve(&query, &filters).await?;
            Ok(json!({
                "context": retrieval.context,
                "hits": retrieval.hits,
            }))
        }

        "clients:count" => Ok(json!(state.hub.client_count())),

        other => Err(Error::validation("op", format!("unknown operation: {other}"))),
    }
}

fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| Error::validation(key, "required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    #[tokio::test]
    async fn unknown_op_is_a_validation_error() {
        let state = test_state("t");
        let err = dispatch(&state, "bogus:op", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn config_round_trip_over_ops() {
        let state = test_state("t");
        let updated = dispatch(&state, "config:update", json!({ "maxMessages": 9 }))
            .await
            .unwrap();
        assert_eq!(updated["maxMessages"], 9);

        let read = dispatch(&state, "config:get", json!({})).await.unwrap();
        assert_eq!(read["maxMessages"], 9);
    }

    #[tokio::test]
    async fn conversation_ops_cover_crud() {
        let state = test_state("t");
        let conversation = state.conversations.create("deepseek-chat", None).unwrap();

        let listing = dispatch(&state, "conversation:list", json!({})).await.unwrap();
        assert_eq!(listing["active"].as_array().unwrap().len(), 1);

        let fetched = dispatch(
            &state,
            "conversation:get",
            json!({ "conversationId": conversation.id }),
        )
        .await
        .unwrap();
        assert_eq!(fetched["conversation"]["id"], conversation.id.as_str());

        dispatch(
            &state,
            "conversation:delete",
            json!({ "conversationId": conversation.id }),
        )
        .await
        .unwrap();
        let err = dispatch(
            &state,
            "conversation:get",
            json!({ "conversationId": conversation.id }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn end_op_reports_already_archived() {
        let state = test_state("t");
        let conversation = state.conversations.create("deepseek-chat", None).unwrap();

        let ended = dispatch(
            &state,
            "consult:end",
            json!({ "conversationId": conversation.id }),
        )
        .await
        .unwrap();
        assert_eq!(ended["status"], "ended");

        let err = dispatch(
            &state,
            "consult:end",
            json!({ "conversationId": conversation.id }),
        )
        .await
        .unwrap_err();
        // The ack must name the stored reason, not just refuse.
        assert!(err.to_string().contains("already archived (completed)"));
    }

    #[tokio::test]
    async fn missing_required_param_is_validation() {
        let state = test_state("t");
        let err = dispatch(&state, "conversation:get", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
