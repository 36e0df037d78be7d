//! The consult / continue / end state machine.
//!
//! Both entry points (the REST one-shot and the socket-driven ops) call
//! into here, so they write the same store rows and emit the same
//! events.

use serde::{Deserialize, Serialize};

use cd_domain::model::{ConversationStatus, EndReason, Role};
use cd_domain::{Error, Result};
use cd_providers::ProviderMessage;
use cd_rag::RetrieveFilters;

use crate::services::prompts::Mode;
use crate::state::AppState;

/// Longest thinking summary surfaced to clients, in chars.
const THINKING_LIMIT: usize = 500;
const TRUNCATION_MARKER: char = '…';

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests / replies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultParams {
    pub question: String,
    #[serde(default)]
    pub mode: Option<String>,
    /// Caller-supplied context rendered into the user turn.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    #[serde(default)]
    pub doc_titles: Option<Vec<String>>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the mode prompt entirely (REST one-shot path).
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_true")]
    pub use_rag: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueParams {
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    #[serde(default)]
    pub doc_titles: Option<Vec<String>>,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingSummary {
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultMetadata {
    pub response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultReply {
    pub conversation_id: String,
    pub answer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    pub message_count: usize,
    pub can_continue: bool,
    pub metadata: ConsultMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndOutcome {
    pub ended: bool,
    pub conversation_id: String,
    pub total_messages: usize,
    /// Why the conversation is archived: `completed` when this call did
    /// the archiving, the stored reason when it already was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// consult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn consult(state: &AppState, params: ConsultParams) -> Result<ConsultReply> {
    let cfg = state.config.current();
    let cap = cfg.message_cap();
    let model = params.model.clone().unwrap_or(cfg.default_model);

    let registry = state.config.providers();
    let (client, spec) = registry.resolve(&model)?;

    let mode = Mode::parse(params.mode.as_deref());
    let base_prompt = params
        .system_prompt
        .clone()
        .unwrap_or_else(|| mode.system_prompt().to_owned());

    let rag_context = if params.use_rag {
        retrieve_context(
            state,
            &params.question,
            params.doc_ids.clone(),
            params.doc_titles.clone(),
            params.folder.clone(),
        )
        .await
    } else {
        None
    };

    let system_prompt = match &rag_context {
        Some(ctx) => format!("{base_prompt}\n\n{ctx}"),
        None => base_prompt,
    };

    let conversation = state.conversations.create(&model, Some(&system_prompt))?;

    let user_turn = match &params.context {
        Some(ctx) => format!("Context:\n{ctx}\n\nQuestion:\n{}", params.question),
        None => params.question.clone(),
    };
    state
        .conversations
        .add_message(&conversation.id, Role::User, &user_turn, cap)?;

    let completion = {
        let wire = provider_messages(state, &conversation.id)?;
        client.complete(spec, &wire, Some(&system_prompt)).await?
    };

    state
        .conversations
        .add_message(&conversation.id, Role::Assistant, &completion.content, cap)?;

    let count = state.store.message_count(&conversation.id)? as usize;
    Ok(ConsultReply {
        conversation_id: conversation.id,
        answer: completion.content,
        model,
        mode: Some(mode.as_str()),
        message_count: count,
        can_continue: count < cap as usize,
        metadata: ConsultMetadata {
            response_time: completion.response_time_ms,
            tokens_used: completion.usage.map(|u| u.total_tokens),
            thinking: completion
                .reasoning_content
                .as_deref()
                .map(|r| ThinkingSummary {
                    summary: summarize_thinking(r),
                }),
        },
        rag_context,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// continue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn continue_conversation(
    state: &AppState,
    params: ContinueParams,
) -> Result<ConsultReply> {
    let cfg = state.config.current();
    let cap = cfg.message_cap();

    let conversation = state.conversations.get(&params.conversation_id)?;
    if conversation.status == ConversationStatus::Archived {
        return Err(Error::validation(
            "conversationId",
            "conversation is archived",
        ));
    }

    let registry = state.config.providers();
    let (client, spec) = registry.resolve(&conversation.model)?;

    match state
        .conversations
        .add_message(&conversation.id, Role::User, &params.message, cap)
    {
        Ok(_) => {}
        Err(Error::LimitExceeded(_)) => {
            // Cap reached: archive as timeout and tell the caller why.
            state
                .conversations
                .archive(&conversation.id, EndReason::Timeout)?;
            return Err(Error::LimitExceeded(format!(
                "conversation {} reached its message cap and was archived (timeout)",
                conversation.id
            )));
        }
        Err(e) => return Err(e),
    }

    // RAG context is resolved anew for this turn and merged only for
    // this call, never persisted.
    let rag_context = retrieve_context(
        state,
        &params.message,
        params.doc_ids.clone(),
        params.doc_titles.clone(),
        params.folder.clone(),
    )
    .await;
    let stored_prompt = conversation.system_prompt.clone().unwrap_or_default();
    let effective_prompt = match &rag_context {
        Some(ctx) if stored_prompt.is_empty() => ctx.clone(),
        Some(ctx) => format!("{stored_prompt}\n\n{ctx}"),
        None => stored_prompt,
    };
    let effective_prompt = (!effective_prompt.is_empty()).then_some(effective_prompt);

    let completion = {
        let wire = provider_messages(state, &conversation.id)?;
        client
            .complete(spec, &wire, effective_prompt.as_deref())
            .await?
    };

    state
        .conversations
        .add_message(&conversation.id, Role::Assistant, &completion.content, cap)?;

    let count = state.store.message_count(&conversation.id)? as usize;
    Ok(ConsultReply {
        conversation_id: conversation.id,
        answer: completion.content,
        model: conversation.model,
        mode: None,
        message_count: count,
        can_continue: count < cap as usize,
        metadata: ConsultMetadata {
            response_time: completion.response_time_ms,
            tokens_used: completion.usage.map(|u| u.total_tokens),
            thinking: completion
                .reasoning_content
                .as_deref()
                .map(|r| ThinkingSummary {
                    summary: summarize_thinking(r),
                }),
        },
        rag_context,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// end
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn end(state: &AppState, conversation_id: &str) -> Result<EndOutcome> {
    let conversation = state.conversations.get(conversation_id)?;
    let ended = state
        .conversations
        .archive(conversation_id, EndReason::Completed)?;
    let end_reason = if ended {
        Some(EndReason::Completed)
    } else {
        // Already archived: report the reason it carries.
        conversation.end_reason
    };
    let total = state.store.message_count(conversation_id)? as usize;
    Ok(EndOutcome {
        ended,
        conversation_id: conversation_id.to_owned(),
        total_messages: total,
        end_reason,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retrieval for a consultation turn. A RAG outage degrades to no
/// context rather than failing the consultation.
async fn retrieve_context(
    state: &AppState,
    query: &str,
    doc_ids: Option<Vec<String>>,
    doc_titles: Option<Vec<String>>,
    folder: Option<String>,
) -> Option<String> {
    let filters = RetrieveFilters {
        doc_ids,
        doc_titles,
        folder,
        ..Default::default()
    };
    match state.rag.retrieve(query, &filters).await {
        Ok(retrieval) => retrieval.context,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval unavailable, consulting without context");
            None
        }
    }
}

/// Persisted turns as provider messages. The system prompt travels
/// separately; it is never a stored row.
fn provider_messages(state: &AppState, conversation_id: &str) -> Result<Vec<ProviderMessage>> {
    Ok(state
        .conversations
        .messages(conversation_id)?
        .into_iter()
        .map(|m| ProviderMessage::new(m.role, m.content))
        .collect())
}

/// First ≤500 chars of the reasoning content, with a trailing marker
/// when shortened.
pub fn summarize_thinking(reasoning: &str) -> String {
    let trimmed = reasoning.trim();
    let mut summary: String = trimmed.chars().take(THINKING_LIMIT).collect();
    if trimmed.chars().count() > THINKING_LIMIT {
        summary.push(TRUNCATION_MARKER);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    #[test]
    fn thinking_summary_truncates_at_500_chars() {
        let short = "because 2 + 2 = 4";
        assert_eq!(summarize_thinking(short), short);

        let long = "x".repeat(900);
        let summary = summarize_thinking(&long);
        assert_eq!(summary.chars().count(), 501);
        assert!(summary.ends_with('…'));

        let exact = "y".repeat(500);
        assert_eq!(summarize_thinking(&exact), exact);
    }

    #[tokio::test]
    async fn consult_without_credentials_is_auth_error() {
        let state = test_state("t");
        let err = consult(
            &state,
            serde_json::from_value(serde_json::json!({ "question": "why?" })).unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "AUTH_ERROR");
    }

    #[tokio::test]
    async fn continue_on_unknown_conversation_is_not_found() {
        let state = test_state("t");
        let err = continue_conversation(
            &state,
            serde_json::from_value(
                serde_json::json!({ "conversationId": "ghost", "message": "hi" }),
            )
            .unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn end_is_explicit_about_already_archived() {
        let state = test_state("t");
        let conversation = state.conversations.create("deepseek-chat", None).unwrap();

        let first = end(&state, &conversation.id).unwrap();
        assert!(first.ended);
        assert_eq!(first.end_reason, Some(EndReason::Completed));
        let second = end(&state, &conversation.id).unwrap();
        assert!(!second.ended);
        // The stored reason still comes back on the no-op path.
        assert_eq!(second.end_reason, Some(EndReason::Completed));
    }

    #[tokio::test]
    async fn continue_on_manually_ended_conversation_is_rejected() {
        let state = test_state("t");
        let conversation = state.conversations.create("deepseek-chat", None).unwrap();
        end(&state, &conversation.id).unwrap();

        let err = continue_conversation(
            &state,
            serde_json::from_value(serde_json::json!({
                "conversationId": conversation.id,
                "message": "one more thing",
            }))
            .unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn consult_params_default_use_rag_on() {
        let params: ConsultParams =
            serde_json::from_value(serde_json::json!({ "question": "q" })).unwrap();
        assert!(params.use_rag);
        let params: ConsultParams =
            serde_json::from_value(serde_json::json!({ "question": "q", "useRag": false }))
                .unwrap();
        assert!(!params.use_rag);
    }
}
