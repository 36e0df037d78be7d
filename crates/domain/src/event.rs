//! Event-bus payloads.
//!
//! Services emit these after their store commit; the hub fans them out to
//! every connected client. The bus carries notifications only — clients
//! rehydrate full state over REST.

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::DaemonConfig;
use crate::model::{Conversation, EndReason, Message};

/// A state-change notification broadcast to all connected clients.
#[derive(Debug, Clone)]
pub enum Event {
    /// Full effective config snapshot after any write (keys stripped).
    ConfigUpdated(DaemonConfig),
    ConversationCreated(Conversation),
    ConversationMessage {
        conversation_id: String,
        message: Message,
    },
    ConversationEnded {
        conversation_id: String,
        reason: EndReason,
    },
    ConversationDeleted {
        conversation_id: String,
    },
    ClientsCount(usize),
}

impl Event {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigUpdated(_) => "config:updated",
            Self::ConversationCreated(_) => "conversation:created",
            Self::ConversationMessage { .. } => "conversation:message",
            Self::ConversationEnded { .. } => "conversation:ended",
            Self::ConversationDeleted { .. } => "conversation:deleted",
            Self::ClientsCount(_) => "clients:count",
        }
    }

    /// The JSON payload carried under `data`.
    pub fn payload(&self) -> Value {
        match self {
            // Config broadcasts never include key material, masked or not.
            Self::ConfigUpdated(cfg) => to_value(&cfg.without_keys()),
            Self::ConversationCreated(conv) => to_value(conv),
            Self::ConversationMessage {
                conversation_id,
                message,
            } => json!({ "conversationId": conversation_id, "message": message }),
            Self::ConversationEnded {
                conversation_id,
                reason,
            } => json!({ "conversationId": conversation_id, "reason": reason }),
            Self::ConversationDeleted { conversation_id } => {
                json!({ "conversationId": conversation_id })
            }
            Self::ClientsCount(n) => json!(n),
        }
    }

    /// The full wire frame: `{"event": <name>, "data": <payload>}`.
    pub fn frame(&self) -> Value {
        json!({ "event": self.name(), "data": self.payload() })
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;

    #[test]
    fn config_broadcast_strips_keys() {
        let mut cfg = DaemonConfig::default();
        cfg.providers.deepseek.api_key = Some("sk-super-secret".into());
        let frame = Event::ConfigUpdated(cfg).frame();
        assert_eq!(frame["event"], "config:updated");
        let raw = frame.to_string();
        assert!(!raw.contains("sk-super-secret"));
        assert!(!raw.contains("apiKey"));
    }

    #[test]
    fn ended_frame_names_the_reason() {
        let frame = Event::ConversationEnded {
            conversation_id: "c7".into(),
            reason: EndReason::Timeout,
        }
        .frame();
        assert_eq!(frame["event"], "conversation:ended");
        assert_eq!(frame["data"]["conversationId"], "c7");
        assert_eq!(frame["data"]["reason"], "timeout");
    }

    #[test]
    fn clients_count_is_a_bare_integer() {
        let frame = Event::ClientsCount(3).frame();
        assert_eq!(frame["data"], 3);
    }
}
