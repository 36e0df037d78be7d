//! Conversation service: CRUD + state transitions, events after commit.

use cd_domain::event::Event;
use cd_domain::model::{Conversation, EndReason, Message, Role};
use cd_domain::{Error, Result};
use cd_store::Store;

use crate::hub::EventHub;

/// Active conversations idle past this window get archived by the sweep.
pub const STALE_AFTER_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct ConversationService {
    store: Store,
    hub: EventHub,
}

impl ConversationService {
    pub fn new(store: Store, hub: EventHub) -> Self {
        Self { store, hub }
    }

    pub fn create(&self, model: &str, system_prompt: Option<&str>) -> Result<Conversation> {
        let conversation = self.store.create_conversation(model, system_prompt)?;
        self.hub.emit(Event::ConversationCreated(conversation.clone()));
        Ok(conversation)
    }

    pub fn get(&self, id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    pub fn messages(&self, id: &str) -> Result<Vec<Message>> {
        self.store.list_messages(id)
    }

    pub fn list_active(&self) -> Result<Vec<Conversation>> {
        self.store.list_active()
    }

    pub fn list_archived(&self) -> Result<Vec<Conversation>> {
        self.store.list_archived()
    }

    /// Append a turn. The `conversation:message` broadcast happens
    /// strictly after the commit; a failed append broadcasts nothing.
    pub fn add_message(&self, id: &str, role: Role, content: &str, cap: u32) -> Result<Message> {
        let message = self.store.append_message(id, role, content, cap)?;
        self.hub.emit(Event::ConversationMessage {
            conversation_id: id.to_owned(),
            message: message.clone(),
        });
        Ok(message)
    }

    /// Archive; idempotent. Returns whether anything changed, and emits
    /// `conversation:ended` only when it did.
    pub fn archive(&self, id: &str, reason: EndReason) -> Result<bool> {
        let changed = self.store.archive_conversation(id, reason)?;
        if changed {
            self.hub.emit(Event::ConversationEnded {
                conversation_id: id.to_owned(),
                reason,
            });
        }
        Ok(changed)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete_conversation(id)?;
        if deleted {
            self.hub.emit(Event::ConversationDeleted {
                conversation_id: id.to_owned(),
            });
        }
        Ok(deleted)
    }

    /// Hard delete every archived conversation.
    pub fn delete_archived(&self) -> Result<Vec<String>> {
        let ids = self.store.delete_archived()?;
        for id in &ids {
            self.hub.emit(Event::ConversationDeleted {
                conversation_id: id.clone(),
            });
        }
        Ok(ids)
    }

    /// One sweep pass: archive active conversations idle for more than
    /// [`STALE_AFTER_MINUTES`], then emit `conversation:ended` per id.
    pub fn sweep_stale(&self) -> Result<usize> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::minutes(STALE_AFTER_MINUTES))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let swept = self.store.sweep_stale(&cutoff)?;
        for conversation in &swept {
            self.hub.emit(Event::ConversationEnded {
                conversation_id: conversation.id.clone(),
                reason: EndReason::Timeout,
            });
        }
        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "stale conversations archived");
        }
        Ok(swept.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ConversationService {
        ConversationService::new(Store::open_in_memory().unwrap(), EventHub::new())
    }

    #[tokio::test]
    async fn add_message_emits_exactly_one_broadcast_after_commit() {
        let svc = service();
        let conv = svc.create("deepseek-chat", None).unwrap();
        let mut rx = svc.hub.subscribe();

        svc.add_message(&conv.id, Role::User, "hello", 10).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "conversation:message");
        assert_eq!(event.payload()["conversationId"], conv.id.as_str());
        assert_eq!(event.payload()["message"]["content"], "hello");

        // Nothing else queued.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_append_broadcasts_nothing() {
        let svc = service();
        let conv = svc.create("deepseek-chat", None).unwrap();
        let mut rx = svc.hub.subscribe();

        let err = svc.add_message(&conv.id, Role::User, "too many", 0).unwrap_err();
        assert_eq!(err.code(), "LIMIT_EXCEEDED");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn archive_emits_only_on_transition() {
        let svc = service();
        let conv = svc.create("deepseek-chat", None).unwrap();
        let mut rx = svc.hub.subscribe();

        assert!(svc.archive(&conv.id, EndReason::Completed).unwrap());
        assert_eq!(rx.recv().await.unwrap().name(), "conversation:ended");

        assert!(!svc.archive(&conv.id, EndReason::Manual).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn get_unknown_is_not_found() {
        let svc = service();
        assert_eq!(svc.get("ghost").unwrap_err().code(), "NOT_FOUND");
    }
}
