//! Process-wide event hub.
//!
//! Services emit [`Event`]s after their store commit; every connected
//! client holds a broadcast subscription. The hub is fire-and-forget: a
//! subscriber that cannot keep up is dropped by the channel's overflow
//! policy and resyncs over REST. Ordering is per-emitter FIFO.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use cd_domain::event::Event;
use cd_domain::model::{ClientKind, ClientRegistration};

/// Broadcast backlog per subscriber before the transport disconnects it.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Arc<Event>>,
    clients: Arc<RwLock<HashMap<String, ClientRegistration>>>,
    /// When the client table last became empty. `None` while clients are
    /// connected. Seeds the idle timer.
    empty_since: Arc<Mutex<Option<Instant>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
            empty_since: Arc::new(Mutex::new(Some(Instant::now()))),
        }
    }

    /// Broadcast an event to every current subscriber. Never blocks and
    /// never queues for disconnected clients.
    pub fn emit(&self, event: Event) {
        tracing::debug!(event = event.name(), "hub emit");
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    /// Track a newly connected client and rebroadcast the count.
    pub fn register(&self, kind: ClientKind) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let count = {
            let mut clients = self.clients.write();
            clients.insert(
                id.clone(),
                ClientRegistration {
                    id: id.clone(),
                    kind,
                    connected_at: Utc::now(),
                },
            );
            clients.len()
        };
        *self.empty_since.lock() = None;
        tracing::info!(client = %id, kind = ?kind, count, "client connected");
        self.emit(Event::ClientsCount(count));
        id
    }

    /// Drop a client registration and rebroadcast the count.
    pub fn unregister(&self, id: &str) {
        let count = {
            let mut clients = self.clients.write();
            clients.remove(id);
            clients.len()
        };
        if count == 0 {
            *self.empty_since.lock() = Some(Instant::now());
        }
        tracing::info!(client = %id, count, "client disconnected");
        self.emit(Event::ClientsCount(count));
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn clients(&self) -> Vec<ClientRegistration> {
        self.clients.read().values().cloned().collect()
    }

    /// How long the client table has been empty; `None` while any client
    /// is connected.
    pub fn idle_for(&self) -> Option<std::time::Duration> {
        self.empty_since.lock().map(|since| since.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cd_domain::model::EndReason;

    #[tokio::test]
    async fn register_broadcasts_counts() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        let id = hub.register(ClientKind::Proxy);
        assert_eq!(hub.client_count(), 1);
        assert!(hub.idle_for().is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "clients:count");
        assert_eq!(event.payload(), serde_json::json!(1));

        hub.unregister(&id);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload(), serde_json::json!(0));
        assert!(hub.idle_for().is_some());
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.emit(Event::ConversationEnded {
            conversation_id: "c1".into(),
            reason: EndReason::Timeout,
        });

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.name(), "conversation:ended");
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let hub = EventHub::new();
        hub.emit(Event::ClientsCount(0));
    }
}
