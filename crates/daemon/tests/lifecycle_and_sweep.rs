//! Lock-file election and the stale sweep, end to end.

use chrono::Utc;

use cd_daemon::hub::EventHub;
use cd_daemon::lifecycle::{self, Election};
use cd_daemon::services::conversations::ConversationService;
use cd_domain::model::{ConversationStatus, DaemonLock, EndReason};
use cd_store::Store;

#[test]
fn election_wins_and_reclaims_stale_locks() {
    let dir = tempfile::tempdir().unwrap();

    // Fresh directory: win, lock on disk, token minted.
    let port = match lifecycle::elect(dir.path()).unwrap() {
        Election::Won { port, token } => {
            assert_eq!(token.len(), 64);
            port
        }
        Election::AlreadyRunning { .. } => panic!("no one else should hold the lock"),
    };
    let lock = lifecycle::read_lock(&lifecycle::lock_path(dir.path())).unwrap();
    assert_eq!(lock.pid, std::process::id());
    assert_eq!(lock.port, port);

    // A dead pid in the lock is stale: the next election reclaims it and
    // mints a fresh token.
    let stale = DaemonLock {
        pid: 4_000_000,
        port: 3456,
        started_at: Utc::now(),
        token: "deadbeef".repeat(8),
    };
    lifecycle::write_lock(&lifecycle::lock_path(dir.path()), &stale).unwrap();

    match lifecycle::elect(dir.path()).unwrap() {
        Election::Won { token, .. } => assert_ne!(token, stale.token),
        Election::AlreadyRunning { .. } => panic!("stale lock must not win"),
    }
}

#[tokio::test]
async fn sweep_archives_idle_conversations_and_notifies() {
    let store = Store::open_in_memory().unwrap();
    let hub = EventHub::new();
    let conversations = ConversationService::new(store.clone(), hub.clone());

    let idle = conversations.create("deepseek-chat", None).unwrap();
    let busy = conversations.create("deepseek-chat", None).unwrap();

    // Simulate >5 minutes of silence on one conversation.
    store
        .set_conversation_updated_at(&idle.id, "2001-01-01T00:00:00.000Z")
        .unwrap();

    let mut events = hub.subscribe();
    let swept = conversations.sweep_stale().unwrap();
    assert_eq!(swept, 1);

    let archived = conversations.get(&idle.id).unwrap();
    assert_eq!(archived.status, ConversationStatus::Archived);
    assert_eq!(archived.end_reason, Some(EndReason::Timeout));
    assert!(archived.ended_at.is_some());

    let untouched = conversations.get(&busy.id).unwrap();
    assert_eq!(untouched.status, ConversationStatus::Active);

    // A subscriber observes exactly one ended event with the timeout
    // reason.
    let event = events.recv().await.unwrap();
    assert_eq!(event.name(), "conversation:ended");
    assert_eq!(event.payload()["conversationId"], idle.id.as_str());
    assert_eq!(event.payload()["reason"], "timeout");
    assert!(events.try_recv().is_err());

    // Re-sweeping finds nothing new.
    assert_eq!(conversations.sweep_stale().unwrap(), 0);
}
