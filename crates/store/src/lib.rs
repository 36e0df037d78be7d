//! Embedded store for the consultd daemon.
//!
//! A single SQLite file in WAL mode holds conversations, messages,
//! config, documents, chunks, embeddings, and memories. All writers
//! serialize through one connection behind a mutex; committed
//! transactions are durable across crash/kill.

mod config;
mod conversations;
mod documents;
mod memories;
mod schema;

pub use conversations::SweptConversation;
pub use documents::CandidateChunk;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use cd_domain::{Error, Result};

/// Handle to the embedded database. Cheap to clone; all clones share the
/// single writer connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Open an in-memory database. Test use only — nothing survives drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.with_conn(schema::migrate)?;
        Ok(store)
    }

    /// Run `f` with the writer connection held. Every public query method
    /// goes through here, so writers serialize inside the process.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Checkpoint and close. Dropping the last clone also closes cleanly;
    /// this exists so shutdown can log failures.
    pub fn close(&self) {
        let conn = self.conn.lock();
        if let Err(e) = conn.pragma_update(None, "wal_checkpoint", "TRUNCATE") {
            tracing::warn!(error = %e, "WAL checkpoint on close failed");
        }
    }
}

#[cfg(feature = "test-support")]
impl Store {
    /// Test-only: backdate a conversation's `updated_at` to exercise the
    /// stale sweep without waiting out the idle window.
    pub fn set_conversation_updated_at(&self, id: &str, iso: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![iso, id],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn parse_iso(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_default()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
