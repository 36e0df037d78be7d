//! Conversation and message queries.
//!
//! Appends, archives, and the stale sweep each run inside a single
//! transaction so readers never observe a half-applied mutation.

use rusqlite::{params, Connection, OptionalExtension, Row};

use cd_domain::model::{Conversation, ConversationStatus, EndReason, Message, Role};
use cd_domain::{Error, Result};

use crate::{db_err, new_id, now_iso, parse_iso, Store};

/// A conversation transitioned by the stale sweep.
#[derive(Debug, Clone)]
pub struct SweptConversation {
    pub id: String,
}

impl Store {
    pub fn create_conversation(
        &self,
        model: &str,
        system_prompt: Option<&str>,
    ) -> Result<Conversation> {
        let id = new_id();
        let now = now_iso();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, model, system_prompt, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
                params![id, model, system_prompt, now],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        self.get_conversation(&id)?
            .ok_or_else(|| Error::Internal("conversation vanished after insert".into()))
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, model, system_prompt, status, end_reason, created_at, updated_at, ended_at
                 FROM conversations WHERE id = ?1",
                params![id],
                row_to_conversation,
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Messages in ascending ordinal.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT ordinal, role, content, created_at FROM messages
                     WHERE conversation_id = ?1 ORDER BY ordinal ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![conversation_id], row_to_message)
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    pub fn message_count(&self, conversation_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }

    /// Active conversations, newest first by `updated_at`.
    pub fn list_active(&self) -> Result<Vec<Conversation>> {
        self.list_by_status("active", "updated_at")
    }

    /// Archived conversations, newest first by `ended_at`.
    pub fn list_archived(&self) -> Result<Vec<Conversation>> {
        self.list_by_status("archived", "ended_at")
    }

    fn list_by_status(&self, status: &str, order_col: &str) -> Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT id, model, system_prompt, status, end_reason, created_at, updated_at, ended_at
             FROM conversations WHERE status = ?1 ORDER BY {order_col} DESC"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params![status], row_to_conversation)
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Append a message and bump `updated_at`, enforcing the hard cap.
    ///
    /// Fails `NOT_FOUND` for an unknown id and `LIMIT_EXCEEDED` once the
    /// conversation already holds `cap` messages. Check, insert, and bump
    /// commit together.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        cap: u32,
    ) -> Result<Message> {
        let now = now_iso();
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;

            let exists: Option<String> = tx
                .query_row(
                    "SELECT id FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("conversation {conversation_id}")));
            }

            let count: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            if count >= cap as i64 {
                return Err(Error::LimitExceeded(format!(
                    "conversation {conversation_id} holds {count} messages (cap {cap})"
                )));
            }

            tx.execute(
                "INSERT INTO messages (conversation_id, ordinal, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![conversation_id, count, role.as_str(), content, now],
            )
            .map_err(db_err)?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )
            .map_err(db_err)?;

            tx.commit().map_err(db_err)?;
            Ok(Message {
                ordinal: count,
                role,
                content: content.to_owned(),
                created_at: parse_iso(&now),
            })
        })
    }

    /// Flip a conversation to archived. Returns `false` when it was
    /// already archived (idempotent) and `NOT_FOUND` when unknown.
    pub fn archive_conversation(&self, id: &str, reason: EndReason) -> Result<bool> {
        let now = now_iso();
        self.with_conn(|conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            match exists.as_deref() {
                None => Err(Error::NotFound(format!("conversation {id}"))),
                Some("archived") => Ok(false),
                Some(_) => {
                    conn.execute(
                        "UPDATE conversations
                         SET status = 'archived', end_reason = ?1, ended_at = ?2, updated_at = ?2
                         WHERE id = ?3",
                        params![reason.as_str(), now, id],
                    )
                    .map_err(db_err)?;
                    Ok(true)
                }
            }
        })
    }

    /// Hard delete; messages cascade. Returns `false` when unknown.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn
                .execute("DELETE FROM conversations WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }

    /// Archive every active conversation idle since before `cutoff_iso`,
    /// in one SQL update. Returns the affected ids.
    pub fn sweep_stale(&self, cutoff_iso: &str) -> Result<Vec<SweptConversation>> {
        let now = now_iso();
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "UPDATE conversations
                     SET status = 'archived', end_reason = 'timeout', ended_at = ?1
                     WHERE status = 'active' AND updated_at < ?2
                     RETURNING id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![now, cutoff_iso], |row| {
                    Ok(SweptConversation { id: row.get(0)? })
                })
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Hard delete every archived conversation, returning the ids.
    pub fn delete_archived(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("DELETE FROM conversations WHERE status = 'archived' RETURNING id")
                .map_err(db_err)?;
            let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status_raw: String = row.get(3)?;
    let end_reason_raw: Option<String> = row.get(4)?;
    let ended_at_raw: Option<String> = row.get(7)?;
    Ok(Conversation {
        id: row.get(0)?,
        model: row.get(1)?,
        system_prompt: row.get(2)?,
        status: ConversationStatus::parse(&status_raw).unwrap_or(ConversationStatus::Active),
        end_reason: end_reason_raw.as_deref().and_then(EndReason::parse),
        created_at: parse_iso(&row.get::<_, String>(5)?),
        updated_at: parse_iso(&row.get::<_, String>(6)?),
        ended_at: ended_at_raw.as_deref().map(parse_iso),
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role_raw: String = row.get(1)?;
    Ok(Message {
        ordinal: row.get(0)?,
        role: Role::parse(&role_raw).unwrap_or(Role::User),
        content: row.get(2)?,
        created_at: parse_iso(&row.get::<_, String>(3)?),
    })
}
