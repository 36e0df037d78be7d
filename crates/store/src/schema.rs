//! Schema creation and idempotent migrations.
//!
//! `migrate` is safe to re-run on an already-migrated database: table
//! creation is `IF NOT EXISTS`, the `repo_scan` strip only fires when the
//! legacy enum value is present in the table definition, and the `folder`
//! column add checks `pragma_table_info` first.

use rusqlite::{Connection, OptionalExtension};

use cd_domain::Result;

use crate::db_err;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY,
    model         TEXT NOT NULL,
    system_prompt TEXT,
    status        TEXT NOT NULL CHECK (status IN ('active', 'archived')),
    end_reason    TEXT CHECK (end_reason IN ('completed', 'timeout', 'manual')),
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    ended_at      TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    ordinal         INTEGER NOT NULL,
    role            TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (conversation_id, ordinal)
);

CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    source_type TEXT NOT NULL CHECK (source_type IN ('upload', 'manual')),
    source_uri  TEXT,
    mime_type   TEXT,
    folder      TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id          TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    content     TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (document_id, chunk_index)
);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id   TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    vector     BLOB NOT NULL,
    dim        INTEGER NOT NULL,
    model      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    id         TEXT PRIMARY KEY,
    category   TEXT NOT NULL CHECK (category IN
                   ('architecture', 'backend', 'db', 'auth', 'config', 'flow', 'other')),
    title      TEXT NOT NULL,
    content    TEXT NOT NULL,
    source     TEXT NOT NULL DEFAULT 'manual',
    created_at TEXT NOT NULL
);
";

const CREATE_INDICES: &str = "
CREATE INDEX IF NOT EXISTS idx_conversations_status_updated
    ON conversations (status, updated_at);
CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
    ON messages (conversation_id, created_at);
CREATE INDEX IF NOT EXISTS idx_documents_source_folder
    ON documents (source_type, folder);
CREATE INDEX IF NOT EXISTS idx_memories_category
    ON memories (category);
CREATE INDEX IF NOT EXISTS idx_chunks_document
    ON chunks (document_id);
";

pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction().map_err(db_err)?;

    tx.execute_batch(CREATE_TABLES).map_err(db_err)?;
    strip_repo_scan(&tx)?;
    add_folder_column(&tx)?;
    tx.execute_batch(CREATE_INDICES).map_err(db_err)?;

    tx.commit().map_err(db_err)?;
    Ok(())
}

/// Databases written before the `repo_scan` source type was retired carry
/// it both as rows and in the table's CHECK constraint. Rebuild the
/// documents table through a shadow copy, dropping those rows; chunk and
/// embedding cascades follow the deleted documents.
fn strip_repo_scan(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let table_sql: Option<String> = tx
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
            [],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .map_err(db_err)?
        .flatten();

    let needs_rebuild = table_sql
        .as_deref()
        .map(|sql| sql.contains("repo_scan"))
        .unwrap_or(false);
    if !needs_rebuild {
        return Ok(());
    }

    tracing::info!("migrating documents table: stripping legacy repo_scan rows");

    // Carry folder values across only when the legacy table has the column.
    let folder_expr = if has_column(tx, "documents", "folder")? {
        "folder"
    } else {
        "NULL"
    };

    tx.execute_batch(&format!(
        "
        CREATE TABLE documents_shadow (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            source_type TEXT NOT NULL CHECK (source_type IN ('upload', 'manual')),
            source_uri  TEXT,
            mime_type   TEXT,
            folder      TEXT,
            created_at  TEXT NOT NULL
        );
        INSERT INTO documents_shadow (id, title, source_type, source_uri, mime_type, folder, created_at)
            SELECT id, title, source_type, source_uri, mime_type,
                   {folder_expr}, created_at
            FROM documents
            WHERE source_type IN ('upload', 'manual');
        DELETE FROM chunks WHERE document_id NOT IN (SELECT id FROM documents_shadow);
        DELETE FROM embeddings WHERE chunk_id NOT IN (SELECT id FROM chunks);
        DROP TABLE documents;
        ALTER TABLE documents_shadow RENAME TO documents;
        ",
    ))
    .map_err(db_err)?;
    Ok(())
}

fn has_column(tx: &rusqlite::Transaction<'_>, table: &str, column: &str) -> Result<bool> {
    tx.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        (table, column),
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(db_err)
}

/// Older schemas predate the `folder` column.
fn add_folder_column(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    if !has_column(tx, "documents", "folder")? {
        tracing::info!("migrating documents table: adding folder column");
        tx.execute("ALTER TABLE documents ADD COLUMN folder TEXT", [])
            .map_err(db_err)?;
    }
    Ok(())
}
