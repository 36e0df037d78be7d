//! Document, chunk, and embedding queries.

use rusqlite::{params, OptionalExtension, Row};

use cd_domain::model::{Chunk, Document, SourceType};
use cd_domain::{Error, Result};

use crate::{db_err, new_id, now_iso, parse_iso, Store};

/// A chunk joined with its document metadata and stored vector, as loaded
/// for similarity scoring.
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub source_type: SourceType,
    pub chunk_index: i64,
    pub content: String,
    pub vector: Vec<u8>,
    pub dim: i64,
}

impl Store {
    /// Insert a document and its chunks in one transaction.
    pub fn create_document_with_chunks(
        &self,
        title: &str,
        source_type: SourceType,
        source_uri: Option<&str>,
        mime_type: Option<&str>,
        folder: Option<&str>,
        chunk_texts: &[(String, i64)],
    ) -> Result<(Document, Vec<Chunk>)> {
        let doc_id = new_id();
        let now = now_iso();
        let mut chunks = Vec::with_capacity(chunk_texts.len());

        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO documents (id, title, source_type, source_uri, mime_type, folder, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![doc_id, title, source_type.as_str(), source_uri, mime_type, folder, now],
            )
            .map_err(db_err)?;

            for (index, (content, token_count)) in chunk_texts.iter().enumerate() {
                let chunk_id = new_id();
                tx.execute(
                    "INSERT INTO chunks (id, document_id, chunk_index, content, token_count, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![chunk_id, doc_id, index as i64, content, token_count, now],
                )
                .map_err(db_err)?;
                chunks.push(Chunk {
                    id: chunk_id,
                    document_id: doc_id.clone(),
                    chunk_index: index as i64,
                    content: content.clone(),
                    token_count: *token_count,
                    created_at: parse_iso(&now),
                });
            }
            tx.commit().map_err(db_err)
        })?;

        let doc = Document {
            id: doc_id,
            title: title.to_owned(),
            source_type,
            source_uri: source_uri.map(str::to_owned),
            mime_type: mime_type.map(str::to_owned),
            folder: folder.map(str::to_owned),
            created_at: parse_iso(&now),
        };
        Ok((doc, chunks))
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, source_type, source_uri, mime_type, folder, created_at
                 FROM documents WHERE id = ?1",
                params![id],
                row_to_document,
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Documents newest first, optionally filtered by folder and source type.
    pub fn list_documents(
        &self,
        folder: Option<&str>,
        source_type: Option<SourceType>,
    ) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, title, source_type, source_uri, mime_type, folder, created_at
                     FROM documents
                     WHERE (?1 IS NULL OR folder = ?1)
                       AND (?2 IS NULL OR source_type = ?2)
                     ORDER BY created_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![folder, source_type.map(|s| s.as_str())],
                    row_to_document,
                )
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Documents whose trimmed title matches `title` case-insensitively.
    pub fn find_documents_by_title(&self, title: &str) -> Result<Vec<Document>> {
        let needle = title.trim().to_lowercase();
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, title, source_type, source_uri, mime_type, folder, created_at
                     FROM documents WHERE LOWER(TRIM(title)) = ?1",
                )
                .map_err(db_err)?;
            let rows = stmt.query_map(params![needle], row_to_document).map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Hard delete; chunks and embeddings cascade.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }

    pub fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, document_id, chunk_index, content, token_count, created_at
                     FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
                )
                .map_err(db_err)?;
            let rows = stmt.query_map(params![document_id], row_to_chunk).map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Every chunk in the corpus, for batch reindexing.
    pub fn list_all_chunks(&self) -> Result<Vec<Chunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, document_id, chunk_index, content, token_count, created_at
                     FROM chunks ORDER BY document_id, chunk_index",
                )
                .map_err(db_err)?;
            let rows = stmt.query_map([], row_to_chunk).map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Insert or replace the embedding for a chunk.
    pub fn upsert_embedding(
        &self,
        chunk_id: &str,
        vector: &[u8],
        dim: i64,
        model: &str,
    ) -> Result<()> {
        let now = now_iso();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO embeddings (chunk_id, vector, dim, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (chunk_id) DO UPDATE
                 SET vector = excluded.vector, dim = excluded.dim,
                     model = excluded.model, created_at = excluded.created_at",
                params![chunk_id, vector, dim, model, now],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Embedded chunks joined with their documents, filtered for retrieval.
    /// `doc_ids` is an exact id set; `folder` is an equality filter.
    pub fn candidate_chunks(
        &self,
        doc_ids: Option<&[String]>,
        folder: Option<&str>,
    ) -> Result<Vec<CandidateChunk>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT c.id, c.document_id, d.title, d.source_type, c.chunk_index, c.content,
                        e.vector, e.dim
                 FROM chunks c
                 JOIN documents d ON d.id = c.document_id
                 JOIN embeddings e ON e.chunk_id = c.id
                 WHERE 1 = 1",
            );
            let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(ids) = doc_ids {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; ids.len()].join(", ");
                sql.push_str(&format!(" AND c.document_id IN ({placeholders})"));
                for id in ids {
                    bound.push(Box::new(id.clone()));
                }
            }
            if let Some(f) = folder {
                sql.push_str(&format!(" AND d.folder = ?{}", bound.len() + 1));
                bound.push(Box::new(f.to_owned()));
            }

            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params_ref.as_slice(), |row| {
                    let source_raw: String = row.get(3)?;
                    Ok(CandidateChunk {
                        chunk_id: row.get(0)?,
                        document_id: row.get(1)?,
                        title: row.get(2)?,
                        source_type: SourceType::parse(&source_raw)
                            .unwrap_or(SourceType::Manual),
                        chunk_index: row.get(4)?,
                        content: row.get(5)?,
                        vector: row.get(6)?,
                        dim: row.get(7)?,
                    })
                })
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Distinct non-null folder names.
    pub fn list_folders(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT DISTINCT folder FROM documents
                     WHERE folder IS NOT NULL ORDER BY folder",
                )
                .map_err(db_err)?;
            let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Move every document in `from` to `to`. Returns the row count.
    pub fn rename_folder(&self, from: &str, to: &str) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE documents SET folder = ?1 WHERE folder = ?2",
                params![to, from],
            )
            .map_err(db_err)
        })
    }

    /// Delete a folder. `cascade` removes its documents; otherwise they
    /// are detached (folder set to NULL). Returns affected documents.
    pub fn delete_folder(&self, name: &str, cascade: bool) -> Result<usize> {
        self.with_conn(|conn| {
            let sql = if cascade {
                "DELETE FROM documents WHERE folder = ?1"
            } else {
                "UPDATE documents SET folder = NULL WHERE folder = ?1"
            };
            conn.execute(sql, params![name]).map_err(db_err)
        })
    }

    /// Orphan check used by tests and the health surface.
    pub fn embedding_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                .map_err(db_err)
        })
    }
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let source_raw: String = row.get(2)?;
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        source_type: SourceType::parse(&source_raw).unwrap_or(SourceType::Manual),
        source_uri: row.get(3)?,
        mime_type: row.get(4)?,
        folder: row.get(5)?,
        created_at: parse_iso(&row.get::<_, String>(6)?),
    })
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        chunk_index: row.get(2)?,
        content: row.get(3)?,
        token_count: row.get(4)?,
        created_at: parse_iso(&row.get::<_, String>(5)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn seed_doc(s: &Store, title: &str, folder: Option<&str>) -> (Document, Vec<Chunk>) {
        s.create_document_with_chunks(
            title,
            SourceType::Upload,
            None,
            Some("text/plain"),
            folder,
            &[("alpha beta".to_owned(), 3), ("gamma delta".to_owned(), 3)],
        )
        .unwrap()
    }

    #[test]
    fn document_insert_and_cascade_delete() {
        let s = store();
        let (doc, chunks) = seed_doc(&s, "notes", Some("eng"));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);

        s.upsert_embedding(&chunks[0].id, &[0, 0, 128, 63], 1, "test-model").unwrap();
        assert_eq!(s.embedding_count().unwrap(), 1);

        assert!(s.delete_document(&doc.id).unwrap());
        assert!(s.list_chunks(&doc.id).unwrap().is_empty());
        assert_eq!(s.embedding_count().unwrap(), 0);
    }

    #[test]
    fn embedding_insert_replaces() {
        let s = store();
        let (_, chunks) = seed_doc(&s, "notes", None);
        s.upsert_embedding(&chunks[0].id, &[0, 0, 128, 63], 1, "m1").unwrap();
        s.upsert_embedding(&chunks[0].id, &[0, 0, 0, 64, 0, 0, 64, 64], 2, "m2").unwrap();
        assert_eq!(s.embedding_count().unwrap(), 1);

        let candidates = s.candidate_chunks(None, None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].dim, 2);
        assert_eq!(candidates[0].vector.len(), 8);
    }

    #[test]
    fn title_lookup_is_case_insensitive_and_trimmed() {
        let s = store();
        seed_doc(&s, "Design Notes", None);
        assert_eq!(s.find_documents_by_title("  design notes ").unwrap().len(), 1);
        assert!(s.find_documents_by_title("design").unwrap().is_empty());
    }

    #[test]
    fn candidate_filters_by_doc_ids_and_folder() {
        let s = store();
        let (doc_a, chunks_a) = seed_doc(&s, "a", Some("eng"));
        let (_doc_b, chunks_b) = seed_doc(&s, "b", Some("ops"));
        for c in chunks_a.iter().chain(chunks_b.iter()) {
            s.upsert_embedding(&c.id, &[0, 0, 128, 63], 1, "m").unwrap();
        }

        let all = s.candidate_chunks(None, None).unwrap();
        assert_eq!(all.len(), 4);

        let only_a = s.candidate_chunks(Some(&[doc_a.id.clone()]), None).unwrap();
        assert_eq!(only_a.len(), 2);

        let ops = s.candidate_chunks(None, Some("ops")).unwrap();
        assert_eq!(ops.len(), 2);

        let none = s.candidate_chunks(Some(&[]), None).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn folder_rename_and_delete() {
        let s = store();
        seed_doc(&s, "a", Some("eng"));
        seed_doc(&s, "b", Some("eng"));
        seed_doc(&s, "c", Some("ops"));

        assert_eq!(s.list_folders().unwrap(), vec!["eng".to_owned(), "ops".to_owned()]);
        assert_eq!(s.rename_folder("eng", "platform").unwrap(), 2);
        assert!(s.list_folders().unwrap().contains(&"platform".to_owned()));

        // Detach leaves documents in place.
        assert_eq!(s.delete_folder("platform", false).unwrap(), 2);
        assert_eq!(s.list_documents(None, None).unwrap().len(), 3);

        // Cascade removes them.
        assert_eq!(s.delete_folder("ops", true).unwrap(), 1);
        assert_eq!(s.list_documents(None, None).unwrap().len(), 2);
    }
}
