//! RAG corpus endpoints: documents, upload, search, reindex, memories,
//! folders.

use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use cd_domain::model::{MemoryCategory, SourceType};
use cd_domain::Error;
use cd_rag::{IfExists, IngestOutcome, RetrieveFilters, UploadItem};

use crate::api::api_error;
use crate::state::AppState;

/// Longest search snippet returned to clients, in chars.
const SNIPPET_LIMIT: usize = 240;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Documents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsQuery {
    #[serde(default)]
    folder: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
) -> Response {
    let source_type = match query.source_type.as_deref() {
        None => None,
        Some(raw) => match SourceType::parse(raw) {
            Some(st) => Some(st),
            None => {
                return api_error(&Error::validation(
                    "sourceType",
                    format!("unknown source type: {raw}"),
                ))
            }
        },
    };
    match state.store.list_documents(query.folder.as_deref(), source_type) {
        Ok(documents) => Json(json!({ "documents": documents })).into_response(),
        Err(e) => api_error(&e),
    }
}

pub async fn delete_document(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_document(&id) {
        Ok(true) => Json(json!({ "success": true, "documentId": id })).into_response(),
        Ok(false) => api_error(&Error::NotFound(format!("document {id}"))),
        Err(e) => api_error(&e),
    }
}

pub async fn document_chunks(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_document(&id) {
        Ok(Some(document)) => match state.store.list_chunks(&id) {
            Ok(chunks) => {
                Json(json!({ "document": document, "chunks": chunks })).into_response()
            }
            Err(e) => api_error(&e),
        },
        Ok(None) => api_error(&Error::NotFound(format!("document {id}"))),
        Err(e) => api_error(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/rag/upload` — multipart `files[]` plus optional `folder`
/// and `ifExists` form fields. 503 when the embedding service is down.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut items: Vec<UploadItem> = Vec::new();
    let mut folder: Option<String> = None;
    let mut if_exists = IfExists::Skip;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return api_error(&Error::validation("multipart", e.to_string())),
        };
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "files" | "files[]" => {
                let file_name = field.file_name().unwrap_or("upload.txt").to_owned();
                match field.bytes().await {
                    Ok(bytes) => items.push(UploadItem {
                        file_name,
                        bytes: bytes.to_vec(),
                    }),
                    Err(e) => {
                        return api_error(&Error::validation("files", e.to_string()));
                    }
                }
            }
            "folder" => {
                folder = field.text().await.ok().filter(|s| !s.is_empty());
            }
            "ifExists" => {
                let raw = field.text().await.unwrap_or_default();
                if_exists = match raw.as_str() {
                    "" | "skip" => IfExists::Skip,
                    "allow" => IfExists::Allow,
                    "replace" => IfExists::Replace,
                    other => {
                        return api_error(&Error::validation(
                            "ifExists",
                            format!("unknown mode: {other}"),
                        ))
                    }
                };
            }
            _ => {}
        }
    }

    if items.is_empty() {
        return api_error(&Error::validation("files", "no files in upload"));
    }

    match state.rag.ingest_batch(items, folder.as_deref(), if_exists).await {
        Ok(outcomes) => {
            let mut uploaded = Vec::new();
            let mut skipped = Vec::new();
            for outcome in outcomes {
                match outcome {
                    IngestOutcome::Ingested { document, chunks } => {
                        uploaded.push(json!({ "document": document, "chunks": chunks }));
                    }
                    IngestOutcome::Skipped { title } => skipped.push(title),
                }
            }
            Json(json!({ "uploaded": uploaded, "skipped": skipped })).into_response()
        }
        Err(e) => api_error(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(flatten)]
    pub filters: RetrieveFilters,
}

fn snippet_of(content: &str) -> String {
    let mut snippet: String = content.chars().take(SNIPPET_LIMIT).collect();
    if content.chars().count() > SNIPPET_LIMIT {
        snippet.push('…');
    }
    snippet
}

pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    if request.query.trim().is_empty() {
        return api_error(&Error::validation("query", "must not be empty"));
    }
    match state.rag.retrieve(&request.query, &request.filters).await {
        Ok(retrieval) => {
            let hits: Vec<_> = retrieval
                .hits
                .iter()
                .map(|hit| {
                    json!({
                        "score": hit.score,
                        "title": hit.title,
                        "sourceType": hit.source_type,
                        "chunkIndex": hit.chunk_index,
                        "snippet": snippet_of(&hit.content),
                    })
                })
                .collect();
            Json(json!({
                "query": request.query,
                "contextPreview": retrieval.context,
                "hits": hits,
            }))
            .into_response()
        }
        Err(e) => api_error(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reindex / memories / folders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn reindex(State(state): State<AppState>) -> Response {
    match state.rag.reindex().await {
        Ok(chunks) => Json(json!({ "success": true, "chunks": chunks })).into_response(),
        Err(e) => api_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MemoryRequest {
    pub category: String,
    pub title: String,
    pub content: String,
}

pub async fn add_memory(
    State(state): State<AppState>,
    Json(request): Json<MemoryRequest>,
) -> Response {
    let Some(category) = MemoryCategory::parse(&request.category) else {
        return api_error(&Error::validation(
            "category",
            format!("unknown category: {}", request.category),
        ));
    };
    if request.title.trim().is_empty() || request.content.trim().is_empty() {
        return api_error(&Error::validation("memory", "title and content required"));
    }
    match state
        .rag
        .add_memory(category, &request.title, &request.content)
        .await
    {
        Ok((memory, document)) => {
            Json(json!({ "memory": memory, "document": document })).into_response()
        }
        Err(e) => api_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MemoriesQuery {
    #[serde(default)]
    category: Option<String>,
}

pub async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<MemoriesQuery>,
) -> Response {
    let category = match query.category.as_deref() {
        None => None,
        Some(raw) => match MemoryCategory::parse(raw) {
            Some(category) => Some(category),
            None => {
                return api_error(&Error::validation(
                    "category",
                    format!("unknown category: {raw}"),
                ))
            }
        },
    };
    match state.store.list_memories(category) {
        Ok(memories) => Json(json!({ "memories": memories })).into_response(),
        Err(e) => api_error(&e),
    }
}

pub async fn list_folders(State(state): State<AppState>) -> Response {
    match state.store.list_folders() {
        Ok(folders) => Json(json!({ "folders": folders })).into_response(),
        Err(e) => api_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameFolderRequest {
    pub to: String,
}

pub async fn rename_folder(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RenameFolderRequest>,
) -> Response {
    if request.to.trim().is_empty() {
        return api_error(&Error::validation("to", "must not be empty"));
    }
    match state.store.rename_folder(&name, request.to.trim()) {
        Ok(0) => api_error(&Error::NotFound(format!("folder {name}"))),
        Ok(moved) => Json(json!({ "success": true, "documents": moved })).into_response(),
        Err(e) => api_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteFolderQuery {
    /// `detach` (default) or `cascade`.
    #[serde(default)]
    mode: Option<String>,
}

pub async fn delete_folder(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DeleteFolderQuery>,
) -> Response {
    let cascade = match query.mode.as_deref() {
        None | Some("detach") => false,
        Some("cascade") => true,
        Some(other) => {
            return api_error(&Error::validation("mode", format!("unknown mode: {other}")))
        }
    };
    match state.store.delete_folder(&name, cascade) {
        Ok(affected) => {
            Json(json!({ "success": true, "documents": affected })).into_response()
        }
        Err(e) => api_error(&e),
    }
}
