//! File ingestion: parse, chunk, embed, store.

use serde::Deserialize;

use cd_domain::model::{Document, SourceType};
use cd_domain::{Error, Result};

use crate::chunker::{self, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::embed::encode_vector;
use crate::{RagPipeline, EMBED_BATCH};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upload types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One file in an upload batch.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What to do when an upload's title matches an existing document.
/// Matching is case-insensitive equality after trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    #[default]
    Skip,
    Allow,
    Replace,
}

/// Per-item result of a batch upload.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Ingested { document: Document, chunks: usize },
    Skipped { title: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MIME inference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Infer a MIME type from the file extension.
pub fn mime_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("csv") => "text/csv",
        Some("yaml") | Some("yml") => "application/x-yaml",
        _ => "application/octet-stream",
    }
}

fn extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Text extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse file bytes to plain text. PDFs and DOCX go through dedicated
/// parsers; everything else is decoded as UTF-8.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    match extension(file_name).as_deref() {
        Some("pdf") => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| Error::validation("file", format!("unreadable PDF: {e}"))),
        Some("docx") => extract_docx(bytes),
        _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// DOCX is a zip; the body text lives in `word/document.xml`. Paragraph
/// closes become newlines, every other tag is dropped.
fn extract_docx(bytes: &[u8]) -> Result<String> {
    use std::io::Read;

    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| Error::validation("file", format!("unreadable DOCX: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| Error::validation("file", format!("DOCX missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| Error::validation("file", format!("unreadable DOCX body: {e}")))?;

    Ok(strip_xml(&xml))
}

fn strip_xml(xml: &str) -> String {
    let with_breaks = xml.replace("</w:p>", "\n");
    let mut out = String::with_capacity(with_breaks.len());
    let mut in_tag = false;
    for ch in with_breaks.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline ingest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl RagPipeline {
    /// Ingest already-extracted text as one document.
    pub async fn ingest_text(
        &self,
        title: &str,
        text: &str,
        source_type: SourceType,
        mime_type: Option<&str>,
        folder: Option<&str>,
    ) -> Result<Document> {
        self.ingest_prepared(title, text, source_type, None, mime_type, folder)
            .await
    }

    /// Ingest a batch of uploaded files with the duplicate policy applied.
    pub async fn ingest_batch(
        &self,
        items: Vec<UploadItem>,
        folder: Option<&str>,
        if_exists: IfExists,
    ) -> Result<Vec<IngestOutcome>> {
        let mut outcomes = Vec::with_capacity(items.len());
        let mut seen_titles: Vec<String> = Vec::new();

        for item in items {
            let title = item.file_name.clone();
            let normalised = title.trim().to_lowercase();

            // In-batch dedupe applies to the non-`allow` modes.
            if if_exists != IfExists::Allow && seen_titles.contains(&normalised) {
                outcomes.push(IngestOutcome::Skipped { title });
                continue;
            }
            seen_titles.push(normalised);

            let existing = self.store().find_documents_by_title(&title)?;
            match if_exists {
                IfExists::Skip if !existing.is_empty() => {
                    outcomes.push(IngestOutcome::Skipped { title });
                    continue;
                }
                IfExists::Replace => {
                    for doc in &existing {
                        self.store().delete_document(&doc.id)?;
                    }
                }
                _ => {}
            }

            let text = extract_text(&item.file_name, &item.bytes)?;
            let document = self
                .ingest_prepared(
                    &title,
                    &text,
                    SourceType::Upload,
                    Some(&item.file_name),
                    Some(mime_for(&item.file_name)),
                    folder,
                )
                .await?;
            let chunks = self.store().list_chunks(&document.id)?.len();
            outcomes.push(IngestOutcome::Ingested { document, chunks });
        }
        Ok(outcomes)
    }

    async fn ingest_prepared(
        &self,
        title: &str,
        text: &str,
        source_type: SourceType,
        source_uri: Option<&str>,
        mime_type: Option<&str>,
        folder: Option<&str>,
    ) -> Result<Document> {
        let pieces = chunker::chunk_text(text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP);
        if pieces.is_empty() {
            return Err(Error::validation("file", format!("{title}: no text content")));
        }
        let chunk_rows: Vec<(String, i64)> = pieces
            .iter()
            .map(|c| (c.clone(), chunker::estimate_tokens(c)))
            .collect();

        let (document, chunks) = self.store().create_document_with_chunks(
            title,
            source_type,
            source_uri,
            mime_type,
            folder,
            &chunk_rows,
        )?;

        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = match self.embedder().embed(&texts).await {
                Ok(r) => r,
                Err(e) => {
                    // Leave no half-embedded document behind.
                    let _ = self.store().delete_document(&document.id);
                    return Err(e);
                }
            };
            for (chunk, vector) in batch.iter().zip(embedded.vectors.iter()) {
                self.store().upsert_embedding(
                    &chunk.id,
                    &encode_vector(vector),
                    embedded.dim,
                    &embedded.model,
                )?;
            }
        }

        tracing::info!(
            document = %document.id,
            title,
            chunks = chunks.len(),
            "document ingested"
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_table_covers_the_known_extensions() {
        assert_eq!(mime_for("notes.md"), "text/markdown");
        assert_eq!(mime_for("notes.TXT"), "text/plain");
        assert_eq!(mime_for("data.json"), "application/json");
        assert_eq!(mime_for("paper.pdf"), "application/pdf");
        assert_eq!(
            mime_for("report.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(mime_for("rows.csv"), "text/csv");
        assert_eq!(mime_for("conf.yaml"), "application/x-yaml");
        assert_eq!(mime_for("conf.yml"), "application/x-yaml");
        assert_eq!(mime_for("blob.bin"), "application/octet-stream");
        assert_eq!(mime_for("no-extension"), "application/octet-stream");
    }

    #[test]
    fn plain_files_are_utf8_decoded() {
        let text = extract_text("notes.txt", "hello world".as_bytes()).unwrap();
        assert_eq!(text, "hello world");
        // Invalid UTF-8 degrades instead of failing.
        let text = extract_text("notes.txt", &[0x68, 0x69, 0xFF]).unwrap();
        assert!(text.starts_with("hi"));
    }

    #[test]
    fn xml_stripping_keeps_text_and_paragraphs() {
        let xml = "<w:document><w:p><w:r><w:t>first &amp; second</w:t></w:r></w:p>\
                   <w:p><w:r><w:t>third</w:t></w:r></w:p></w:document>";
        let text = strip_xml(xml);
        assert!(text.contains("first & second"));
        assert!(text.contains('\n'));
        assert!(text.contains("third"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn garbage_pdf_is_a_validation_error() {
        let err = extract_text("paper.pdf", b"not a pdf at all").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn garbage_docx_is_a_validation_error() {
        let err = extract_text("report.docx", b"not a zip").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
