//! Retrieval-augmented-generation pipeline.
//!
//! Ingests files into documents + chunks + embeddings, serves top-K
//! cosine retrieval over the stored vectors, and mirrors memory notes
//! into the same corpus so one retrieval path covers both.

pub mod chunker;
pub mod embed;
pub mod ingest;
pub mod retrieve;

use cd_domain::model::{Document, Memory, MemoryCategory};
use cd_domain::Result;
use cd_store::Store;

pub use embed::{EmbedClient, EmbedHealth};
pub use ingest::{IfExists, IngestOutcome, UploadItem};
pub use retrieve::{RetrieveFilters, Retrieval, RetrievedHit};

/// Chunks per embedding call during ingest and reindex.
pub const EMBED_BATCH: usize = 50;

/// The pipeline: store + embedding service client.
#[derive(Clone)]
pub struct RagPipeline {
    store: Store,
    embedder: EmbedClient,
}

impl RagPipeline {
    pub fn new(store: Store, embedder: EmbedClient) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn embedder(&self) -> &EmbedClient {
        &self.embedder
    }

    /// Persist a memory note and its mirror document, then chunk + embed
    /// the mirror so the memory is retrievable like any upload.
    pub async fn add_memory(
        &self,
        category: MemoryCategory,
        title: &str,
        content: &str,
    ) -> Result<(Memory, Document)> {
        let memory = self.store.insert_memory(category, title, content)?;
        let mirror_title = format!("Memory: {title}");
        let doc = self
            .ingest_text(&mirror_title, content, cd_domain::model::SourceType::Manual, None, None)
            .await?;
        Ok((memory, doc))
    }

    /// Re-embed every chunk in the corpus, replacing stored vectors.
    /// Returns the number of chunks processed.
    pub async fn reindex(&self) -> Result<usize> {
        let chunks = self.store.list_all_chunks()?;
        let mut done = 0;
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            for (chunk, vector) in batch.iter().zip(embedded.vectors.iter()) {
                self.store.upsert_embedding(
                    &chunk.id,
                    &embed::encode_vector(vector),
                    embedded.dim,
                    &embedded.model,
                )?;
            }
            done += batch.len();
        }
        tracing::info!(chunks = done, "reindex complete");
        Ok(done)
    }
}
