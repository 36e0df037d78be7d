//! Top-K cosine retrieval and context rendering.

use serde::{Deserialize, Serialize};

use cd_domain::model::SourceType;
use cd_domain::Result;

use crate::embed::{cosine_similarity, decode_vector};
use crate::RagPipeline;

pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_MIN_SCORE: f32 = 0.35;

/// Filters narrowing the candidate set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveFilters {
    /// Exact document id set.
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    /// Case-insensitive substring match over titles, applied post-load.
    #[serde(default)]
    pub doc_titles: Option<Vec<String>>,
    /// Folder equality.
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

/// One scored retrieval hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedHit {
    pub score: f32,
    pub title: String,
    pub source_type: SourceType,
    pub chunk_index: i64,
    pub content: String,
    pub document_id: String,
}

/// Retrieval output: scored hits plus the rendered context block, absent
/// when nothing cleared the score floor.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub hits: Vec<RetrievedHit>,
    pub context: Option<String>,
}

impl RagPipeline {
    /// Embed `query`, score all candidate chunks, and keep the best.
    pub async fn retrieve(&self, query: &str, filters: &RetrieveFilters) -> Result<Retrieval> {
        let top_k = filters.top_k.unwrap_or(DEFAULT_TOP_K);
        let min_score = filters.min_score.unwrap_or(DEFAULT_MIN_SCORE);

        let embedded = self.embedder().embed(&[query.to_owned()]).await?;
        let query_vector = match embedded.vectors.first() {
            Some(v) if !v.is_empty() => v.clone(),
            _ => return Ok(Retrieval { hits: Vec::new(), context: None }),
        };

        let candidates = self
            .store()
            .candidate_chunks(filters.doc_ids.as_deref(), filters.folder.as_deref())?;

        let title_needles: Option<Vec<String>> = filters
            .doc_titles
            .as_ref()
            .map(|ts| ts.iter().map(|t| t.trim().to_lowercase()).collect());

        let mut hits: Vec<RetrievedHit> = candidates
            .into_iter()
            .filter(|c| match &title_needles {
                Some(needles) => {
                    let title = c.title.to_lowercase();
                    needles.iter().any(|n| title.contains(n.as_str()))
                }
                None => true,
            })
            .filter_map(|c| {
                let vector = decode_vector(&c.vector);
                let score = cosine_similarity(&query_vector, &vector);
                (score >= min_score).then(|| RetrievedHit {
                    score,
                    title: c.title,
                    source_type: c.source_type,
                    chunk_index: c.chunk_index,
                    content: c.content,
                    document_id: c.document_id,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        let context = render_context(&hits);
        Ok(Retrieval { hits, context })
    }
}

/// Render the context block injected into system prompts.
pub fn render_context(hits: &[RetrievedHit]) -> Option<String> {
    if hits.is_empty() {
        return None;
    }
    let mut out = String::from("Relevant Context (RAG):");
    for hit in hits {
        out.push_str(&format!(
            "\n- [{} | {} | chunk #{}] {}",
            hit.title,
            hit.source_type.as_str(),
            hit.chunk_index,
            hit.content
        ));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, index: i64, content: &str) -> RetrievedHit {
        RetrievedHit {
            score: 0.9,
            title: title.into(),
            source_type: SourceType::Upload,
            chunk_index: index,
            content: content.into(),
            document_id: "d".into(),
        }
    }

    #[test]
    fn context_format_is_stable() {
        let rendered = render_context(&[
            hit("guide.md", 0, "alpha beta"),
            hit("guide.md", 3, "gamma"),
        ])
        .unwrap();
        assert!(rendered.starts_with("Relevant Context (RAG):\n"));
        assert!(rendered.contains("- [guide.md | upload | chunk #0] alpha beta"));
        assert!(rendered.contains("- [guide.md | upload | chunk #3] gamma"));
    }

    #[test]
    fn no_hits_means_no_context() {
        assert!(render_context(&[]).is_none());
    }
}
