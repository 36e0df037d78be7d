//! Client for the external embedding service, plus vector codecs.
//!
//! The service accepts `POST { "texts": [..] }` and returns
//! `{ "vectors": [[f32,..]], "dim": n, "model": name }`. Stored vectors
//! are little-endian IEEE-754 f32 byte buffers.

use serde::Deserialize;
use serde_json::json;

use cd_domain::{Error, Result};

pub const EMBED_URL_ENV: &str = "RAG_EMBED_URL";
pub const DEFAULT_EMBED_URL: &str = "http://127.0.0.1:7999/embed";

const EMBED_TIMEOUT_SECS: u64 = 60;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
    pub dim: i64,
    pub model: String,
}

/// Health of the embedding service as reported by `/api/health`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedHealth {
    pub available: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct EmbedClient {
    http: reqwest::Client,
    url: String,
}

impl EmbedClient {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(EMBED_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
        }
    }

    /// Resolve the service URL from `RAG_EMBED_URL`, falling back to the
    /// local default.
    pub fn from_env() -> Self {
        let url = std::env::var(EMBED_URL_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_EMBED_URL.to_owned());
        Self::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Embed a batch of texts. Any transport or shape failure surfaces as
    /// `EXTERNAL_UNAVAILABLE` so callers can map it to 503.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbedResponse> {
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "texts": texts }))
            .send()
            .await
            .map_err(|e| Error::ExternalUnavailable(format!("embed service: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ExternalUnavailable(format!(
                "embed service returned HTTP {} - {body}",
                status.as_u16()
            )));
        }

        resp.json::<EmbedResponse>()
            .await
            .map_err(|e| Error::ExternalUnavailable(format!("embed service response: {e}")))
    }

    /// Probe reachability. Any HTTP response counts as available; only a
    /// transport failure does not.
    pub async fn health(&self) -> EmbedHealth {
        match self.http.post(&self.url).json(&json!({ "texts": [] })).send().await {
            Ok(_) => EmbedHealth {
                available: true,
                url: self.url.clone(),
                error: None,
            },
            Err(e) => EmbedHealth {
                available: false,
                url: self.url.clone(),
                error: Some(e.to_string()),
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vector codec + similarity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encode a vector as little-endian f32 bytes.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for value in v {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode little-endian f32 bytes. Trailing partial floats are dropped.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Naive cosine similarity; 0 when either norm is 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_codec_is_bit_exact() {
        let v = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE, 12345.678];
        let decoded = decode_vector(&encode_vector(&v));
        assert_eq!(v, decoded);
    }

    #[test]
    fn decode_drops_trailing_partial_floats() {
        let mut bytes = encode_vector(&[1.0, 2.0]);
        bytes.push(0xFF);
        assert_eq!(decode_vector(&bytes), vec![1.0, 2.0]);
    }

    #[test]
    fn cosine_of_self_is_one() {
        let v = vec![0.3f32, -0.7, 0.64, 0.11];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_zero_norm_returns_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn env_fallback_uses_the_local_default() {
        // Not setting the env var in-process; just check the constant.
        assert_eq!(DEFAULT_EMBED_URL, "http://127.0.0.1:7999/embed");
    }
}
