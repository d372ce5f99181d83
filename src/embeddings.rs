//! Text embedding with model/dimension provenance.
//!
//! `OpenAiEmbedder` calls the hosted embeddings endpoint in batches with
//! bounded retry; `HashEmbedder` is the deterministic fallback used when no
//! LLM credential is configured, so retrieval and lesson dedup keep working
//! in degraded form.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PrismError, PrismResult};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const MAX_EMBED_ATTEMPTS: u32 = 8;

/// A single embedding plus the provenance needed to compare vectors later.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
}

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts. Result order matches input order; every vector
    /// has exactly `dimensions()` components.
    async fn embed_batch(&self, texts: &[String]) -> PrismResult<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> PrismResult<EmbeddingResult> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| PrismError::Embedding("empty embedding batch response".to_string()))?;
        Ok(EmbeddingResult {
            vector,
            model: self.model().to_string(),
            dimensions: self.dimensions(),
        })
    }
}

/// The embedding input for a lesson: title, content, and rationale joined by
/// blank lines, with empty parts dropped.
pub fn compose_lesson_embedding_text(title: &str, content: &str, rationale: &str) -> String {
    [title, content, rationale]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── OpenAI embedder ─────────────────────────────────────────────────────

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimensions: usize) -> PrismResult<Self> {
        if api_key.is_empty() {
            return Err(PrismError::Configuration(
                "OPENAI_API_KEY is required for the OpenAI embedder".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            dimensions,
        })
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> PrismResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            let retryable = match &response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    matches!(status, 429 | 500 | 502 | 503 | 504)
                }
                Err(_) => true,
            };

            if retryable && attempt < MAX_EMBED_ATTEMPTS {
                let sleep_s =
                    (2u64.pow(attempt - 1).min(60)) as f64 + rand::thread_rng().gen::<f64>();
                warn!(attempt, sleep_s, "embedding batch failed, retrying");
                tokio::time::sleep(Duration::from_secs_f64(sleep_s)).await;
                continue;
            }

            let resp = response?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                let excerpt: String = text.chars().take(500).collect();
                return Err(PrismError::UpstreamSemantic(format!(
                    "embeddings HTTP {status}: {excerpt}"
                )));
            }

            let payload: EmbeddingsResponse = resp.json().await?;
            if payload.data.len() != texts.len() {
                return Err(PrismError::Embedding(format!(
                    "unexpected embeddings response shape: {} items for {} inputs",
                    payload.data.len(),
                    texts.len()
                )));
            }
            let mut out = Vec::with_capacity(payload.data.len());
            for item in payload.data {
                if item.embedding.len() != self.dimensions {
                    return Err(PrismError::Embedding(format!(
                        "embedding dims mismatch: expected {}, got {}",
                        self.dimensions,
                        item.embedding.len()
                    )));
                }
                out.push(item.embedding);
            }
            debug!(batch = texts.len(), "embedded batch");
            return Ok(out);
        }
    }
}

// ── Deterministic fallback ──────────────────────────────────────────────

/// Hashed bag-of-tokens embedder. Stable across runs, so `source_hash`
/// bookkeeping and duplicate detection behave exactly as with a hosted model.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
                as usize
                % self.dimensions;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        "hash-bow-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> PrismResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Pick the embedder for the current configuration: OpenAI when a credential
/// is present, the deterministic fallback otherwise.
pub fn embedder_from_config(config: &crate::AppConfig) -> PrismResult<Box<dyn Embedder>> {
    match &config.openai_api_key {
        Some(key) => Ok(Box::new(OpenAiEmbedder::new(
            key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        )?)),
        None => Ok(Box::new(HashEmbedder::new(config.embedding_dimensions))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_one("redis cache timeout").await.unwrap();
        let b = embedder.embed_one("redis cache timeout").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.dimensions, 64);
        let norm: f32 = a.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn related_texts_are_closer_than_unrelated() {
        let embedder = HashEmbedder::new(256);
        let base = embedder.embed_one("redis connection timeout").await.unwrap();
        let near = embedder.embed_one("timeout connecting to redis").await.unwrap();
        let far = embedder.embed_one("tokio async runtime panic").await.unwrap();
        let dist = |a: &[f32], b: &[f32]| -> f32 {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt()
        };
        assert!(dist(&base.vector, &near.vector) < dist(&base.vector, &far.vector));
    }

    #[test]
    fn lesson_embedding_text_drops_empty_parts() {
        assert_eq!(
            compose_lesson_embedding_text("Title", "", "Why"),
            "Title\n\nWhy"
        );
        assert_eq!(compose_lesson_embedding_text(" ", "Body", ""), "Body");
    }
}
