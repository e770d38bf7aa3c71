//! Policy-document retrieval: ingest, embed, search, cite.
//!
//! Ingest splits a policy document along its heading hierarchy (see
//! [`chunk`]), embeds each chunk, and stores it with its product code and
//! citation locator. Search embeds the query and returns the top-k chunks
//! by cosine similarity, tie-broken by document order so results are
//! stable. The chunk store is append-mostly; reads take a shared lock.

pub mod chunk;

pub use chunk::{TextChunk, chunk_document};

use crate::{BoxFut, Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

// ── Embedding seam ─────────────────────────────────────────────────

/// Embedding backend. Tests supply a deterministic fake.
pub trait EmbeddingBackend: Send + Sync {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFut<'a, Result<Vec<f32>>>;
}

/// Reqwest-backed embeddings client (`POST {base}/embeddings`).
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tripcover/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::DownstreamUnavailable {
                service: "embeddings",
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl EmbeddingBackend for EmbeddingClient {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFut<'a, Result<Vec<f32>>> {
        Box::pin(async move {
            let body = serde_json::json!({ "model": self.model, "input": text });
            let resp = self
                .http
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::DownstreamUnavailable {
                    service: "embeddings",
                    detail: format!("request failed: {e}"),
                })?;

            let status = resp.status();
            if status.is_server_error() {
                return Err(Error::DownstreamUnavailable {
                    service: "embeddings",
                    detail: format!("HTTP {status}"),
                });
            }
            if !status.is_success() {
                return Err(Error::DownstreamRejected {
                    service: "embeddings",
                    detail: format!("HTTP {status}"),
                });
            }

            let parsed: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| Error::Parse(format!("embeddings response: {e}")))?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|row| row.embedding)
                .ok_or_else(|| Error::Parse("empty embeddings response".into()))
        })
    }
}

// ── Chunk store ────────────────────────────────────────────────────

/// One stored policy chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChunk {
    pub chunk_id: String,
    pub product_code: String,
    pub section_id: String,
    pub heading: String,
    pub text: String,
    pub citation_locator: String,
    pub embedding: Vec<f32>,
    /// Document ordering key for stable tie-breaks.
    pub order: (usize, usize),
}

/// Metadata for an ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: String,
    pub insurer_name: String,
    pub product_code: String,
}

/// A search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub heading: String,
    pub citation_locator: String,
    pub similarity: f32,
}

/// Append-mostly in-memory chunk store.
#[derive(Default)]
pub struct ChunkStore {
    chunks: RwLock<Vec<PolicyChunk>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, mut batch: Vec<PolicyChunk>) {
        if let Ok(mut chunks) = self.chunks.write() {
            chunks.append(&mut batch);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot matching chunks for scoring.
    fn matching(&self, product_code: Option<&str>) -> Vec<PolicyChunk> {
        self.chunks
            .read()
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|chunk| {
                        product_code.is_none_or(|code| chunk.product_code == code)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Cosine similarity of two vectors. Zero when either norm vanishes or
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ── Retriever ──────────────────────────────────────────────────────

/// Ingest + search over the policy corpus.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<ChunkStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, store: Arc<ChunkStore>) -> Self {
        Self { embedder, store }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Chunk, embed, and store one policy document. Returns the chunk
    /// count. Chunks embed concurrently.
    pub async fn ingest(
        &self,
        meta: &DocumentMeta,
        text: &str,
        split_by_sections: bool,
    ) -> Result<usize> {
        let text_chunks = chunk_document(text, split_by_sections);
        let embeddings = futures::future::try_join_all(
            text_chunks
                .iter()
                .map(|text_chunk| self.embedder.embed(&text_chunk.text)),
        )
        .await?;

        let stored: Vec<PolicyChunk> = text_chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text_chunk, embedding)| PolicyChunk {
                chunk_id: format!("chunk-{}", uuid::Uuid::new_v4().simple()),
                product_code: meta.product_code.clone(),
                section_id: text_chunk.section_id,
                heading: text_chunk.heading,
                text: text_chunk.text,
                citation_locator: text_chunk.citation_locator,
                embedding,
                order: text_chunk.order,
            })
            .collect();

        let count = stored.len();
        self.store.append(stored);
        info!(
            "ingested \"{}\" ({}): {count} chunk(s)",
            meta.title, meta.product_code
        );
        Ok(count)
    }

    /// Top-k chunks by cosine similarity, optionally filtered by product
    /// code. Ties break by document order (heading, then chunk within the
    /// heading).
    pub async fn search(
        &self,
        query: &str,
        product_code: Option<&str>,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let query_embedding = self.embedder.embed(query).await?;
        let mut scored: Vec<(f32, PolicyChunk)> = self
            .store
            .matching(product_code)
            .into_iter()
            .map(|chunk| (cosine_similarity(&query_embedding, &chunk.embedding), chunk))
            .collect();

        scored.sort_by(|(sim_a, chunk_a), (sim_b, chunk_b)| {
            sim_b
                .partial_cmp(sim_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(chunk_a.order.cmp(&chunk_b.order))
        });

        debug!(
            "search \"{}\": {} candidate(s), returning {}",
            query,
            scored.len(),
            k.min(scored.len())
        );

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(similarity, chunk)| SearchHit {
                chunk_id: chunk.chunk_id,
                text: chunk.text,
                heading: chunk.heading,
                citation_locator: chunk.citation_locator,
                similarity,
            })
            .collect())
    }
}
