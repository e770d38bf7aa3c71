//! Bounded worker pool for OCR, LLM, and embedding jobs.
//!
//! Heavy external work runs through one shared semaphore so a burst of
//! uploads, extractions, or questions cannot saturate the event loop. The
//! wrappers implement the same backend traits they gate, so the pipeline,
//! extractor, and retriever stay pool-unaware. Permits are held only for
//! the duration of a single backend call, never across nested calls.

use crate::docs::{DocumentBlob, OcrEngine, OcrResult};
use crate::rag::EmbeddingBackend;
use crate::{BoxFut, ChatRequest, Error, LlmBackend, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

fn pool_closed() -> Error {
    Error::DownstreamUnavailable {
        service: "worker_pool",
        detail: "worker pool closed".into(),
    }
}

/// LLM backend gated by the worker pool.
pub(crate) struct PooledLlm {
    inner: Arc<dyn LlmBackend>,
    workers: Arc<Semaphore>,
}

impl PooledLlm {
    pub(crate) fn new(inner: Arc<dyn LlmBackend>, workers: Arc<Semaphore>) -> Self {
        Self { inner, workers }
    }
}

impl LlmBackend for PooledLlm {
    fn complete(&self, request: ChatRequest) -> BoxFut<'_, Result<String>> {
        Box::pin(async move {
            let _permit = self.workers.acquire().await.map_err(|_| pool_closed())?;
            self.inner.complete(request).await
        })
    }
}

/// OCR engine gated by the worker pool.
pub(crate) struct PooledOcr {
    inner: Arc<dyn OcrEngine>,
    workers: Arc<Semaphore>,
}

impl PooledOcr {
    pub(crate) fn new(inner: Arc<dyn OcrEngine>, workers: Arc<Semaphore>) -> Self {
        Self { inner, workers }
    }
}

impl OcrEngine for PooledOcr {
    fn recognize<'a>(&'a self, blob: &'a DocumentBlob) -> BoxFut<'a, Result<OcrResult>> {
        Box::pin(async move {
            let _permit = self.workers.acquire().await.map_err(|_| pool_closed())?;
            self.inner.recognize(blob).await
        })
    }
}

/// Embedding backend gated by the worker pool.
pub(crate) struct PooledEmbedder {
    inner: Arc<dyn EmbeddingBackend>,
    workers: Arc<Semaphore>,
}

impl PooledEmbedder {
    pub(crate) fn new(inner: Arc<dyn EmbeddingBackend>, workers: Arc<Semaphore>) -> Self {
        Self { inner, workers }
    }
}

impl EmbeddingBackend for PooledEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFut<'a, Result<Vec<f32>>> {
        Box::pin(async move {
            let _permit = self.workers.acquire().await.map_err(|_| pool_closed())?;
            self.inner.embed(text).await
        })
    }
}
