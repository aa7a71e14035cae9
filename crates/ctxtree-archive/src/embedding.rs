//! Sentence embedding models for the archive's dense-vector index.
//!
//! A fixed sentence-embedding function, deterministic for identical
//! inputs, is required so archive search results are reproducible.
//! `FastEmbedModel` wraps `fastembed`'s local ONNX runtime (no network
//! calls at query time). `HashEmbedModel` is a dependency-free
//! deterministic fallback used in tests and when no ONNX model is
//! available — real query-time relevance is not expected from it, only
//! the determinism and dimension-stability contracts.

use async_trait::async_trait;

use crate::error::{ArchiveError, Result};
use crate::types::DEFAULT_EMBEDDING_DIM;

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Stable name — stored alongside a collection so mixing two models'
    /// output in one collection can be rejected.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

/// Local ONNX sentence embedder via `fastembed`. Loads the model once at
/// construction; `embed` calls never touch the network.
pub struct FastEmbedModel {
    inner: std::sync::Mutex<fastembed::TextEmbedding>,
    name: String,
    dimension: usize,
}

impl FastEmbedModel {
    pub fn new(model_name: &str) -> Result<Self> {
        let embedding_model = match model_name {
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            other => {
                return Err(ArchiveError::Embedding(format!(
                    "unsupported embedding model: {other}"
                )))
            }
        };

        let inner = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(embedding_model).with_show_download_progress(false),
        )
        .map_err(|e| ArchiveError::Embedding(e.to_string()))?;

        Ok(Self {
            inner: std::sync::Mutex::new(inner),
            name: model_name.to_string(),
            dimension: DEFAULT_EMBEDDING_DIM,
        })
    }
}

#[async_trait]
impl EmbeddingModel for FastEmbedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_string();
        let inner = self.inner.lock().expect("fastembed model lock poisoned");
        let mut vectors = inner
            .embed(vec![text], None)
            .map_err(|e| ArchiveError::Embedding(e.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| ArchiveError::Embedding("fastembed returned no vector".to_string()))
    }
}

/// Deterministic, dependency-free fallback embedder. Hashes overlapping
/// character shingles into a fixed-width vector and L2-normalizes it —
/// enough to exercise the archive's storage and filtering logic without
/// an ONNX runtime, not a relevance guarantee.
pub struct HashEmbedModel {
    dimension: usize,
}

impl HashEmbedModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedModel {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbedModel {
    fn name(&self) -> &str {
        "hash-fallback"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0f32; self.dimension];
        let lower = text.to_lowercase();
        let bytes = lower.as_bytes();
        const SHINGLE: usize = 3;

        if bytes.len() < SHINGLE {
            let idx = fnv1a(bytes) as usize % self.dimension;
            v[idx] += 1.0;
        } else {
            for window in bytes.windows(SHINGLE) {
                let idx = fnv1a(window) as usize % self.dimension;
                v[idx] += 1.0;
            }
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
