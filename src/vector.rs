//! Vector index abstraction for knowledge-base-wide and repository search.
//!
//! [`VectorIndex`] is the opaque nearest-neighbor lookup the orchestrator
//! consumes. [`InMemoryVectorIndex`] is a brute-force implementation over
//! pre-embedded chunks, used in tests and for small local deployments. The
//! chunk file it loads is produced by the offline ingestion jobs:
//!
//! ```json
//! [
//!   { "collection": "knowledge_base", "text": "...", "source": "Wiki",
//!     "page": 3, "embedding": [0.12, -0.04, ...] }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ProviderError, Result};
use crate::provider::Embedder;

/// One ranked hit from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub text: String,
    pub source: Option<String>,
    pub page: Option<u32>,
    /// Higher is better; callers clamp into `[0, 1]`.
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` hits from `collection`, best first.
    async fn search(&self, collection: &str, query: &str, k: usize)
        -> std::result::Result<Vec<VectorHit>, ProviderError>;
}

/// A pre-embedded chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedChunk {
    pub collection: String,
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    pub embedding: Vec<f32>,
}

/// Brute-force cosine similarity over chunks held in memory.
pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Vec<IndexedChunk>>>,
}

impl InMemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Load chunks from a JSON array file.
    pub fn load_json(embedder: Arc<dyn Embedder>, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let chunks: Vec<IndexedChunk> = serde_json::from_str(&content)?;
        let index = Self::new(embedder);
        let count = chunks.len();
        for chunk in chunks {
            index.insert(chunk);
        }
        tracing::info!(path = %path.display(), chunks = count, "loaded vector index");
        Ok(index)
    }

    pub fn insert(&self, chunk: IndexedChunk) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        collections
            .entry(chunk.collection.clone())
            .or_default()
            .push(chunk);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> std::result::Result<Vec<VectorHit>, ProviderError> {
        if self.len(collection) == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;

        let collections = self
            .collections
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(chunks) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = chunks
            .iter()
            .map(|c| VectorHit {
                text: c.text.clone(),
                source: c.source.clone(),
                page: c.page,
                score: cosine_similarity(&query_vec, &c.embedding) as f64,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
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

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
