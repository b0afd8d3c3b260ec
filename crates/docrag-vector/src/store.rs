//! In-memory chunk-id → embedding-vector index with cosine ranking,
//! persisted as a versioned JSON store.
//!
//! The store is stamped with the embedding model identifier and dimension;
//! opening it with a different model or dimension fails with
//! `EmbeddingStoreIncompatible` instead of silently producing garbage
//! similarity scores. Saves go through a temp file + atomic rename so a
//! concurrent reader never observes a partially written store.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use docrag_core::types::{ChunkId, SearchHit, SourceKind};
use docrag_core::{Error, Result};

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredEmbeddings {
    version: u32,
    model_id: String,
    dimension: usize,
    vectors: BTreeMap<ChunkId, Vec<f32>>,
}

#[derive(Debug)]
pub struct SemanticIndex {
    path: PathBuf,
    model_id: String,
    dimension: usize,
    vectors: BTreeMap<ChunkId, Vec<f32>>,
}

impl SemanticIndex {
    /// Create an empty index that will persist to `path`.
    pub fn create(path: &Path, model_id: &str, dimension: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            model_id: model_id.to_string(),
            dimension,
            vectors: BTreeMap::new(),
        }
    }

    /// Load a persisted store, verifying it matches the configured model and
    /// dimension.
    pub fn open(path: &Path, model_id: &str, dimension: usize) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let stored: StoredEmbeddings = serde_json::from_str(&data).map_err(|e| {
            Error::EmbeddingStoreIncompatible(format!("unreadable store {}: {}", path.display(), e))
        })?;
        if stored.version != STORE_VERSION {
            return Err(Error::EmbeddingStoreIncompatible(format!(
                "store version {} (expected {})",
                stored.version, STORE_VERSION
            )));
        }
        if stored.model_id != model_id {
            return Err(Error::EmbeddingStoreIncompatible(format!(
                "store built with model '{}' but '{}' is configured",
                stored.model_id, model_id
            )));
        }
        if stored.dimension != dimension {
            return Err(Error::EmbeddingStoreIncompatible(format!(
                "store dimension {} but {} is configured",
                stored.dimension, dimension
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            model_id: stored.model_id,
            dimension: stored.dimension,
            vectors: stored.vectors,
        })
    }

    /// Open the store at `path` if it exists, otherwise start empty.
    pub fn open_or_create(path: &Path, model_id: &str, dimension: usize) -> Result<Self> {
        if path.exists() {
            Self::open(path, model_id, dimension)
        } else {
            Ok(Self::create(path, model_id, dimension))
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Store the vector for a chunk. The write is whole-vector-or-nothing: a
    /// rejected vector leaves the chunk absent from the index.
    pub fn add(&mut self, chunk_id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.vectors.insert(chunk_id.to_string(), vector);
        Ok(())
    }

    /// Delete vectors by chunk id. Removing an absent id is a no-op.
    pub fn remove(&mut self, chunk_ids: &[ChunkId]) {
        for id in chunk_ids {
            self.vectors.remove(id);
        }
    }

    /// Rank all stored vectors by cosine similarity to `query_vector`,
    /// descending, ties broken by chunk id for determinism.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be >= 1".into()));
        }
        if query_vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }
        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .map(|(id, vector)| SearchHit {
                id: id.clone(),
                score: cosine_similarity(query_vector, vector),
                source: SourceKind::Semantic,
                seq: 0,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn all_ids(&self) -> Vec<ChunkId> {
        self.vectors.keys().cloned().collect()
    }

    /// Persist the store atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let stored = StoredEmbeddings {
            version: STORE_VERSION,
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            vectors: self.vectors.clone(),
        };
        let data = serde_json::to_string_pretty(&stored)
            .map_err(|e| Error::Operation(format!("failed to serialize embedding store: {}", e)))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Operation(format!("failed to persist embedding store: {}", e)))?;
        debug!(count = self.vectors.len(), path = %self.path.display(), "saved embedding store");
        Ok(())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }
}
