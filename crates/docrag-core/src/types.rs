//! Domain types shared by the lexical and semantic engines.

use serde::{Deserialize, Serialize};

pub type ChunkId = String;

/// A chunk of a source document that is independently indexed.
///
/// - `id`: stable chunk identifier, derived from `(source_path, position, text)`
/// - `source_path`: path of the source document, relative to the docs root
/// - `heading`: nearest preceding heading, when the document has one
/// - `position`: ordinal of the chunk within its document
/// - `text`: the text payload of the chunk
/// - `token_count`: number of whitespace tokens in `text`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_path: String,
    pub heading: Option<String>,
    pub position: usize,
    pub text: String,
    pub token_count: usize,
}

impl Chunk {
    /// Derive the stable id for a chunk. Unchanged content re-indexed later
    /// produces the same id; changed content produces a different one.
    pub fn derive_id(source_path: &str, position: usize, text: &str) -> ChunkId {
        let digest = blake3::hash(text.as_bytes()).to_hex();
        format!("{}:{}:{}", source_path, position, &digest[..16])
    }
}

/// Indicates which engine produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Lexical,
    Semantic,
}

/// The minimal surface returned by both engines.
///
/// `id` matches `Chunk::id`. `score` is engine-specific but higher is always
/// better: raw BM25 for the lexical side, cosine similarity for the semantic
/// side. `seq` is the lexical insertion ordinal used for deterministic
/// tie-breaking; the semantic engine reports 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
    pub seq: u64,
}

/// A document handed to a build pass. Discovery (walking a docs directory)
/// happens upstream; the engine only sees path + already-normalized text.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub text: String,
}

/// Chunk payload hydrated from the lexical index's stored fields when
/// assembling query results.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub source_path: String,
    pub heading: Option<String>,
    pub position: usize,
    pub text: String,
}

/// One ranked entry of a retrieval response. Transient, never persisted.
///
/// `lexical_score`/`semantic_score` are the raw per-engine scores and are
/// absent when the corresponding engine did not see the chunk. `rank` is the
/// 1-based position after fusion.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: RetrievedChunk,
    pub lexical_score: Option<f32>,
    pub semantic_score: Option<f32>,
    pub fused_score: f32,
    pub rank: usize,
}

/// Retrieval strategy. A closed set: every query goes through exactly one of
/// these, and match arms stay exhaustive when a variant is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Lexical,
    Semantic,
    Hybrid,
    Auto,
}

impl std::str::FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lexical" | "bm25" => Ok(Strategy::Lexical),
            "semantic" => Ok(Strategy::Semantic),
            "hybrid" => Ok(Strategy::Hybrid),
            "auto" => Ok(Strategy::Auto),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown strategy '{}' (expected lexical|semantic|hybrid|auto)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Lexical => "lexical",
            Strategy::Semantic => "semantic",
            Strategy::Hybrid => "hybrid",
            Strategy::Auto => "auto",
        };
        f.write_str(s)
    }
}

/// Content hash used for document-level change detection.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
