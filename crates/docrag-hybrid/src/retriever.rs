//! Query-time retrieval: strategy dispatch, candidate fusion, ranking.
//!
//! The lexical and semantic indexes are queried read-only, so any number of
//! `retrieve` calls may run concurrently against the same opened handles.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use docrag_core::traits::Embedder;
use docrag_core::types::{ChunkId, RetrievalResult, RetrievedChunk, SearchHit, Strategy};
use docrag_core::{Error, Result};
use docrag_text::LexicalIndex;
use docrag_vector::SemanticIndex;

use crate::tracker::{embeddings_path, lexical_dir};

/// Hybrid queries fetch this multiple of `top_k` from each side so fusion
/// has room to reorder.
pub const CANDIDATE_POOL_MULTIPLIER: usize = 3;

pub struct HybridRetriever {
    lexical: LexicalIndex,
    semantic: Option<SemanticIndex>,
    embedder: Option<Box<dyn Embedder>>,
    default_alpha: f32,
}

impl HybridRetriever {
    pub fn new(
        lexical: LexicalIndex,
        semantic: Option<SemanticIndex>,
        embedder: Option<Box<dyn Embedder>>,
        default_alpha: f32,
    ) -> Result<Self> {
        validate_alpha(default_alpha)?;
        Ok(Self { lexical, semantic, embedder, default_alpha })
    }

    /// Open the persisted indexes under `index_dir` for querying. A missing
    /// embedding store leaves the semantic side unavailable; an incompatible
    /// one is logged and likewise degrades to lexical-only until rebuilt.
    pub fn open(
        index_dir: &Path,
        embedder: Option<Box<dyn Embedder>>,
        default_alpha: f32,
    ) -> Result<Self> {
        validate_alpha(default_alpha)?;
        let lexical = LexicalIndex::open_or_create(&lexical_dir(index_dir))?;
        let semantic = match &embedder {
            Some(e) => {
                let path = embeddings_path(index_dir);
                if path.exists() {
                    match SemanticIndex::open(&path, e.id(), e.dim()) {
                        Ok(store) => Some(store),
                        Err(Error::EmbeddingStoreIncompatible(msg)) => {
                            warn!(reason = %msg, "embedding store incompatible, semantic search disabled");
                            None
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    None
                }
            }
            None => None,
        };
        Ok(Self { lexical, semantic, embedder, default_alpha })
    }

    fn semantic_ready(&self) -> bool {
        self.semantic.is_some() && self.embedder.is_some()
    }

    /// Retrieve the `top_k` most relevant chunks for `query`.
    ///
    /// `alpha` is the weight on the lexical score in hybrid fusion; `Auto`
    /// classifies the query first and uses the configured default alpha when
    /// it routes to hybrid.
    pub fn retrieve(
        &self,
        query: &str,
        strategy: Strategy,
        alpha: f32,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be >= 1".into()));
        }
        validate_alpha(alpha)?;

        match strategy {
            Strategy::Lexical => self.lexical_only(query, top_k),
            Strategy::Semantic => self.semantic_only(query, top_k),
            Strategy::Hybrid => {
                if self.semantic_ready() {
                    self.fused(query, alpha, top_k)
                } else {
                    warn!("semantic index unavailable, answering hybrid query lexically");
                    self.lexical_only(query, top_k)
                }
            }
            Strategy::Auto => {
                if !self.semantic_ready() {
                    return self.lexical_only(query, top_k);
                }
                match classify_query(query) {
                    QueryClass::CodeLike => {
                        debug!(query, "auto strategy routed code-like query to lexical");
                        self.lexical_only(query, top_k)
                    }
                    QueryClass::Interrogative | QueryClass::Natural => {
                        self.fused(query, self.default_alpha, top_k)
                    }
                }
            }
        }
    }

    fn lexical_only(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let hits = self.lexical.search(query, top_k)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = self.lexical.get(&hit.id)? else {
                continue;
            };
            results.push(RetrievalResult {
                chunk,
                lexical_score: Some(hit.score),
                semantic_score: None,
                fused_score: hit.score,
                rank: results.len() + 1,
            });
        }
        Ok(results)
    }

    fn semantic_only(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let (Some(semantic), Some(embedder)) = (&self.semantic, &self.embedder) else {
            return Err(Error::SemanticIndexUnavailable);
        };
        let query_vector = embed_query(embedder.as_ref(), query)?;
        let hits = semantic.search(&query_vector, top_k)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = self.lexical.get(&hit.id)? else {
                warn!(id = %hit.id, "semantic hit missing from lexical index, dropping");
                continue;
            };
            results.push(RetrievalResult {
                chunk,
                lexical_score: None,
                semantic_score: Some(hit.score),
                fused_score: hit.score,
                rank: results.len() + 1,
            });
        }
        Ok(results)
    }

    fn fused(&self, query: &str, alpha: f32, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let (Some(semantic), Some(embedder)) = (&self.semantic, &self.embedder) else {
            return Err(Error::SemanticIndexUnavailable);
        };
        let pool = top_k.saturating_mul(CANDIDATE_POOL_MULTIPLIER);

        let lexical_hits = self.lexical.search(query, pool)?;
        let query_vector = embed_query(embedder.as_ref(), query)?;
        let semantic_hits = semantic.search(&query_vector, pool)?;

        let lexical_norms = min_max_normalize(&lexical_hits);
        let semantic_norms = min_max_normalize(&semantic_hits);

        #[derive(Default)]
        struct Candidate {
            lexical_raw: Option<f32>,
            lexical_norm: f32,
            lexical_rank: Option<usize>,
            semantic_raw: Option<f32>,
            semantic_norm: f32,
        }

        let mut candidates: BTreeMap<ChunkId, Candidate> = BTreeMap::new();
        for (rank, (hit, norm)) in lexical_hits.iter().zip(&lexical_norms).enumerate() {
            let entry = candidates.entry(hit.id.clone()).or_default();
            entry.lexical_raw = Some(hit.score);
            entry.lexical_norm = *norm;
            entry.lexical_rank = Some(rank);
        }
        for (hit, norm) in semantic_hits.iter().zip(&semantic_norms) {
            let entry = candidates.entry(hit.id.clone()).or_default();
            entry.semantic_raw = Some(hit.score);
            entry.semantic_norm = *norm;
        }

        let mut ranked: Vec<(ChunkId, Candidate, f32)> = candidates
            .into_iter()
            .map(|(id, c)| {
                let fused = alpha * c.lexical_norm + (1.0 - alpha) * c.semantic_norm;
                (id, c, fused)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = a.1.lexical_rank.unwrap_or(usize::MAX);
                    let rb = b.1.lexical_rank.unwrap_or(usize::MAX);
                    ra.cmp(&rb)
                })
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        let mut results = Vec::with_capacity(ranked.len());
        for (id, candidate, fused) in ranked {
            let Some(chunk) = self.lexical.get(&id)? else {
                warn!(id = %id, "fused hit missing from lexical index, dropping");
                continue;
            };
            results.push(RetrievalResult {
                chunk,
                lexical_score: candidate.lexical_raw,
                semantic_score: candidate.semantic_raw,
                fused_score: fused,
                rank: results.len() + 1,
            });
        }
        Ok(results)
    }

    /// Hydrate one chunk by id, for callers presenting results.
    pub fn get_chunk(&self, id: &str) -> Result<Option<RetrievedChunk>> {
        self.lexical.get(id)
    }
}

fn embed_query(embedder: &dyn Embedder, query: &str) -> Result<Vec<f32>> {
    embedder
        .embed_batch(&[query.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("embedder returned no vector for query".into()))
}

fn validate_alpha(alpha: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::InvalidConfig(format!(
            "alpha ({}) must be within [0.0, 1.0]",
            alpha
        )));
    }
    Ok(())
}

// Min-max scale the scores of one candidate set to [0, 1]. A set whose
// scores are all equal (including a singleton) maps to 1.0 so the side still
// contributes its weight. Normalization is per retrieved pool, not corpus
// wide; see DESIGN.md for the recorded outlier caveat.
fn min_max_normalize(hits: &[SearchHit]) -> Vec<f32> {
    if hits.is_empty() {
        return Vec::new();
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for hit in hits {
        min = min.min(hit.score);
        max = max.max(hit.score);
    }
    if max > min {
        hits.iter().map(|h| (h.score - min) / (max - min)).collect()
    } else {
        vec![1.0; hits.len()]
    }
}

/// Coarse shape of a query, used by the `Auto` strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    /// Contains code-like tokens (`::`, `()`, snake_case, CamelCase, paths).
    CodeLike,
    /// Natural-language question.
    Interrogative,
    /// Any other natural-language query.
    Natural,
}

/// Classify a query for strategy selection. Exact identifiers search best
/// lexically; natural-language questions benefit from the semantic side.
pub fn classify_query(query: &str) -> QueryClass {
    if query.contains("::") || query.contains("()") {
        return QueryClass::CodeLike;
    }
    if query.chars().any(|c| matches!(c, '(' | ')' | '{' | '}' | ';')) {
        return QueryClass::CodeLike;
    }
    for token in query.split_whitespace() {
        let token = token.trim_matches(|c: char| matches!(c, ',' | '.' | '?' | '!' | '"' | '\''));
        if token.len() > 1 && token.contains('_') {
            return QueryClass::CodeLike;
        }
        if token.contains('/') && token.contains('.') {
            return QueryClass::CodeLike;
        }
        if is_camel_case(token) {
            return QueryClass::CodeLike;
        }
    }

    let first = query
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    let interrogative = matches!(
        first.as_str(),
        "how" | "what" | "why" | "when" | "where" | "which" | "who" | "can" | "does" | "is" | "are"
    );
    if interrogative || query.trim_end().ends_with('?') {
        QueryClass::Interrogative
    } else {
        QueryClass::Natural
    }
}

// Mixed-case single token, e.g. `HashMap` or `topK`; a leading capital on an
// otherwise lowercase word does not count.
fn is_camel_case(token: &str) -> bool {
    token.chars().all(char::is_alphanumeric)
        && token.chars().any(|c| c.is_ascii_lowercase())
        && token.chars().skip(1).any(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::types::SourceKind;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit { id: id.to_string(), score, source: SourceKind::Lexical, seq: 0 }
    }

    #[test]
    fn min_max_scales_into_unit_interval() {
        let hits = vec![hit("a", 10.0), hit("b", 5.0), hit("c", 0.0)];
        let norms = min_max_normalize(&hits);
        assert_eq!(norms, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn all_equal_scores_normalize_to_one() {
        let hits = vec![hit("a", 3.0), hit("b", 3.0)];
        assert_eq!(min_max_normalize(&hits), vec![1.0, 1.0]);
        let single = vec![hit("a", 7.5)];
        assert_eq!(min_max_normalize(&single), vec![1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn code_like_queries_are_detected() {
        assert_eq!(classify_query("Chunker::derive_id"), QueryClass::CodeLike);
        assert_eq!(classify_query("spawn() panics"), QueryClass::CodeLike);
        assert_eq!(classify_query("max_tokens setting"), QueryClass::CodeLike);
        assert_eq!(classify_query("src/retriever.rs logic"), QueryClass::CodeLike);
        assert_eq!(classify_query("HashMap iteration order"), QueryClass::CodeLike);
    }

    #[test]
    fn natural_language_queries_are_not_code_like() {
        assert_eq!(classify_query("how do I install this?"), QueryClass::Interrogative);
        assert_eq!(classify_query("what is chunk overlap"), QueryClass::Interrogative);
        assert_eq!(classify_query("configuring the server"), QueryClass::Natural);
        assert_eq!(classify_query("Getting started guide"), QueryClass::Natural);
    }
}
