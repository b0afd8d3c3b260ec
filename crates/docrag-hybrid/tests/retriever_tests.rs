use std::path::Path;
use tempfile::TempDir;

use docrag_core::config::ChunkingSettings;
use docrag_core::traits::Embedder;
use docrag_core::types::{SourceDocument, Strategy};
use docrag_core::{Error, Result};
use docrag_embed::HashEmbedder;
use docrag_hybrid::{HybridRetriever, IndexBuilder};

const DIM: usize = 64;
const MODEL: &str = "hash-xx64:d64";

fn doc(path: &str, text: &str) -> SourceDocument {
    SourceDocument { path: path.to_string(), text: text.to_string() }
}

fn corpus() -> Vec<SourceDocument> {
    vec![
        doc(
            "install.md",
            "# Installation\n\nDownload the package then run install to install everything in place.",
        ),
        doc(
            "config.md",
            "# Configuration\n\nThe configuration file controls ports logging levels and request limits.",
        ),
        doc(
            "usage.md",
            "# Usage\n\nStart the server check its status stop it and install plugins when needed.",
        ),
    ]
}

fn build(dir: &Path, with_embeddings: bool) {
    let embedder: Option<Box<dyn Embedder>> = if with_embeddings {
        Some(Box::new(HashEmbedder::new(DIM)))
    } else {
        None
    };
    IndexBuilder::new(dir, ChunkingSettings { max_tokens: 500, overlap_tokens: 50 }, embedder, 8)
        .expect("builder")
        .build(&corpus())
        .expect("build");
}

fn retriever(dir: &Path, with_embedder: bool) -> HybridRetriever {
    let embedder: Option<Box<dyn Embedder>> = if with_embedder {
        Some(Box::new(HashEmbedder::new(DIM)))
    } else {
        None
    };
    HybridRetriever::open(dir, embedder, 0.6).expect("open retriever")
}

#[test]
fn lexical_strategy_returns_bm25_ranked_matches() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let results = retriever.retrieve("install", Strategy::Lexical, 0.6, 2).unwrap();
    assert_eq!(results.len(), 2);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
        assert!(result.chunk.text.contains("install"));
        assert!(result.lexical_score.is_some());
        assert!(result.semantic_score.is_none());
    }
    assert!(results[0].fused_score >= results[1].fused_score);
    // install.md mentions the term twice in a similar-length chunk, so it
    // outranks the single mention in usage.md.
    assert_eq!(results[0].chunk.source_path, "install.md");
}

#[test]
fn semantic_strategy_ranks_by_cosine() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let results = retriever
        .retrieve("configuration file ports", Strategy::Semantic, 0.6, 3)
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.source_path, "config.md");
    for result in &results {
        assert!(result.lexical_score.is_none());
        assert!(result.semantic_score.is_some());
    }
}

#[test]
fn semantic_request_without_embeddings_is_surfaced() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), false);

    // Embedder configured, but no store was ever built.
    let retriever = retriever(tmp.path(), true);
    let err = retriever.retrieve("install", Strategy::Semantic, 0.6, 2).unwrap_err();
    assert!(matches!(err, Error::SemanticIndexUnavailable));

    // No embedder configured at all behaves the same.
    let retriever = self::retriever(tmp.path(), false);
    let err = retriever.retrieve("install", Strategy::Semantic, 0.6, 2).unwrap_err();
    assert!(matches!(err, Error::SemanticIndexUnavailable));
}

#[test]
fn auto_and_hybrid_degrade_to_lexical_without_embeddings() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), false);
    let retriever = retriever(tmp.path(), true);

    let auto = retriever.retrieve("how do I install this", Strategy::Auto, 0.6, 2).unwrap();
    assert!(!auto.is_empty());
    for result in &auto {
        assert!(result.semantic_score.is_none());
    }

    let hybrid = retriever.retrieve("install", Strategy::Hybrid, 0.6, 2).unwrap();
    assert!(!hybrid.is_empty());
    for result in &hybrid {
        assert!(result.semantic_score.is_none());
    }
}

#[test]
fn hybrid_fuses_scores_from_both_sides() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let results = retriever.retrieve("install the package", Strategy::Hybrid, 0.6, 3).unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().any(|r| r.lexical_score.is_some() && r.semantic_score.is_some()));
    for result in &results {
        assert!((0.0..=1.0).contains(&result.fused_score));
    }
    for pair in results.windows(2) {
        assert!(pair[0].fused_score >= pair[1].fused_score);
    }
}

#[test]
fn alpha_one_reproduces_pure_lexical_ranking() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let lexical = retriever.retrieve("install", Strategy::Lexical, 0.6, 2).unwrap();
    let hybrid = retriever.retrieve("install", Strategy::Hybrid, 1.0, 2).unwrap();

    let lexical_ids: Vec<&str> = lexical.iter().map(|r| r.chunk.id.as_str()).collect();
    let hybrid_ids: Vec<&str> = hybrid.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(lexical_ids, hybrid_ids);
}

#[test]
fn alpha_zero_reproduces_pure_semantic_ranking() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let semantic = retriever.retrieve("install", Strategy::Semantic, 0.6, 3).unwrap();
    let hybrid = retriever.retrieve("install", Strategy::Hybrid, 0.0, 3).unwrap();

    let semantic_ids: Vec<&str> = semantic.iter().map(|r| r.chunk.id.as_str()).collect();
    let hybrid_ids: Vec<&str> = hybrid.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(semantic_ids, hybrid_ids);
}

#[test]
fn auto_routes_code_like_queries_to_lexical() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let code = retriever.retrieve("install_plugins usage", Strategy::Auto, 0.6, 3).unwrap();
    assert!(!code.is_empty());
    for result in &code {
        assert!(result.semantic_score.is_none(), "code-like query skips the semantic side");
    }

    let natural = retriever.retrieve("how do I configure ports", Strategy::Auto, 0.6, 3).unwrap();
    assert!(natural.iter().any(|r| r.semantic_score.is_some()));
}

#[test]
fn invalid_arguments_are_rejected_up_front() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    assert!(matches!(
        retriever.retrieve("q", Strategy::Hybrid, 1.5, 2),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        retriever.retrieve("q", Strategy::Hybrid, -0.1, 2),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        retriever.retrieve("q", Strategy::Lexical, 0.5, 0),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn top_k_bounds_the_result_count() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever = retriever(tmp.path(), true);

    let results = retriever.retrieve("install server configuration", Strategy::Hybrid, 0.5, 10).unwrap();
    assert!(results.len() <= 10);
    assert!(!results.is_empty());
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
    }

    let capped = retriever.retrieve("install server configuration", Strategy::Hybrid, 0.5, 1).unwrap();
    assert_eq!(capped.len(), 1);
}

struct TimeoutEmbedder;

impl Embedder for TimeoutEmbedder {
    fn id(&self) -> &str {
        MODEL
    }
    fn dim(&self) -> usize {
        DIM
    }
    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingTimeout { waited_ms: 100 })
    }
}

#[test]
fn query_embedding_timeout_propagates_instead_of_degrading() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);
    let retriever =
        HybridRetriever::open(tmp.path(), Some(Box::new(TimeoutEmbedder)), 0.6).unwrap();

    let err = retriever.retrieve("install", Strategy::Hybrid, 0.6, 2).unwrap_err();
    assert!(matches!(err, Error::EmbeddingTimeout { .. }));
    let err = retriever.retrieve("install", Strategy::Semantic, 0.6, 2).unwrap_err();
    assert!(matches!(err, Error::EmbeddingTimeout { .. }));

    // The lexical path never consults the embedder.
    let results = retriever.retrieve("install", Strategy::Lexical, 0.6, 2).unwrap();
    assert!(!results.is_empty());
}

#[test]
fn incompatible_store_degrades_to_lexical_only() {
    let tmp = TempDir::new().unwrap();
    build(tmp.path(), true);

    // A different model id / dimension makes the persisted store unusable.
    let retriever =
        HybridRetriever::open(tmp.path(), Some(Box::new(HashEmbedder::new(16))), 0.6).unwrap();

    let err = retriever.retrieve("install", Strategy::Semantic, 0.6, 2).unwrap_err();
    assert!(matches!(err, Error::SemanticIndexUnavailable));

    let results = retriever.retrieve("install", Strategy::Hybrid, 0.6, 2).unwrap();
    assert!(!results.is_empty());
    for result in &results {
        assert!(result.semantic_score.is_none());
    }
}
