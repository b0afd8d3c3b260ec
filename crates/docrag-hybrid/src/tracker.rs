//! Incremental index maintenance driven by content-hash change detection.
//!
//! A build pass diffs the discovered documents against the persisted
//! [`IndexState`] snapshot taken before any mutation: equal hash means skip,
//! a new hash means purge-then-reinsert, a vanished path means purge. All
//! chunking and embedding for a pass completes before the indexes are
//! touched, and leftovers of an interrupted pass (ids present in an index
//! but unknown to the state) are reconciled away first, so a crash mid-pass
//! can always be repaired by the next build. State and embedding store are
//! written atomically, state last.

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docrag_core::chunker::chunk;
use docrag_core::config::ChunkingSettings;
use docrag_core::traits::Embedder;
use docrag_core::types::{content_hash, Chunk, ChunkId, SourceDocument};
use docrag_core::{Error, Result};
use docrag_text::LexicalIndex;
use docrag_vector::SemanticIndex;

pub const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "build.lock";
const EMBEDDINGS_FILE: &str = "embeddings.json";
const LEXICAL_DIR: &str = "lexical";

/// Tracked state of one source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRecord {
    pub content_hash: String,
    pub chunk_ids: Vec<ChunkId>,
}

/// Persisted document-path → record mapping, diffed on every build pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexState {
    pub version: u32,
    pub documents: BTreeMap<String, DocumentRecord>,
}

impl Default for IndexState {
    fn default() -> Self {
        Self { version: STATE_VERSION, documents: BTreeMap::new() }
    }
}

impl IndexState {
    /// Load the persisted state. An unreadable or unparseable file is logged
    /// and treated as empty, forcing a full rebuild rather than a crash.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read index state, rebuilding");
                return Self::default();
            }
        };
        match serde_json::from_str::<IndexState>(&data) {
            Ok(state) if state.version == STATE_VERSION => state,
            Ok(state) => {
                warn!(version = state.version, "index state has unknown version, rebuilding");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse index state, rebuilding");
                Self::default()
            }
        }
    }

    /// Persist atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Operation(format!("failed to serialize index state: {}", e)))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.persist(path)
            .map_err(|e| Error::Operation(format!("failed to persist index state: {}", e)))?;
        Ok(())
    }

    /// Union of all tracked chunk ids.
    pub fn chunk_id_union(&self) -> HashSet<ChunkId> {
        self.documents
            .values()
            .flat_map(|r| r.chunk_ids.iter().cloned())
            .collect()
    }
}

pub fn state_path(index_dir: &Path) -> PathBuf {
    index_dir.join(STATE_FILE)
}

pub fn embeddings_path(index_dir: &Path) -> PathBuf {
    index_dir.join(EMBEDDINGS_FILE)
}

pub fn lexical_dir(index_dir: &Path) -> PathBuf {
    index_dir.join(LEXICAL_DIR)
}

// Advisory single-writer lock; released on drop. A second build pass fails
// fast instead of interleaving mutations.
struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let path = index_dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::BuildInProgress(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Summary of one build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub chunks_indexed: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
    pub orphans_purged: usize,
}

pub struct IndexBuilder {
    index_dir: PathBuf,
    chunking: ChunkingSettings,
    lexical: LexicalIndex,
    semantic: Option<SemanticIndex>,
    embedder: Option<Box<dyn Embedder>>,
    embed_batch_size: usize,
}

impl IndexBuilder {
    /// Open (or create) the indexes under `index_dir`. With no embedder the
    /// semantic phase is skipped entirely and the engine runs lexical-only.
    pub fn new(
        index_dir: &Path,
        chunking: ChunkingSettings,
        embedder: Option<Box<dyn Embedder>>,
        embed_batch_size: usize,
    ) -> Result<Self> {
        if chunking.max_tokens == 0 {
            return Err(Error::InvalidConfig("chunking.max_tokens must be > 0".into()));
        }
        if chunking.overlap_tokens >= chunking.max_tokens {
            return Err(Error::InvalidConfig(
                "chunking.overlap_tokens must be < chunking.max_tokens".into(),
            ));
        }
        if embed_batch_size == 0 {
            return Err(Error::InvalidConfig("embedding.batch_size must be > 0".into()));
        }

        std::fs::create_dir_all(index_dir)?;
        let lexical = LexicalIndex::open_or_create(&lexical_dir(index_dir))?;
        let semantic = match &embedder {
            Some(e) => {
                let path = embeddings_path(index_dir);
                match SemanticIndex::open_or_create(&path, e.id(), e.dim()) {
                    Ok(store) => Some(store),
                    Err(Error::EmbeddingStoreIncompatible(msg)) => {
                        warn!(reason = %msg, "embedding store incompatible, rebuilding it");
                        Some(SemanticIndex::create(&path, e.id(), e.dim()))
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        Ok(Self {
            index_dir: index_dir.to_path_buf(),
            chunking,
            lexical,
            semantic,
            embedder,
            embed_batch_size,
        })
    }

    /// Run one build pass over the discovered documents.
    pub fn build(&mut self, documents: &[SourceDocument]) -> Result<BuildReport> {
        let _lock = BuildLock::acquire(&self.index_dir)?;
        let prev_state = IndexState::load(&state_path(&self.index_dir));
        let mut report = BuildReport::default();

        // Classify every discovered document against the snapshot.
        let mut current_hashes: BTreeMap<&str, String> = BTreeMap::new();
        let mut to_chunk: Vec<&SourceDocument> = Vec::new();
        for doc in documents {
            if current_hashes.contains_key(doc.path.as_str()) {
                warn!(path = %doc.path, "duplicate document path in build input, keeping first");
                continue;
            }
            let hash = content_hash(&doc.text);
            let status = match prev_state.documents.get(&doc.path) {
                Some(record) if record.content_hash == hash => {
                    report.unchanged += 1;
                    "unchanged"
                }
                Some(_) => {
                    report.updated += 1;
                    to_chunk.push(doc);
                    "updated"
                }
                None => {
                    report.added += 1;
                    to_chunk.push(doc);
                    "added"
                }
            };
            debug!(path = %doc.path, status, "classified document");
            current_hashes.insert(doc.path.as_str(), hash);
        }
        let removed_paths: Vec<String> = prev_state
            .documents
            .keys()
            .filter(|path| !current_hashes.contains_key(path.as_str()))
            .cloned()
            .collect();
        report.removed = removed_paths.len();

        // Chunk everything up front, in parallel; nothing mutates until the
        // whole pass has its inputs ready.
        let max_tokens = self.chunking.max_tokens;
        let overlap_tokens = self.chunking.overlap_tokens;
        let chunked: Vec<(String, Vec<Chunk>)> = to_chunk
            .par_iter()
            .map(|doc| {
                chunk(&doc.text, &doc.path, max_tokens, overlap_tokens)
                    .map(|chunks| (doc.path.clone(), chunks))
            })
            .collect::<Result<Vec<_>>>()?;

        // Reconcile leftovers of an interrupted pass before touching anything
        // else, so re-adding the same chunks cannot collide.
        let known = prev_state.chunk_id_union();
        let stale_lexical: Vec<ChunkId> = self
            .lexical
            .all_ids()?
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();
        if !stale_lexical.is_empty() {
            warn!(count = stale_lexical.len(), "purging stale lexical entries");
            report.orphans_purged += stale_lexical.len();
            self.lexical.remove(&stale_lexical)?;
        }
        if let Some(semantic) = &mut self.semantic {
            let stale_semantic: Vec<ChunkId> = semantic
                .all_ids()
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect();
            if !stale_semantic.is_empty() {
                warn!(count = stale_semantic.len(), "purging stale semantic entries");
                report.orphans_purged += stale_semantic.len();
                semantic.remove(&stale_semantic);
            }
        }

        let mut new_state = IndexState::default();
        for (path, record) in &prev_state.documents {
            if current_hashes.contains_key(path.as_str()) {
                new_state.documents.insert(path.clone(), record.clone());
            }
        }

        // Purge chunks of removed and changed documents from both indexes.
        let mut purge: Vec<ChunkId> = Vec::new();
        for path in &removed_paths {
            if let Some(record) = prev_state.documents.get(path) {
                purge.extend(record.chunk_ids.iter().cloned());
            }
        }
        for (path, _chunks) in &chunked {
            if let Some(record) = prev_state.documents.get(path) {
                purge.extend(record.chunk_ids.iter().cloned());
                new_state.documents.remove(path);
            }
        }
        if !purge.is_empty() {
            self.lexical.remove(&purge)?;
            if let Some(semantic) = &mut self.semantic {
                semantic.remove(&purge);
            }
        }

        // Insert the fresh chunks and record them.
        for (path, chunks) in &chunked {
            self.lexical.add(chunks)?;
            report.chunks_indexed += chunks.len();
            let record = DocumentRecord {
                content_hash: current_hashes
                    .get(path.as_str())
                    .cloned()
                    .unwrap_or_default(),
                chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
            };
            new_state.documents.insert(path.clone(), record);
        }

        // Backfill the semantic side for every tracked chunk that has no
        // vector yet. This covers new chunks, a rebuilt store after a model
        // switch, and earlier lexical-only passes alike.
        if let (Some(semantic), Some(embedder)) = (&mut self.semantic, &self.embedder) {
            let (embedded, failures) = backfill_embeddings(
                semantic,
                embedder.as_ref(),
                &self.lexical,
                &new_state,
                self.embed_batch_size,
            )?;
            report.embedded = embedded;
            report.embedding_failures = failures;
            semantic.save()?;
        }

        new_state.save(&state_path(&self.index_dir))?;
        info!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            chunks = report.chunks_indexed,
            embedded = report.embedded,
            "build pass complete"
        );
        Ok(report)
    }
}

// Embed every tracked chunk missing from the store, in batches. A failing
// batch is logged and skipped so a flaky embedding backend degrades the
// semantic side instead of blocking the whole corpus.
fn backfill_embeddings(
    semantic: &mut SemanticIndex,
    embedder: &dyn Embedder,
    lexical: &LexicalIndex,
    state: &IndexState,
    batch_size: usize,
) -> Result<(usize, usize)> {
    let have: HashSet<ChunkId> = semantic.all_ids().into_iter().collect();
    let mut missing: Vec<ChunkId> = Vec::new();
    for record in state.documents.values() {
        for id in &record.chunk_ids {
            if !have.contains(id) {
                missing.push(id.clone());
            }
        }
    }
    if missing.is_empty() {
        return Ok((0, 0));
    }

    let pb = ProgressBar::new(missing.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut embedded = 0usize;
    let mut failures = 0usize;
    for batch in missing.chunks(batch_size) {
        let mut ids = Vec::with_capacity(batch.len());
        let mut texts = Vec::with_capacity(batch.len());
        for id in batch {
            match lexical.get(id)? {
                Some(chunk) => {
                    // Embed the heading together with the body for context.
                    let text = match &chunk.heading {
                        Some(heading) => format!("{}\n{}", heading, chunk.text),
                        None => chunk.text,
                    };
                    ids.push(id.clone());
                    texts.push(text);
                }
                None => {
                    warn!(id = %id, "tracked chunk missing from lexical index, skipping embedding");
                    failures += 1;
                }
            }
        }
        if texts.is_empty() {
            pb.inc(batch.len() as u64);
            continue;
        }
        match embedder.embed_batch(&texts) {
            Ok(vectors) => {
                if vectors.len() != texts.len() {
                    return Err(Error::Embedding(format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    )));
                }
                for (id, vector) in ids.iter().zip(vectors) {
                    semantic.add(id, vector)?;
                    embedded += 1;
                }
            }
            Err(e) => {
                warn!(count = texts.len(), error = %e, "embedding batch failed, skipping");
                failures += texts.len();
            }
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();
    Ok((embedded, failures))
}
