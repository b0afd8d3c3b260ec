//! BM25 index over chunk text, backed by tantivy.
//!
//! Supports incremental add/remove by chunk id. Results are ordered by BM25
//! score descending with ties broken by insertion order, so repeated queries
//! against the same index contents always return the same ranking.

use std::collections::HashSet;
use std::path::Path;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use docrag_core::types::{Chunk, ChunkId, RetrievedChunk, SearchHit, SourceKind};
use docrag_core::{Error, Result};

use crate::schema::build_schema;

const WRITER_HEAP_BYTES: usize = 50_000_000;

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
    source_field: Field,
    heading_field: Field,
    position_field: Field,
    seq_field: Field,
    next_seq: u64,
}

impl LexicalIndex {
    /// Open the index at `dir`, creating it if it does not exist yet.
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(op_err)?
        } else {
            Index::create_in_dir(dir, build_schema()).map_err(op_err)?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(op_err)?;

        let schema = index.schema();
        let id_field = schema.get_field("id").map_err(op_err)?;
        let text_field = schema.get_field("text").map_err(op_err)?;
        let source_field = schema.get_field("source").map_err(op_err)?;
        let heading_field = schema.get_field("heading").map_err(op_err)?;
        let position_field = schema.get_field("position").map_err(op_err)?;
        let seq_field = schema.get_field("seq").map_err(op_err)?;

        let mut lexical = Self {
            index,
            reader,
            id_field,
            text_field,
            source_field,
            heading_field,
            position_field,
            seq_field,
            next_seq: 0,
        };
        lexical.next_seq = lexical.max_seq()? + 1;
        Ok(lexical)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Insert chunks. Fails with `DuplicateId` if any chunk id is already
    /// present (the caller must `remove` before re-adding); assigns each
    /// chunk the next insertion ordinal.
    pub fn add(&mut self, chunks: &[Chunk]) -> Result<()> {
        let searcher = self.reader.searcher();
        let mut batch_ids: HashSet<&str> = HashSet::new();
        for chunk in chunks {
            if !batch_ids.insert(chunk.id.as_str()) {
                return Err(Error::DuplicateId(chunk.id.clone()));
            }
            let term = Term::from_field_text(self.id_field, &chunk.id);
            let query = TermQuery::new(term, IndexRecordOption::Basic);
            let present = searcher.search(&query, &Count).map_err(op_err)?;
            if present > 0 {
                return Err(Error::DuplicateId(chunk.id.clone()));
            }
        }

        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES).map_err(op_err)?;
        for chunk in chunks {
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &chunk.id);
            doc.add_text(self.text_field, &chunk.text);
            doc.add_text(self.source_field, &chunk.source_path);
            doc.add_text(self.heading_field, chunk.heading.as_deref().unwrap_or(""));
            doc.add_u64(self.position_field, chunk.position as u64);
            doc.add_u64(self.seq_field, self.next_seq);
            self.next_seq += 1;
            writer.add_document(doc).map_err(op_err)?;
        }
        writer.commit().map_err(op_err)?;
        self.reader.reload().map_err(op_err)?;
        debug!(count = chunks.len(), "added chunks to lexical index");
        Ok(())
    }

    /// Delete chunks by id. Removing an absent id is a no-op.
    pub fn remove(&mut self, chunk_ids: &[ChunkId]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES).map_err(op_err)?;
        for id in chunk_ids {
            writer.delete_term(Term::from_field_text(self.id_field, id));
        }
        writer.commit().map_err(op_err)?;
        self.reader.reload().map_err(op_err)?;
        debug!(count = chunk_ids.len(), "removed chunks from lexical index");
        Ok(())
    }

    /// BM25 search over stemmed, case-folded chunk text. Returns at most
    /// `top_k` hits, best first, ties broken by insertion order. An empty
    /// index or an empty query yields an empty result, never an error.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be >= 1".into()));
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        if searcher.num_docs() == 0 {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed = match parser.parse_query(query) {
            Ok(q) => q,
            Err(e) => {
                warn!(query, error = %e, "query parse failed, retrying sanitized");
                let sanitized = sanitize_query(query);
                if sanitized.is_empty() {
                    return Ok(Vec::new());
                }
                parser.parse_query(&sanitized).map_err(op_err)?
            }
        };

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k))
            .map_err(op_err)?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(op_err)?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let seq = doc.get_first(self.seq_field).and_then(|v| v.as_u64()).unwrap_or(0);
            hits.push(SearchHit { id, score, source: SourceKind::Lexical, seq });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        Ok(hits)
    }

    /// Hydrate the stored fields of one chunk by id.
    pub fn get(&self, chunk_id: &str) -> Result<Option<RetrievedChunk>> {
        let searcher = self.reader.searcher();
        let term = Term::from_field_text(self.id_field, chunk_id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1)).map_err(op_err)?;
        let Some((_score, addr)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(addr).map_err(op_err)?;
        Ok(Some(self.hydrate(&doc)))
    }

    /// Every chunk id currently present, used for reconciliation against the
    /// tracked state.
    pub fn all_ids(&self) -> Result<Vec<ChunkId>> {
        Ok(self.entries()?.into_iter().map(|(id, _seq)| id).collect())
    }

    fn hydrate(&self, doc: &TantivyDocument) -> RetrievedChunk {
        let get_str = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let heading = {
            let h = get_str(self.heading_field);
            if h.is_empty() {
                None
            } else {
                Some(h)
            }
        };
        RetrievedChunk {
            id: get_str(self.id_field),
            source_path: get_str(self.source_field),
            heading,
            position: doc
                .get_first(self.position_field)
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
            text: get_str(self.text_field),
        }
    }

    // Walk every live document, returning (id, seq) pairs.
    fn entries(&self) -> Result<Vec<(ChunkId, u64)>> {
        let searcher = self.reader.searcher();
        let mut out = Vec::new();
        for (seg_ord, segment) in searcher.segment_readers().iter().enumerate() {
            let alive = segment.alive_bitset();
            for doc_id in 0..segment.max_doc() {
                if let Some(bitset) = alive {
                    if !bitset.is_alive(doc_id) {
                        continue;
                    }
                }
                let addr = DocAddress::new(seg_ord as u32, doc_id);
                let doc: TantivyDocument = searcher.doc(addr).map_err(op_err)?;
                let id = doc
                    .get_first(self.id_field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let seq = doc.get_first(self.seq_field).and_then(|v| v.as_u64()).unwrap_or(0);
                out.push((id, seq));
            }
        }
        Ok(out)
    }

    fn max_seq(&self) -> Result<u64> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|(_id, seq)| seq)
            .max()
            .unwrap_or(0))
    }
}

/// Strip characters that commonly break the query parser; used as a fallback
/// when the raw query fails to parse.
fn sanitize_query(query: &str) -> String {
    let stripped: String = query
        .chars()
        .map(|c| match c {
            '[' | ']' | '{' | '}' | '(' | ')' | '~' | '^' | '"' | '\'' | ':' | '*' => ' ',
            other => other,
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn op_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Operation(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_parser_metacharacters() {
        assert_eq!(sanitize_query("hello world"), "hello world");
        assert_eq!(sanitize_query("spawn(\"worker\")"), "spawn worker");
        assert_eq!(sanitize_query("a:b [c]"), "a b c");
        assert_eq!(sanitize_query("  "), "");
    }
}
