//! Splits normalized document text into overlapping, token-bounded chunks.
//!
//! Tokens are whitespace-delimited words. Paragraph blocks are packed whole
//! whenever they fit, so chunks avoid starting or ending mid-paragraph; a
//! block larger than `max_tokens` falls back to a hard token cut. Markdown
//! headings start a new chunk and become the heading metadata of every chunk
//! until the next heading. Chunking is deterministic: identical input yields
//! identical boundaries and ids.

use crate::types::Chunk;
use crate::{Error, Result};

/// Split `text` into chunks of at most `max_tokens` tokens, each chunk after
/// the first repeating the trailing `overlap_tokens` tokens of its
/// predecessor.
pub fn chunk(
    text: &str,
    source_path: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>> {
    if max_tokens == 0 {
        return Err(Error::InvalidConfig("max_tokens must be > 0".into()));
    }
    if overlap_tokens >= max_tokens {
        return Err(Error::InvalidConfig(format!(
            "overlap_tokens ({}) must be < max_tokens ({})",
            overlap_tokens, max_tokens
        )));
    }

    let mut builder = ChunkBuilder::new(source_path, max_tokens, overlap_tokens);
    for block in blocks(text) {
        match block {
            Block::Heading(h) => builder.start_section(h),
            Block::Paragraph(words) => builder.push_paragraph(words),
        }
    }
    Ok(builder.finish())
}

enum Block {
    Heading(String),
    Paragraph(Vec<String>),
}

// Group lines into paragraph blocks separated by blank lines; an ATX heading
// line is always its own block.
fn blocks(text: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let mut para: Vec<String> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !para.is_empty() {
                out.push(Block::Paragraph(std::mem::take(&mut para)));
            }
            continue;
        }
        if trimmed.starts_with('#') {
            let heading = trimmed.trim_start_matches('#').trim();
            if !heading.is_empty() {
                if !para.is_empty() {
                    out.push(Block::Paragraph(std::mem::take(&mut para)));
                }
                out.push(Block::Heading(heading.to_string()));
                continue;
            }
        }
        para.extend(trimmed.split_whitespace().map(str::to_string));
    }
    if !para.is_empty() {
        out.push(Block::Paragraph(para));
    }
    out
}

struct ChunkBuilder<'a> {
    source_path: &'a str,
    max_tokens: usize,
    overlap_tokens: usize,
    chunks: Vec<Chunk>,
    // Current token buffer; the first `carry_len` tokens are overlap repeated
    // from the previously emitted chunk and never form a chunk on their own.
    cur: Vec<String>,
    carry_len: usize,
    active_heading: Option<String>,
    cur_heading: Option<String>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(source_path: &'a str, max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            source_path,
            max_tokens,
            overlap_tokens,
            chunks: Vec::new(),
            cur: Vec::new(),
            carry_len: 0,
            active_heading: None,
            cur_heading: None,
        }
    }

    fn start_section(&mut self, heading: String) {
        self.flush();
        self.active_heading = Some(heading);
        self.cur_heading = self.active_heading.clone();
    }

    fn push_paragraph(&mut self, words: Vec<String>) {
        // Prefer a chunk boundary between paragraphs over a cut inside one.
        if self.cur.len() + words.len() > self.max_tokens && self.cur.len() > self.carry_len {
            self.flush();
        }
        for word in words {
            if self.cur.len() == self.max_tokens {
                self.flush();
            }
            self.cur.push(word);
        }
    }

    fn flush(&mut self) {
        if self.cur.len() <= self.carry_len {
            return;
        }
        let text = self.cur.join(" ");
        let position = self.chunks.len();
        self.chunks.push(Chunk {
            id: Chunk::derive_id(self.source_path, position, &text),
            source_path: self.source_path.to_string(),
            heading: self.cur_heading.clone(),
            position,
            text,
            token_count: self.cur.len(),
        });
        let carry_start = self.cur.len().saturating_sub(self.overlap_tokens);
        self.cur.drain(..carry_start);
        self.carry_len = self.cur.len();
        self.cur_heading = self.active_heading.clone();
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}
