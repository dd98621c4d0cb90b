// crates/core/src/chunker.rs
//! Recursive character splitting of document text into overlapping chunks.
//!
//! Text is split on the coarsest separator present (paragraphs, then lines,
//! then words, then characters). Pieces that are still too large are split
//! again with the next separator. Small pieces are merged back together up
//! to `chunk_size`, carrying up to `chunk_overlap` characters of trailing
//! context into the next chunk. Lengths are counted in characters.

use crate::types::Chunk;

pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on `separator`, keeping it at the front of every following piece.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    // The first match sits at `start == idx` only when the text opens with
    // the separator; every later piece begins with it.
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.into_iter().filter(|p| !p.is_empty()).collect()
}

fn join_trimmed(pieces: &[&str]) -> Option<String> {
    let joined: String = pieces.concat();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Merge small pieces into chunks no longer than `chunk_size`.
fn merge_pieces(pieces: &[&str], config: ChunkerConfig, out: &mut Vec<String>) {
    let mut current: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > config.chunk_size && !current.is_empty() {
            if let Some(chunk) = join_trimmed(&current) {
                out.push(chunk);
            }
            while total > config.chunk_overlap
                || (total + len > config.chunk_size && total > 0)
            {
                let dropped = current.remove(0);
                total -= char_len(dropped);
            }
        }
        current.push(piece);
        total += len;
    }

    if let Some(chunk) = join_trimmed(&current) {
        out.push(chunk);
    }
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkerConfig, out: &mut Vec<String>) {
    let (position, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let mut small: Vec<&str> = Vec::new();
    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.chunk_size {
            small.push(piece);
            continue;
        }
        if !small.is_empty() {
            merge_pieces(&small, config, out);
            small.clear();
        }
        if finer.is_empty() {
            if let Some(chunk) = join_trimmed(&[piece]) {
                out.push(chunk);
            }
        } else {
            split_recursive(piece, finer, config, out);
        }
    }
    if !small.is_empty() {
        merge_pieces(&small, config, out);
    }
}

/// Split `text` into chunk strings.
pub fn split_text(text: &str, config: ChunkerConfig) -> Vec<String> {
    let mut out = Vec::new();
    split_recursive(text, DEFAULT_SEPARATORS, config, &mut out);
    out
}

/// Split a document's text into indexed chunks with ids derived from the
/// document id.
pub fn chunk_document(document_id: &str, text: &str, config: ChunkerConfig) -> Vec<Chunk> {
    split_text(text, config)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            id: format!("{document_id}:{index}"),
            index: index as u32,
            text,
        })
        .collect()
}
