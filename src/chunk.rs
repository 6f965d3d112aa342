//! Paragraph-boundary chunker.
//!
//! Splits a document's rendered text into [`Chunk`]s that fit the configured
//! `max_tokens`. Paragraphs (`\n\n`) are packed greedily; a paragraph that is
//! too long on its own is cut at the last newline or space before the limit.
//! Row-grain CSV documents are far below any sane limit and come out as a
//! single chunk.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

pub fn chunk_document(document: &Document, max_tokens: usize) -> Vec<Chunk> {
    chunk_text(&document.id, &document.rendered_text(), max_tokens)
}

/// Split text into chunks with contiguous indices starting at 0. Always
/// returns at least one chunk.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if joined_len > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            pieces.extend(hard_split(para, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(idx, piece)| make_chunk(document_id, idx as i64, piece))
        .collect()
}

fn hard_split(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = para;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let mut limit = max_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let cut = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit.max(next_boundary(remaining)));
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[cut..];
    }
    out
}

/// Byte length of the first char; guarantees progress when `max_chars` is
/// smaller than a single multi-byte char.
fn next_boundary(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(0)
}

fn make_chunk(document_id: &str, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
