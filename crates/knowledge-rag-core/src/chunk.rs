//! Overlapping, separator-aware text chunker.
//!
//! Splits each page's text into [`Chunk`]s of at most `chunk_size`
//! characters, where consecutive chunks share exactly `overlap` characters
//! so that a sentence running across a boundary is still seen whole by at
//! least one chunk.
//!
//! # Algorithm
//!
//! Positions are counted in `char`s, never bytes.
//!
//! 1. If the rest of the text fits in `chunk_size`, emit it and stop.
//! 2. Otherwise look at the window `[start, start + chunk_size]` and pick
//!    the cut point from the coarsest separator tier that occurs in it:
//!    paragraph break, line break, sentence end, word break. The latest
//!    occurrence wins; the separator stays with the left chunk.
//! 3. A cut must land past `start + overlap` so the next chunk advances.
//!    If no tier qualifies, hard-cut at `start + chunk_size`.
//! 4. The next chunk starts `overlap` characters before the cut.
//!
//! Dropping the first `overlap` characters of every chunk after the first
//! and concatenating reproduces the page text exactly. A page of `L`
//! characters yields at least `ceil((L - overlap) / (chunk_size - overlap))`
//! chunks; exactly that many when every cut is a hard cut.
//!
//! # Example
//!
//! ```rust
//! use knowledge_rag_core::chunk::{split_text, ChunkParams};
//!
//! let params = ChunkParams::new(10, 2).unwrap();
//! let pieces = split_text("alpha beta gamma", params);
//! assert_eq!(pieces, vec!["alpha ", "a beta ", "a gamma"]);
//! ```

use tracing::debug;

use crate::error::ConfigError;
use crate::models::{Chunk, RawDocument};

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default number of characters shared by consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separator tiers, coarsest first. Within a tier the latest match wins.
const SEPARATOR_TIERS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? ", ".\n", "!\n", "?\n"],
    &[" ", "\t"],
];

/// Validated chunking settings: `0 <= overlap < chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if overlap >= chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk count for a text of `len` characters if every cut is a hard cut.
    pub fn min_chunks(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        if len <= self.chunk_size {
            return 1;
        }
        let stride = self.chunk_size - self.overlap;
        (len - self.overlap).div_ceil(stride)
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split every page independently and attach its metadata to each chunk.
///
/// Chunks never span two pages. `chunk_index` restarts at 0 for every
/// page. Pages whose text is empty or whitespace-only produce no chunks,
/// so every returned chunk has non-blank text.
pub fn split_documents(docs: &[RawDocument], params: ChunkParams) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in docs {
        if doc.text.trim().is_empty() {
            debug!(
                file = %doc.metadata.source_file,
                page = doc.metadata.page_number,
                "page has no text, skipping"
            );
            continue;
        }
        for (index, piece) in split_text(&doc.text, params).into_iter().enumerate() {
            chunks.push(Chunk {
                text: piece.to_string(),
                metadata: doc.metadata.clone(),
                chunk_index: index as u32,
            });
        }
    }
    chunks
}

/// Split `text` into overlapping slices of at most `chunk_size` characters.
///
/// Returns borrowed slices of `text`. Empty input yields no slices.
pub fn split_text(text: &str, params: ChunkParams) -> Vec<&str> {
    // Byte offset of every char, plus the end of the string.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = offsets.len();
    offsets.push(text.len());

    let mut pieces = Vec::new();
    if len == 0 {
        return pieces;
    }

    let mut start = 0usize;
    loop {
        if len - start <= params.chunk_size {
            pieces.push(&text[offsets[start]..]);
            break;
        }
        let limit = start + params.chunk_size;
        let end = find_cut(text, &offsets, start, limit, start + params.overlap).unwrap_or(limit);
        pieces.push(&text[offsets[start]..offsets[end]]);
        start = end - params.overlap;
    }
    pieces
}

/// Latest separator cut in `(floor, limit]`, coarsest tier first.
fn find_cut(
    text: &str,
    offsets: &[usize],
    start: usize,
    limit: usize,
    floor: usize,
) -> Option<usize> {
    let base = offsets[start];
    let window = &text[base..offsets[limit]];
    for tier in SEPARATOR_TIERS {
        let best = tier
            .iter()
            .filter_map(|sep| window.rfind(sep).map(|at| base + at + sep.len()))
            .max();
        if let Some(byte) = best {
            let pos = offsets.partition_point(|&b| b < byte);
            if pos > floor {
                return Some(pos);
            }
        }
    }
    None
}
