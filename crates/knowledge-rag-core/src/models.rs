//! Data model shared by every pipeline stage.
//!
//! ```text
//! RawDocument (one per PDF page)
//!     └─ Chunk (bounded, overlapping slice of the page text)
//!          └─ IndexEntry (chunk + vector + namespace, keyed by a stable id)
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a piece of text came from.
///
/// `source_file` is always the name the user uploaded, never the temporary
/// path the bytes were spooled to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageMetadata {
    pub source_file: String,
    /// 1-based.
    pub page_number: u32,
    pub total_pages: u32,
}

/// The extracted text of a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub text: String,
    pub metadata: PageMetadata,
}

/// A bounded segment of one page's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: PageMetadata,
    /// Position within the owning page, starting at 0.
    pub chunk_index: u32,
}

impl Chunk {
    /// Stable identifier derived from file name, page and chunk position.
    ///
    /// Re-ingesting the same file yields the same ids, which is what makes
    /// upserts overwrite instead of duplicate.
    pub fn entry_id(&self) -> String {
        entry_id(
            &self.metadata.source_file,
            self.metadata.page_number,
            self.chunk_index,
        )
    }
}

/// SHA-256 over `source_file`, `page_number` and `chunk_index`, hex encoded.
pub fn entry_id(source_file: &str, page_number: u32, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_file.as_bytes());
    hasher.update([0u8]);
    hasher.update(page_number.to_le_bytes());
    hasher.update(chunk_index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata persisted next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(flatten)]
    pub page: PageMetadata,
    pub chunk_index: u32,
}

/// A vector plus its text, ready to be upserted into a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: EntryMetadata,
    pub namespace: String,
}

impl IndexEntry {
    /// Pair a chunk with its embedding for the given namespace.
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>, namespace: &str) -> Self {
        let id = chunk.entry_id();
        IndexEntry {
            id,
            vector,
            text: chunk.text,
            metadata: EntryMetadata {
                page: chunk.metadata,
                chunk_index: chunk.chunk_index,
            },
            namespace: namespace.to_string(),
        }
    }
}

/// An index entry returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// A retrieved chunk in the shape the answer generator consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub source_file: String,
    pub page_number: u32,
    pub total_pages: u32,
    pub chunk_index: u32,
    pub score: f32,
}

impl From<ScoredEntry> for RetrievedChunk {
    fn from(scored: ScoredEntry) -> Self {
        let ScoredEntry { entry, score } = scored;
        RetrievedChunk {
            id: entry.id,
            text: entry.text,
            source_file: entry.metadata.page.source_file,
            page_number: entry.metadata.page.page_number,
            total_pages: entry.metadata.page.total_pages,
            chunk_index: entry.metadata.chunk_index,
            score,
        }
    }
}
