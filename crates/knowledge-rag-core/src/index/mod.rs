//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the namespace-partitioned store the
//! ingestion pipeline writes to and the retriever reads from. Backends:
//! [`memory::InMemoryIndex`] here, SQLite and Pinecone in the app crate.
//!
//! Contract shared by every backend:
//!
//! | Rule | Behaviour |
//! |------|-----------|
//! | Partitioning | `query(ns, ..)` only ever sees entries upserted into `ns` |
//! | Idempotence | upserting an existing `(ns, id)` overwrites it |
//! | Validation | all entries are checked before the first write |
//! | Empty namespace | `query` returns `Ok(vec![])` |
//! | Ordering | results sorted by non-increasing score, at most `top_k` |
//! | Partial writes | reported as [`IndexError::Interrupted`] with confirmed ids |

pub mod memory;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{IndexEntry, ScoredEntry};

pub use memory::InMemoryIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Declared vector dimension. Entries of any other length are rejected.
    fn dims(&self) -> usize;

    /// Insert or overwrite `entries` in `namespace`; returns how many were written.
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize, IndexError>;

    /// The `top_k` entries of `namespace` most similar to `vector`.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>, IndexError>;

    /// Number of entries stored in `namespace`.
    async fn count(&self, namespace: &str) -> Result<usize, IndexError>;
}

/// Check every entry against the declared dimension and target namespace.
pub fn validate_entries(
    dims: usize,
    namespace: &str,
    entries: &[IndexEntry],
) -> Result<(), IndexError> {
    for entry in entries {
        if entry.vector.len() != dims {
            return Err(IndexError::DimensionMismatch {
                id: entry.id.clone(),
                expected: dims,
                actual: entry.vector.len(),
            });
        }
        if entry.namespace != namespace {
            return Err(IndexError::Rejected(format!(
                "entry {} belongs to namespace {:?}, not {:?}",
                entry.id, entry.namespace, namespace
            )));
        }
    }
    Ok(())
}

/// Check a query vector against the declared dimension.
pub fn validate_query(dims: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != dims {
        return Err(IndexError::DimensionMismatch {
            id: "<query>".to_string(),
            expected: dims,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Sort by score (desc) then id (asc) and keep the first `top_k`.
///
/// NaN scores rank last.
pub fn rank(mut candidates: Vec<ScoredEntry>, top_k: usize) -> Vec<ScoredEntry> {
    for c in &mut candidates {
        if c.score.is_nan() {
            c.score = f32::NEG_INFINITY;
        }
    }
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    candidates.truncate(top_k);
    candidates
}
