//! In-memory [`VectorIndex`] for tests and embedded use.
//!
//! Entries live in a `HashMap<namespace, BTreeMap<id, IndexEntry>>` behind
//! a `std::sync::RwLock`. Queries are brute-force cosine similarity over
//! the namespace's entries.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{rank, validate_entries, validate_query, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{IndexEntry, ScoredEntry};

type Partitions = HashMap<String, BTreeMap<String, IndexEntry>>;

pub struct InMemoryIndex {
    dims: usize,
    partitions: RwLock<Partitions>,
}

impl InMemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Every stored entry of `namespace`, ordered by id.
    pub fn entries(&self, namespace: &str) -> Vec<IndexEntry> {
        self.read()
            .get(namespace)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Partitions> {
        self.partitions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Partitions> {
        self.partitions.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize, IndexError> {
        validate_entries(self.dims, namespace, entries)?;
        let mut partitions = self.write();
        let partition = partitions.entry(namespace.to_string()).or_default();
        for entry in entries {
            partition.insert(entry.id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        validate_query(self.dims, vector)?;
        let partitions = self.read();
        let Some(partition) = partitions.get(namespace) else {
            return Ok(Vec::new());
        };
        let candidates = partition
            .values()
            .map(|entry| ScoredEntry {
                score: cosine_similarity(vector, &entry.vector),
                entry: entry.clone(),
            })
            .collect();
        Ok(rank(candidates, top_k))
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        Ok(self.read().get(namespace).map_or(0, BTreeMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryMetadata, PageMetadata};

    fn entry(ns: &str, id: &str, vector: Vec<f32>, text: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            text: text.to_string(),
            metadata: EntryMetadata {
                page: PageMetadata {
                    source_file: "notes.pdf".into(),
                    page_number: 1,
                    total_pages: 1,
                },
                chunk_index: 0,
            },
            namespace: ns.to_string(),
        }
    }

    #[tokio::test]
    async fn test_query_empty_namespace() {
        let index = InMemoryIndex::new(2);
        assert!(index.query("nobody/none", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_isolated() {
        let index = InMemoryIndex::new(2);
        index
            .upsert("a/x", &[entry("a/x", "1", vec![1.0, 0.0], "in a")])
            .await
            .unwrap();
        index
            .upsert("b/x", &[entry("b/x", "2", vec![1.0, 0.0], "in b")])
            .await
            .unwrap();

        let hits = index.query("a/x", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.text, "in a");
        assert!(hits.iter().all(|h| h.entry.namespace == "a/x"));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = InMemoryIndex::new(2);
        index
            .upsert("a/x", &[entry("a/x", "1", vec![1.0, 0.0], "old")])
            .await
            .unwrap();
        index
            .upsert("a/x", &[entry("a/x", "1", vec![0.0, 1.0], "new")])
            .await
            .unwrap();
        assert_eq!(index.count("a/x").await.unwrap(), 1);
        assert_eq!(index.entries("a/x")[0].text, "new");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_writes_nothing() {
        let index = InMemoryIndex::new(2);
        let batch = vec![
            entry("a/x", "1", vec![1.0, 0.0], "ok"),
            entry("a/x", "2", vec![1.0, 0.0, 0.0], "bad"),
        ];
        let err = index.upsert("a/x", &batch).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { actual: 3, .. }));
        assert_eq!(index.count("a/x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_foreign_namespace_entry() {
        let index = InMemoryIndex::new(2);
        let err = index
            .upsert("a/x", &[entry("b/x", "1", vec![1.0, 0.0], "stray")])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_query_sorted_and_truncated() {
        let index = InMemoryIndex::new(2);
        let batch = vec![
            entry("a/x", "far", vec![0.0, 1.0], "far"),
            entry("a/x", "near", vec![1.0, 0.1], "near"),
            entry("a/x", "mid", vec![1.0, 1.0], "mid"),
        ];
        index.upsert("a/x", &batch).await.unwrap();

        let hits = index.query("a/x", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_query_dimension_checked() {
        let index = InMemoryIndex::new(2);
        assert!(index.query("a/x", &[1.0], 1).await.is_err());
    }
}
