//! Knowledge folder records.
//!
//! A [`Knowledge`] record ties an owner's folder to the namespace its
//! vectors live in. The namespace is resolved exactly once, when the record
//! is created, and stored; later uploads read it back instead of resolving
//! again. After each successful ingestion the uploaded files are appended to
//! the record's `files` list.
//!
//! Records are kept behind the [`KnowledgeStore`] trait. This module ships
//! [`InMemoryKnowledgeStore`]; the app crate adds an HTTP-backed store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;
use crate::namespace;

/// An uploaded file, as listed on its knowledge record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Knowledge {
    pub id: String,
    pub owner: String,
    pub folder_name: String,
    pub namespace: String,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// Request body for creating a record. The namespace is resolved here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKnowledge {
    pub owner: String,
    pub folder_name: String,
    pub namespace: String,
}

impl NewKnowledge {
    pub fn new(owner: &str, folder_name: &str) -> Result<Self, KnowledgeError> {
        let namespace = namespace::resolve(folder_name, owner)?;
        Ok(Self {
            owner: owner.to_string(),
            folder_name: folder_name.to_string(),
            namespace,
        })
    }
}

/// Merge `incoming` into `files`. A descriptor with an existing name
/// replaces the old one in place; new names are appended in order.
pub fn merge_files(files: &mut Vec<FileDescriptor>, incoming: &[FileDescriptor]) {
    for file in incoming {
        match files.iter_mut().find(|f| f.name == file.name) {
            Some(existing) => *existing = file.clone(),
            None => files.push(file.clone()),
        }
    }
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create(&self, new: NewKnowledge) -> Result<Knowledge, KnowledgeError>;

    async fn get(&self, id: &str) -> Result<Knowledge, KnowledgeError>;

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Knowledge>, KnowledgeError>;

    /// Record `files` as ingested into the knowledge folder `id`.
    async fn append_files(
        &self,
        id: &str,
        files: &[FileDescriptor],
    ) -> Result<Knowledge, KnowledgeError>;
}

#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    records: RwLock<BTreeMap<String, Knowledge>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn create(&self, new: NewKnowledge) -> Result<Knowledge, KnowledgeError> {
        let record = Knowledge {
            id: uuid::Uuid::new_v4().to_string(),
            owner: new.owner,
            folder_name: new.folder_name,
            namespace: new.namespace,
            files: Vec::new(),
        };
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Knowledge, KnowledgeError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(id)
            .cloned()
            .ok_or_else(|| KnowledgeError::NotFound(id.to_string()))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Knowledge>, KnowledgeError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|k| k.owner == owner)
            .cloned()
            .collect())
    }

    async fn append_files(
        &self,
        id: &str,
        files: &[FileDescriptor],
    ) -> Result<Knowledge, KnowledgeError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(id)
            .ok_or_else(|| KnowledgeError::NotFound(id.to_string()))?;
        merge_files(&mut record.files, files);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(name: &str, size: u64) -> FileDescriptor {
        FileDescriptor {
            name: name.into(),
            size_bytes: size,
            content_type: "application/pdf".into(),
        }
    }

    #[test]
    fn test_new_resolves_namespace() {
        let new = NewKnowledge::new("alice", "notes").unwrap();
        assert_eq!(new.namespace, "alice/notes");
        assert!(matches!(
            NewKnowledge::new("alice", "a/b"),
            Err(KnowledgeError::InvalidName(_))
        ));
    }

    #[test]
    fn test_serializes_camel_case() {
        let k = Knowledge {
            id: "k1".into(),
            owner: "alice".into(),
            folder_name: "notes".into(),
            namespace: "alice/notes".into(),
            files: vec![pdf("a.pdf", 3)],
        };
        let json = serde_json::to_value(&k).unwrap();
        assert_eq!(json["folderName"], "notes");
        assert_eq!(json["files"][0]["sizeBytes"], 3);
    }

    #[test]
    fn test_merge_replaces_same_name() {
        let mut files = vec![pdf("a.pdf", 1), pdf("b.pdf", 2)];
        merge_files(&mut files, &[pdf("b.pdf", 20), pdf("c.pdf", 3)]);
        let sizes: Vec<u64> = files.iter().map(|f| f.size_bytes).collect();
        assert_eq!(sizes, vec![1, 20, 3]);
    }

    #[tokio::test]
    async fn test_store_lifecycle() {
        let store = InMemoryKnowledgeStore::new();
        let k = store
            .create(NewKnowledge::new("alice", "notes").unwrap())
            .await
            .unwrap();
        store
            .create(NewKnowledge::new("bob", "notes").unwrap())
            .await
            .unwrap();

        assert_eq!(store.get(&k.id).await.unwrap().namespace, "alice/notes");
        assert_eq!(store.list_by_owner("alice").await.unwrap().len(), 1);

        let updated = store.append_files(&k.id, &[pdf("a.pdf", 10)]).await.unwrap();
        assert_eq!(updated.files.len(), 1);
        assert_eq!(updated.namespace, k.namespace);

        assert!(matches!(
            store.get("missing").await,
            Err(KnowledgeError::NotFound(_))
        ));
    }
}
