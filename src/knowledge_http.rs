//! HTTP client for the knowledge record store.
//!
//! The store is a small JSON REST service holding one record per knowledge
//! folder:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create | `POST {base}/knowledge` `{owner, folderName, namespace}` |
//! | get | `GET {base}/knowledge/{id}` |
//! | list | `GET {base}/knowledge?owner={owner}` |
//! | record files | `PATCH {base}/knowledge/{id}` `{files}` |

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use knowledge_rag_core::error::KnowledgeError;
use knowledge_rag_core::knowledge::{
    merge_files, FileDescriptor, Knowledge, KnowledgeStore, NewKnowledge,
};

use crate::config::KnowledgeConfig;

pub struct HttpKnowledgeStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKnowledgeStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/knowledge/{}", self.base_url, id)
    }
}

async fn read_json<T: DeserializeOwned>(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
    id: &str,
) -> std::result::Result<T, KnowledgeError> {
    let response = response.map_err(|e| KnowledgeError::Backend(e.to_string()))?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(KnowledgeError::NotFound(id.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(KnowledgeError::Backend(format!("{}: {}", status, body)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| KnowledgeError::Backend(format!("invalid record: {}", e)))
}

#[async_trait]
impl KnowledgeStore for HttpKnowledgeStore {
    async fn create(&self, new: NewKnowledge) -> std::result::Result<Knowledge, KnowledgeError> {
        debug!(owner = %new.owner, folder = %new.folder_name, "creating knowledge record");
        let resp = self
            .client
            .post(format!("{}/knowledge", self.base_url))
            .json(&new)
            .send()
            .await;
        read_json(resp, &new.folder_name).await
    }

    async fn get(&self, id: &str) -> std::result::Result<Knowledge, KnowledgeError> {
        let resp = self.client.get(self.record_url(id)).send().await;
        read_json(resp, id).await
    }

    async fn list_by_owner(
        &self,
        owner: &str,
    ) -> std::result::Result<Vec<Knowledge>, KnowledgeError> {
        let resp = self
            .client
            .get(format!("{}/knowledge", self.base_url))
            .query(&[("owner", owner)])
            .send()
            .await;
        read_json(resp, owner).await
    }

    async fn append_files(
        &self,
        id: &str,
        files: &[FileDescriptor],
    ) -> std::result::Result<Knowledge, KnowledgeError> {
        let mut record = self.get(id).await?;
        merge_files(&mut record.files, files);
        let resp = self
            .client
            .patch(self.record_url(id))
            .json(&serde_json::json!({ "files": record.files }))
            .send()
            .await;
        read_json(resp, id).await
    }
}
