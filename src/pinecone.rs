//! Pinecone-backed [`VectorIndex`].
//!
//! Speaks the data-plane REST API of a single Pinecone index host:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upsert | `POST {host}/vectors/upsert` `{vectors, namespace}` |
//! | query | `POST {host}/query` `{namespace, vector, topK, includeMetadata, includeValues}` |
//! | count | `POST {host}/describe_index_stats` |
//!
//! Chunk text is stored in metadata under `text` next to the page fields.
//! Requests are retried with backoff on 429, 5xx and connection failures;
//! other 4xx responses are rejections and fail at once. A multi-batch
//! upsert that fails part way reports the ids of the batches Pinecone
//! acknowledged.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use knowledge_rag_core::error::IndexError;
use knowledge_rag_core::index::{rank, validate_entries, validate_query, VectorIndex};
use knowledge_rag_core::models::{EntryMetadata, IndexEntry, PageMetadata, ScoredEntry};

use crate::config::IndexConfig;
use crate::retry::RetryPolicy;

pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: StoredMetadata<'a>,
}

#[derive(Serialize)]
struct StoredMetadata<'a> {
    text: &'a str,
    #[serde(flatten)]
    entry: &'a EntryMetadata,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct Match {
    id: String,
    score: f32,
    #[serde(default)]
    values: Vec<f32>,
    metadata: Option<MatchMetadata>,
}

/// Pinecone hands numeric metadata back as floats.
#[derive(Deserialize)]
struct MatchMetadata {
    #[serde(default)]
    text: String,
    source_file: String,
    page_number: f64,
    total_pages: f64,
    chunk_index: f64,
}

impl MatchMetadata {
    fn entry(&self) -> EntryMetadata {
        EntryMetadata {
            page: PageMetadata {
                source_file: self.source_file.clone(),
                page_number: self.page_number as u32,
                total_pages: self.total_pages as u32,
            },
            chunk_index: self.chunk_index as u32,
        }
    }
}

impl PineconeIndex {
    pub fn new(
        host: impl Into<String>,
        api_key: impl Into<String>,
        dims: usize,
        batch_size: usize,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            dims,
            batch_size: batch_size.max(1),
            retry,
        })
    }

    /// Build from `[index]` settings; the key comes from `PINECONE_API_KEY`.
    pub fn from_config(config: &IndexConfig, dims: usize) -> Result<Self> {
        let host = config
            .url
            .clone()
            .context("index.url required for pinecone backend")?;
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow::anyhow!("PINECONE_API_KEY environment variable not set"))?;
        Self::new(
            host,
            api_key,
            dims,
            config.upsert_batch_size,
            RetryPolicy::new(config.max_retries, config.retry_base_ms),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, IndexError> {
        let url = format!("{}{}", self.host, path);
        let mut last_err = IndexError::Unavailable("no attempt made".to_string());

        for attempt in 0..self.retry.attempts() {
            self.retry.wait(attempt).await;

            let resp = self
                .client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| IndexError::Rejected(format!("invalid response: {}", e)));
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(
                            url = %url,
                            attempt,
                            status = status.as_u16(),
                            "pinecone unavailable"
                        );
                        last_err = IndexError::Unavailable(format!("{}: {}", status, body_text));
                        continue;
                    }
                    return Err(IndexError::Rejected(format!("{}: {}", status, body_text)));
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "pinecone request failed");
                    last_err = IndexError::Unavailable(e.to_string());
                }
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize, IndexError> {
        validate_entries(self.dims, namespace, entries)?;

        let mut confirmed: Vec<String> = Vec::with_capacity(entries.len());
        for batch in entries.chunks(self.batch_size) {
            let vectors: Vec<UpsertVector<'_>> = batch
                .iter()
                .map(|e| UpsertVector {
                    id: &e.id,
                    values: &e.vector,
                    metadata: StoredMetadata {
                        text: &e.text,
                        entry: &e.metadata,
                    },
                })
                .collect();
            let body = serde_json::json!({
                "vectors": vectors,
                "namespace": namespace,
            });
            if let Err(e) = self.post("/vectors/upsert", &body).await {
                return Err(IndexError::interrupted(confirmed, e));
            }
            confirmed.extend(batch.iter().map(|e| e.id.clone()));
        }
        debug!(namespace, written = confirmed.len(), "pinecone upsert");
        Ok(confirmed.len())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        validate_query(self.dims, vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "namespace": namespace,
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": true,
        });
        let json = self.post("/query", &body).await?;
        let response: QueryResponse = serde_json::from_value(json)
            .map_err(|e| IndexError::Rejected(format!("invalid query response: {}", e)))?;

        let mut hits = Vec::with_capacity(response.matches.len());
        for m in response.matches {
            let Some(meta) = m.metadata else {
                warn!(id = %m.id, "pinecone match without metadata, skipping");
                continue;
            };
            let metadata = meta.entry();
            hits.push(ScoredEntry {
                entry: IndexEntry {
                    id: m.id,
                    vector: m.values,
                    text: meta.text,
                    metadata,
                    namespace: namespace.to_string(),
                },
                score: m.score,
            });
        }
        Ok(rank(hits, top_k))
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let json = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .await?;
        Ok(json
            .get("namespaces")
            .and_then(|n| n.get(namespace))
            .and_then(|n| n.get("vectorCount"))
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as usize)
    }
}
