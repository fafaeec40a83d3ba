//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings` (OpenAI or any compatible server).
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on an Ollama instance.
//!
//! Use [`create_embedder`] to build the one named in the configuration.
//!
//! # Batching
//!
//! Input texts are split into requests of `batch_size`. Up to
//! `concurrency` requests are in flight at once; the rest wait their turn.
//! Responses are reassembled in input order, and every response must carry
//! exactly as many vectors as its request had texts.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) → retry; exhaustion is [`EmbedError::RateLimited`]
//! - HTTP 5xx and network errors → retry
//! - Other non-2xx → fail immediately with [`EmbedError::Service`]
//! - Malformed 2xx bodies and count mismatches → fail immediately
//! - Backoff: `retry_base_ms` × 1, 2, 4, 8, 16, 32

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use knowledge_rag_core::embedding::{check_count, Embedder};
use knowledge_rag_core::error::EmbedError;

use crate::config::EmbeddingConfig;
use crate::retry::RetryPolicy;

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] (needs `OPENAI_API_KEY`) |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(OpenAIEmbedder::new(config, api_key)?))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

/// Settings shared by the HTTP providers.
#[derive(Debug, Clone)]
struct HttpSettings {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl HttpSettings {
    fn from_config(config: &EmbeddingConfig, default_url: &str) -> Result<Self> {
        let provider = &config.provider;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            retry: RetryPolicy::new(config.max_retries, config.retry_base_ms),
            client,
        })
    }
}

/// Split `texts` into batches, run `call` on up to `concurrency` of them at
/// once, and stitch the results back together in input order.
async fn embed_batched<'a, F, Fut>(
    texts: &'a [String],
    batch_size: usize,
    concurrency: usize,
    call: F,
) -> Result<Vec<Vec<f32>>, EmbedError>
where
    F: Fn(&'a [String]) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Vec<f32>>, EmbedError>>,
{
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let pending: Vec<_> = texts
        .chunks(batch_size)
        .map(|batch| {
            let fut = call(batch);
            async move {
                let vectors = fut.await?;
                check_count(batch.len(), vectors.len())?;
                Ok::<_, EmbedError>(vectors)
            }
        })
        .collect();
    let batches: Vec<Vec<Vec<f32>>> = stream::iter(pending)
        .buffered(concurrency)
        .try_collect()
        .await?;

    let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
    check_count(texts.len(), vectors.len())?;
    Ok(vectors)
}

/// POST `body` to `url`, retrying throttling, server errors and transport
/// failures per `retry`. Returns the parsed JSON of the first 2xx response.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    retry: &RetryPolicy,
) -> Result<Value, EmbedError> {
    let mut last_err = EmbedError::Transport("no attempt made".to_string());

    for attempt in 0..retry.attempts() {
        retry.wait(attempt).await;

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| EmbedError::Malformed(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();

                if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(url, attempt, "embedding service throttled");
                    last_err = EmbedError::RateLimited {
                        attempts: attempt + 1,
                    };
                    continue;
                }

                if status.is_server_error() {
                    warn!(url, attempt, status = status.as_u16(), "embedding service error");
                    last_err = EmbedError::Service {
                        status: status.as_u16(),
                        message: body_text,
                    };
                    continue;
                }

                // Client error other than 429: no retry
                return Err(EmbedError::Service {
                    status: status.as_u16(),
                    message: body_text,
                });
            }
            Err(e) => {
                warn!(url, attempt, error = %e, "embedding request failed");
                last_err = EmbedError::Transport(e.to_string());
            }
        }
    }

    Err(last_err)
}

fn parse_vector(value: &Value) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| EmbedError::Malformed("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Malformed("embedding value is not a number".to_string()))
        })
        .collect()
}

// ============ OpenAI ============

/// OpenAI-compatible embeddings endpoint.
pub struct OpenAIEmbedder {
    settings: HttpSettings,
    api_key: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            settings: HttpSettings::from_config(config, OPENAI_DEFAULT_URL)?,
            api_key: api_key.into(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let s = &self.settings;
        let body = serde_json::json!({
            "model": s.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", s.url);
        let json = post_with_retry(&s.client, &url, Some(&self.api_key), &body, &s.retry).await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }
    fn dims(&self) -> usize {
        self.settings.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(model = %self.settings.model, texts = texts.len(), "embedding via openai");
        embed_batched(
            texts,
            self.settings.batch_size,
            self.settings.concurrency,
            |batch| self.embed_batch(batch),
        )
        .await
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbedError::Malformed("missing embedding".to_string()))?;
        indexed.push((index, parse_vector(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Local Ollama instance (`ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    settings: HttpSettings,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            settings: HttpSettings::from_config(config, OLLAMA_DEFAULT_URL)?,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let s = &self.settings;
        let body = serde_json::json!({
            "model": s.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", s.url);
        let json = post_with_retry(&s.client, &url, None, &body, &s.retry).await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }
    fn dims(&self) -> usize {
        self.settings.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(model = %self.settings.model, texts = texts.len(), "embedding via ollama");
        embed_batched(
            texts,
            self.settings.batch_size,
            self.settings.concurrency,
            |batch| self.embed_batch(batch),
        )
        .await
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing embeddings array".to_string()))?
        .iter()
        .map(parse_vector)
        .collect()
}
