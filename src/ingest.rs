//! Ingestion orchestration.
//!
//! Runs one upload batch through the pipeline in explicit stages:
//!
//! ```text
//! Loading ──▶ Chunking ──▶ Embedding ──▶ Writing
//! (all files)  (one call)   (one logical   (one upsert)
//!                            batch)
//! ```
//!
//! A failure before `Writing` aborts the batch with nothing written. A write
//! that fails after the index confirmed some entries becomes
//! [`IngestError::PartialIngestion`], listing confirmed and unconfirmed ids.
//! Entry ids derive from file name, page and chunk position, so re-running
//! the same batch overwrites rather than duplicates.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use knowledge_rag_core::chunk::{split_documents, ChunkParams};
use knowledge_rag_core::embedding::{check_count, Embedder};
use knowledge_rag_core::error::{IndexError, IngestError, InvalidNameError};
use knowledge_rag_core::index::VectorIndex;
use knowledge_rag_core::models::IndexEntry;

use crate::backend;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::{DocumentLoader, PdfLoader, SourceFile};

/// Pipeline stage, reported to observers as the batch advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Chunking,
    Embedding,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Loading => "loading",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Writing => "writing",
        };
        f.write_str(s)
    }
}

/// What a successful batch produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub namespace: String,
    pub files: usize,
    pub pages: usize,
    pub chunks: usize,
    /// Entries the index confirmed.
    pub entries: usize,
}

#[derive(Clone)]
pub struct IngestPipeline {
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    params: ChunkParams,
}

impl IngestPipeline {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        params: ChunkParams,
    ) -> Self {
        Self {
            loader,
            embedder,
            index,
            params,
        }
    }

    /// PDF loader, configured embedder and configured index backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = backend::open_index(config).await?;
        Ok(Self::new(
            Arc::new(PdfLoader),
            embedder,
            index,
            config.chunking.params()?,
        ))
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Ingest `files` into `namespace`; returns the committed entry count.
    pub async fn ingest(
        &self,
        files: &[SourceFile],
        namespace: &str,
    ) -> Result<usize, IngestError> {
        Ok(self.run(files, namespace, |_| {}).await?.entries)
    }

    /// Run the batch, calling `on_stage` as each stage begins.
    pub async fn run<F>(
        &self,
        files: &[SourceFile],
        namespace: &str,
        on_stage: F,
    ) -> Result<IngestReport, IngestError>
    where
        F: Fn(Stage) + Send + Sync,
    {
        if namespace.trim().is_empty() {
            return Err(InvalidNameError {
                name: namespace.to_string(),
                reason: "namespace must not be empty",
            }
            .into());
        }

        // 1. Load every file before doing anything else.
        on_stage(Stage::Loading);
        let mut docs = Vec::new();
        for file in files {
            let pages = self.loader.load(file).await?;
            debug!(file = %file.name, pages = pages.len(), "loaded");
            docs.extend(pages);
        }

        // 2. One chunking pass over the whole batch.
        on_stage(Stage::Chunking);
        let chunks = split_documents(&docs, self.params);
        let mut report = IngestReport {
            namespace: namespace.to_string(),
            files: files.len(),
            pages: docs.len(),
            chunks: chunks.len(),
            entries: 0,
        };
        if chunks.is_empty() {
            warn!(namespace, files = files.len(), "batch has no extractable text");
            return Ok(report);
        }

        // 3. Embed everything; a short or long response aborts the batch.
        on_stage(Stage::Embedding);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        check_count(texts.len(), vectors.len())?;

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector, namespace))
            .collect();
        warn_duplicate_ids(namespace, &entries);

        // 4. Single upsert.
        on_stage(Stage::Writing);
        report.entries = self
            .index
            .upsert(namespace, &entries)
            .await
            .map_err(|e| write_failure(e, &entries))?;

        info!(
            namespace,
            files = report.files,
            pages = report.pages,
            chunks = report.chunks,
            entries = report.entries,
            "ingested"
        );
        Ok(report)
    }
}

/// Map an upsert failure to the caller-facing error, splitting entry ids
/// into confirmed and unconfirmed when the index reported progress.
fn write_failure(err: IndexError, entries: &[IndexEntry]) -> IngestError {
    match err {
        IndexError::Interrupted { confirmed, source } => {
            let done: HashSet<&str> = confirmed.iter().map(String::as_str).collect();
            let unconfirmed = entries
                .iter()
                .filter(|e| !done.contains(e.id.as_str()))
                .map(|e| e.id.clone())
                .collect();
            IngestError::PartialIngestion {
                confirmed,
                unconfirmed,
                cause: *source,
            }
        }
        other => IngestError::Index(other),
    }
}

fn warn_duplicate_ids(namespace: &str, entries: &[IndexEntry]) {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            warn!(
                namespace,
                file = %entry.metadata.page.source_file,
                "file name appears twice in one batch; later pages overwrite earlier ones"
            );
            return;
        }
    }
}
