//! Upload boundary.
//!
//! [`UploadService::accept`] takes files already spooled to disk for a
//! knowledge folder, starts a background ingestion job into the folder's
//! stored namespace and returns without waiting. When the job succeeds the
//! uploaded files are recorded on the knowledge record; when it fails the
//! record is left alone and the failure stays on the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use knowledge_rag_core::error::KnowledgeError;
use knowledge_rag_core::knowledge::{FileDescriptor, Knowledge, KnowledgeStore};

use crate::extract::{SourceFile, MIME_PDF};
use crate::jobs::{IngestJobs, JobState};

/// A file received for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: PathBuf,
    /// Original file name as the user uploaded it.
    pub name: String,
    pub size_bytes: u64,
    pub content_type: String,
}

impl UploadedFile {
    /// Describe a PDF on disk, named after its final path component.
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let source = SourceFile::new(path);
        Ok(Self {
            path: source.path,
            name: source.name,
            size_bytes: meta.len(),
            content_type: MIME_PDF.to_string(),
        })
    }

    fn descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            content_type: self.content_type.clone(),
        }
    }
}

/// Handle returned by [`UploadService::accept`].
pub struct Accepted {
    pub job_id: Uuid,
    pub namespace: String,
    /// Resolves once the job finished and, on success, the record was
    /// updated. `Ok(None)` means the job failed and nothing was recorded.
    pub recorded: JoinHandle<Result<Option<Knowledge>, KnowledgeError>>,
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn KnowledgeStore>,
    jobs: IngestJobs,
}

impl UploadService {
    pub fn new(store: Arc<dyn KnowledgeStore>, jobs: IngestJobs) -> Self {
        Self { store, jobs }
    }

    pub fn jobs(&self) -> &IngestJobs {
        &self.jobs
    }

    /// Start ingesting `files` into the knowledge folder `knowledge_id`.
    ///
    /// Fails only if the record cannot be read; ingestion errors are
    /// reported through the job.
    pub async fn accept(
        &self,
        knowledge_id: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Accepted, KnowledgeError> {
        let record = self.store.get(knowledge_id).await?;
        let namespace = record.namespace.clone();

        let descriptors: Vec<FileDescriptor> = files.iter().map(UploadedFile::descriptor).collect();
        let sources: Vec<SourceFile> = files
            .into_iter()
            .map(|f| SourceFile::named(f.path, f.name))
            .collect();

        let job_id = self.jobs.submit(sources, namespace.clone());
        info!(knowledge = %record.id, job = %job_id, namespace = %namespace, "upload accepted");

        let jobs = self.jobs.clone();
        let store = self.store.clone();
        let id = record.id;
        let recorded = tokio::spawn(async move {
            let finished = jobs.wait(job_id).await;
            match finished.map(|s| s.state) {
                Some(JobState::Succeeded { .. }) => {
                    let updated = store.append_files(&id, &descriptors).await;
                    if let Err(e) = &updated {
                        error!(
                            knowledge = %id,
                            job = %job_id,
                            error = %e,
                            "failed to record uploaded files"
                        );
                    }
                    updated.map(Some)
                }
                _ => Ok(None),
            }
        });

        Ok(Accepted {
            job_id,
            namespace,
            recorded,
        })
    }
}
