//! Background ingestion jobs.
//!
//! [`IngestJobs::submit`] returns a job id at once and runs the pipeline on
//! a tokio task. Each job's status lives in a `tokio::sync::watch` channel,
//! so callers can poll it with [`IngestJobs::status`] or park on
//! [`IngestJobs::wait`] until the job finishes. Failures are logged and kept
//! on the job; they are never only logged.
//!
//! Finished jobs stay queryable for the retention window (one hour unless
//! set with [`IngestJobs::with_retention`]) and are pruned on the next
//! submit. [`IngestJobs::forget`] drops a finished job right away.
//!
//! ```text
//! Queued ──▶ Running(loading → chunking → embedding → writing)
//!                 ├──▶ Succeeded { report }
//!                 └──▶ Failed { error, confirmed_ids }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use knowledge_rag_core::error::IngestError;

use crate::extract::SourceFile;
use crate::ingest::{IngestPipeline, IngestReport, Stage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        stage: Stage,
    },
    Succeeded {
        report: IngestReport,
    },
    Failed {
        error: String,
        /// Entry ids the index confirmed before a partial write failed.
        confirmed_ids: Vec<String>,
    },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }

    fn from_result(result: &Result<IngestReport, IngestError>) -> Self {
        match result {
            Ok(report) => JobState::Succeeded {
                report: report.clone(),
            },
            Err(err) => JobState::Failed {
                error: err.to_string(),
                confirmed_ids: match err {
                    IngestError::PartialIngestion { confirmed, .. } => confirmed.clone(),
                    _ => Vec::new(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub namespace: String,
    pub files: Vec<String>,
    #[serde(flatten)]
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type Registry = HashMap<Uuid, Arc<watch::Sender<JobStatus>>>;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Registry of submitted ingestion jobs.
#[derive(Clone)]
pub struct IngestJobs {
    pipeline: IngestPipeline,
    jobs: Arc<RwLock<Registry>>,
    retention: Duration,
}

impl IngestJobs {
    pub fn new(pipeline: IngestPipeline) -> Self {
        Self {
            pipeline,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_RETENTION,
        }
    }

    /// How long a finished job is kept before the next submit prunes it.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Queue `files` for ingestion into `namespace` and return immediately.
    pub fn submit(&self, files: Vec<SourceFile>, namespace: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        let namespace = namespace.into();
        let now = Utc::now();
        let (tx, _rx) = watch::channel(JobStatus {
            id,
            namespace: namespace.clone(),
            files: files.iter().map(|f| f.name.clone()).collect(),
            state: JobState::Queued,
            submitted_at: now,
            updated_at: now,
        });
        let tx = Arc::new(tx);
        {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            let before = jobs.len();
            jobs.retain(|_, job| !self.expired(&job.borrow(), now));
            if jobs.len() < before {
                debug!(pruned = before - jobs.len(), "pruned finished jobs");
            }
            jobs.insert(id, tx.clone());
        }

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let progress = tx.clone();
            let run = tokio::spawn(async move {
                pipeline
                    .run(&files, &namespace, |stage| {
                        set_state(&progress, JobState::Running { stage });
                    })
                    .await
            });
            let result = match run.await {
                Ok(result) => result,
                Err(join) => Err(IngestError::Task(join.to_string())),
            };
            match &result {
                Ok(report) => info!(job = %id, entries = report.entries, "ingestion job succeeded"),
                Err(err) => error!(job = %id, error = %err, "ingestion job failed"),
            }
            set_state(&tx, JobState::from_result(&result));
        });

        info!(job = %id, "ingestion job submitted");
        id
    }

    /// Current status of job `id`.
    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.sender(id).map(|tx| tx.borrow().clone())
    }

    /// Wait until job `id` has finished and return its final status.
    pub async fn wait(&self, id: Uuid) -> Option<JobStatus> {
        let mut rx = self.sender(id)?.subscribe();
        let finished = rx
            .wait_for(|s| s.state.is_finished())
            .await
            .map(|s| (*s).clone());
        // Sender dropped: report whatever was last recorded.
        Some(finished.unwrap_or_else(|_| rx.borrow().clone()))
    }

    /// Every known job, oldest first.
    pub fn list(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<JobStatus> = jobs.values().map(|tx| tx.borrow().clone()).collect();
        all.sort_by_key(|s| s.submitted_at);
        all
    }

    /// Drop finished job `id` and return its final status. Jobs still
    /// queued or running are kept and `None` is returned.
    pub fn forget(&self, id: Uuid) -> Option<JobStatus> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let status = jobs.get(&id)?.borrow().clone();
        if !status.state.is_finished() {
            return None;
        }
        jobs.remove(&id);
        Some(status)
    }

    fn expired(&self, status: &JobStatus, now: DateTime<Utc>) -> bool {
        status.state.is_finished()
            && (now - status.updated_at)
                .to_std()
                .is_ok_and(|age| age >= self.retention)
    }

    fn sender(&self, id: Uuid) -> Option<Arc<watch::Sender<JobStatus>>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }
}

fn set_state(tx: &watch::Sender<JobStatus>, state: JobState) {
    tx.send_modify(|status| {
        status.state = state;
        status.updated_at = Utc::now();
    });
}
