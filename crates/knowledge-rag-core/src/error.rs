//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Every stage has its own error enum so callers can tell an unreadable
//! upload from a throttled embedding service or a lost index connection.
//! [`IngestError`] is what the orchestrator surfaces; it wraps the stage
//! errors and adds [`IngestError::PartialIngestion`] for writes that were
//! interrupted after some entries were confirmed.

use thiserror::Error;

/// A source file could not be turned into per-page documents.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{file}: not a PDF document")]
    NotPdf { file: String },

    #[error("{file}: PDF is encrypted and no key was supplied")]
    Encrypted { file: String },

    #[error("{file}: PDF could not be decrypted with the supplied key: {reason}")]
    Decrypt { file: String, reason: String },

    #[error("{file}: unreadable PDF: {reason}")]
    Corrupt { file: String, reason: String },

    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractionError {
    /// The original (user-facing) name of the file that failed.
    pub fn file(&self) -> &str {
        match self {
            ExtractionError::NotPdf { file }
            | ExtractionError::Encrypted { file }
            | ExtractionError::Decrypt { file, .. }
            | ExtractionError::Corrupt { file, .. }
            | ExtractionError::Io { file, .. } => file,
        }
    }
}

/// Invalid pipeline settings. Raised while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    InvalidChunking { chunk_size: usize, overlap: usize },

    #[error("{0}")]
    Invalid(String),
}

/// A folder or owner name that cannot be bound to a namespace.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid name {name:?}: {reason}")]
pub struct InvalidNameError {
    pub name: String,
    pub reason: &'static str,
}

/// Failure talking to the remote embedding service.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Non-2xx response that is not throttling.
    #[error("embedding service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// Still throttled after the configured number of attempts.
    #[error("embedding service kept throttling after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Response vector count differs from the request. Never retried.
    #[error("embedding response carried {actual} vectors for {expected} inputs")]
    Protocol { expected: usize, actual: usize },

    /// 2xx response whose body is not the documented shape.
    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("embedding service unreachable: {0}")]
    Transport(String),

    #[error("embedding provider is disabled")]
    Disabled,
}

/// Failure reading from or writing to the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Connectivity loss or backend outage. Transient.
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("entry {id} has dimension {actual}, index declares {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("vector index rejected the request: {0}")]
    Rejected(String),

    /// A multi-batch upsert stopped part way; `confirmed` lists the ids
    /// the backend acknowledged before `source` occurred.
    #[error("upsert interrupted after {} confirmed entries: {source}", .confirmed.len())]
    Interrupted {
        confirmed: Vec<String>,
        #[source]
        source: Box<IndexError>,
    },
}

impl IndexError {
    /// Wrap `source` with the ids confirmed so far. With nothing confirmed
    /// the original error is returned unchanged.
    pub fn interrupted(confirmed: Vec<String>, source: IndexError) -> Self {
        if confirmed.is_empty() {
            source
        } else {
            IndexError::Interrupted {
                confirmed,
                source: Box::new(source),
            }
        }
    }

    /// Ids the backend acknowledged before failing (empty unless interrupted).
    pub fn confirmed_ids(&self) -> &[String] {
        match self {
            IndexError::Interrupted { confirmed, .. } => confirmed,
            _ => &[],
        }
    }

    /// The underlying cause, looking through [`IndexError::Interrupted`].
    pub fn root(&self) -> &IndexError {
        match self {
            IndexError::Interrupted { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Failure of an ingestion batch, as seen by the caller of `ingest`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Write failed with nothing confirmed. The batch left no trace.
    #[error("vector index write failed: {0}")]
    Index(IndexError),

    /// Write failed after some entries were confirmed. Re-running the
    /// same batch is safe: upserts overwrite by id.
    #[error(
        "partial ingestion: {} of {} entries confirmed before failure: {cause}",
        .confirmed.len(),
        .confirmed.len() + .unconfirmed.len()
    )]
    PartialIngestion {
        confirmed: Vec<String>,
        unconfirmed: Vec<String>,
        #[source]
        cause: IndexError,
    },

    #[error("ingestion task failed: {0}")]
    Task(String),
}

/// Failure answering a retrieval request.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector index query failed: {0}")]
    Index(#[from] IndexError),
}

/// Failure of the knowledge record store.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("knowledge record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error("knowledge store error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_without_confirmations_is_the_cause() {
        let err = IndexError::interrupted(vec![], IndexError::Unavailable("down".into()));
        assert!(matches!(err, IndexError::Unavailable(_)));
        assert!(err.confirmed_ids().is_empty());
    }

    #[test]
    fn interrupted_keeps_confirmed_ids_and_root() {
        let err = IndexError::interrupted(
            vec!["a".into(), "b".into()],
            IndexError::Unavailable("down".into()),
        );
        assert_eq!(err.confirmed_ids(), ["a".to_string(), "b".to_string()]);
        assert!(matches!(err.root(), IndexError::Unavailable(_)));
        assert!(err.to_string().contains("2 confirmed"));
    }

    #[test]
    fn partial_ingestion_message_counts_entries() {
        let err = IngestError::PartialIngestion {
            confirmed: vec!["a".into(); 8],
            unconfirmed: vec!["b".into(); 2],
            cause: IndexError::Unavailable("timeout".into()),
        };
        assert!(err.to_string().contains("8 of 10"));
    }
}
