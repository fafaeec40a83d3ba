//! SQLite-backed [`VectorIndex`].
//!
//! Entries live in the `index_entries` table keyed by `(namespace, id)`,
//! embeddings stored as little-endian `f32` BLOBs. Queries load the
//! namespace's vectors and rank them by cosine similarity in Rust.
//!
//! Upserts are written in transactions of `batch_size` entries. If a later
//! transaction fails, the ids committed by earlier ones are reported through
//! [`IndexError::Interrupted`]. Busy or locked databases and lost
//! connections count as [`IndexError::Unavailable`] and are retried with
//! backoff before a batch gives up.

use std::future::Future;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use knowledge_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use knowledge_rag_core::error::IndexError;
use knowledge_rag_core::index::{rank, validate_entries, validate_query, VectorIndex};
use knowledge_rag_core::models::{EntryMetadata, IndexEntry, PageMetadata, ScoredEntry};

use crate::db;
use crate::migrate;
use crate::retry::RetryPolicy;

pub struct SqliteIndex {
    pool: SqlitePool,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl SqliteIndex {
    /// Wrap an already-migrated pool. No retries until [`Self::with_retry`].
    pub fn new(pool: SqlitePool, dims: usize, batch_size: usize) -> Self {
        Self {
            pool,
            dims,
            batch_size: batch_size.max(1),
            retry: RetryPolicy::new(0, 0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Open the database at `path`, creating tables if needed.
    pub async fn open(path: &Path, dims: usize, batch_size: usize) -> Result<Self> {
        let pool = db::open(path).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool, dims, batch_size))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `op` until it succeeds, fails with anything other than
    /// `Unavailable`, or the retry budget runs out.
    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexError>>,
    {
        let mut last_err = IndexError::Unavailable("no attempt made".to_string());
        for attempt in 0..self.retry.attempts() {
            self.retry.wait(attempt).await;
            match op().await {
                Err(IndexError::Unavailable(reason)) => {
                    warn!(what, attempt = attempt + 1, %reason, "sqlite unavailable, will retry");
                    last_err = IndexError::Unavailable(reason);
                }
                result => return result,
            }
        }
        Err(last_err)
    }

    async fn write_batch(&self, namespace: &str, batch: &[IndexEntry]) -> Result<(), IndexError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for entry in batch {
            let page = &entry.metadata.page;
            sqlx::query(
                r#"
                INSERT INTO index_entries
                    (namespace, id, source_file, page_number, total_pages, chunk_index,
                     text, dims, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    source_file = excluded.source_file,
                    page_number = excluded.page_number,
                    total_pages = excluded.total_pages,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(namespace)
            .bind(&entry.id)
            .bind(&page.source_file)
            .bind(page.page_number as i64)
            .bind(page.total_pages as i64)
            .bind(entry.metadata.chunk_index as i64)
            .bind(&entry.text)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> IndexError {
    match e {
        sqlx::Error::Database(db) if is_busy(db.as_ref()) => {
            IndexError::Unavailable(db.to_string())
        }
        sqlx::Error::Database(db) => IndexError::Rejected(db.to_string()),
        other => IndexError::Unavailable(other.to_string()),
    }
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended codes.
fn is_busy(db: &dyn sqlx::error::DatabaseError) -> bool {
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize, IndexError> {
        validate_entries(self.dims, namespace, entries)?;

        let mut confirmed: Vec<String> = Vec::with_capacity(entries.len());
        for batch in entries.chunks(self.batch_size) {
            let written = self
                .retrying("upsert", move || self.write_batch(namespace, batch))
                .await;
            if let Err(e) = written {
                return Err(IndexError::interrupted(confirmed, e));
            }
            confirmed.extend(batch.iter().map(|e| e.id.clone()));
        }
        debug!(namespace, written = confirmed.len(), "sqlite upsert");
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

        let pool = &self.pool;
        let rows = self
            .retrying("query", move || async move {
                sqlx::query(
                    r#"
                    SELECT id, source_file, page_number, total_pages, chunk_index, text,
                           embedding
                    FROM index_entries
                    WHERE namespace = ?
                    "#,
                )
                .bind(namespace)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx)
            })
            .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let score = cosine_similarity(vector, &stored);
                let page_number: i64 = row.get("page_number");
                let total_pages: i64 = row.get("total_pages");
                let chunk_index: i64 = row.get("chunk_index");
                ScoredEntry {
                    entry: IndexEntry {
                        id: row.get("id"),
                        vector: stored,
                        text: row.get("text"),
                        metadata: EntryMetadata {
                            page: PageMetadata {
                                source_file: row.get("source_file"),
                                page_number: page_number as u32,
                                total_pages: total_pages as u32,
                            },
                            chunk_index: chunk_index as u32,
                        },
                        namespace: namespace.to_string(),
                    },
                    score,
                }
            })
            .collect();

        Ok(rank(candidates, top_k))
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let pool = &self.pool;
        let n: i64 = self
            .retrying("count", move || async move {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM index_entries WHERE namespace = ?",
                )
                .bind(namespace)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx)
            })
            .await?;
        Ok(n as usize)
    }
}
