//! Vector index backend selection.

use std::sync::Arc;

use anyhow::{bail, Result};

use knowledge_rag_core::index::VectorIndex;

use crate::config::Config;
use crate::pinecone::PineconeIndex;
use crate::retry::RetryPolicy;
use crate::sqlite_index::SqliteIndex;

/// Open the backend named by `index.backend`.
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"sqlite"` | [`SqliteIndex`] at `db.path` |
/// | `"pinecone"` | [`PineconeIndex`] at `index.url` |
pub async fn open_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    let Some(dims) = config.index_dims() else {
        bail!("index.dims (or embedding.dims) must be set to open the vector index");
    };
    match config.index.backend.as_str() {
        "sqlite" => {
            let index = SqliteIndex::open(&config.db.path, dims, config.index.upsert_batch_size)
                .await?
                .with_retry(RetryPolicy::new(
                    config.index.max_retries,
                    config.index.retry_base_ms,
                ));
            Ok(Arc::new(index))
        }
        "pinecone" => Ok(Arc::new(PineconeIndex::from_config(&config.index, dims)?)),
        other => bail!("Unknown index backend: {}", other),
    }
}
