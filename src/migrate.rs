use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the index tables on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per (namespace, entry id); re-ingesting overwrites.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            source_file TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            total_pages INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_entries_source ON index_entries(namespace, source_file)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
