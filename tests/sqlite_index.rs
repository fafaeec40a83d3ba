//! SQLite vector index on a temporary database.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqliteConnection};
use tempfile::TempDir;

use knowledge_rag::migrate::migrate_pool;
use knowledge_rag::retry::RetryPolicy;
use knowledge_rag::sqlite_index::SqliteIndex;
use knowledge_rag_core::error::IndexError;
use knowledge_rag_core::index::VectorIndex;
use knowledge_rag_core::models::{entry_id, EntryMetadata, IndexEntry, PageMetadata};

fn entry(namespace: &str, file: &str, page: u32, text: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        id: entry_id(file, page, 0),
        vector,
        text: text.to_string(),
        metadata: EntryMetadata {
            page: PageMetadata {
                source_file: file.to_string(),
                page_number: page,
                total_pages: 4,
            },
            chunk_index: 0,
        },
        namespace: namespace.to_string(),
    }
}

async fn open(tmp: &TempDir, batch_size: usize) -> SqliteIndex {
    SqliteIndex::open(&tmp.path().join("data/kb.sqlite"), 3, batch_size)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upsert_then_query_ranks_by_similarity() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp, 2).await;
    let ns = "alice/notes";
    let entries = vec![
        entry(ns, "a.pdf", 1, "mostly x", vec![1.0, 0.1, 0.0]),
        entry(ns, "a.pdf", 2, "mostly y", vec![0.0, 1.0, 0.1]),
        entry(ns, "a.pdf", 3, "mostly z", vec![0.1, 0.0, 1.0]),
        entry(ns, "b.pdf", 1, "x and y", vec![1.0, 1.0, 0.0]),
    ];
    assert_eq!(index.upsert(ns, &entries).await.unwrap(), 4);
    assert_eq!(index.count(ns).await.unwrap(), 4);

    let hits = index.query(ns, &[1.0, 0.0, 0.0], 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].entry.text, "mostly x");
    assert_eq!(hits[1].entry.text, "x and y");
    assert!(hits[0].score >= hits[1].score);

    let top = &hits[0].entry;
    assert_eq!(top.metadata.page.source_file, "a.pdf");
    assert_eq!(top.metadata.page.page_number, 1);
    assert_eq!(top.metadata.page.total_pages, 4);
    assert_eq!(top.vector, vec![1.0, 0.1, 0.0]);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp, 100).await;
    for owner in ["alice", "bob"] {
        let ns = format!("{}/notes", owner);
        index
            .upsert(&ns, &[entry(&ns, "a.pdf", 1, owner, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
    }

    let hits = index.query("alice/notes", &[1.0, 0.0, 0.0], 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.text, "alice");
    assert!(index.query("carol/notes", &[1.0, 0.0, 0.0], 10).await.unwrap().is_empty());
    assert_eq!(index.count("carol/notes").await.unwrap(), 0);
}

#[tokio::test]
async fn test_same_id_overwrites() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp, 100).await;
    let ns = "alice/notes";
    index
        .upsert(ns, &[entry(ns, "a.pdf", 1, "old text", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();
    index
        .upsert(ns, &[entry(ns, "a.pdf", 1, "new text", vec![0.0, 1.0, 0.0])])
        .await
        .unwrap();

    assert_eq!(index.count(ns).await.unwrap(), 1);
    let hits = index.query(ns, &[0.0, 1.0, 0.0], 5).await.unwrap();
    assert_eq!(hits[0].entry.text, "new text");
}

#[tokio::test]
async fn test_dimension_mismatch_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp, 1).await;
    let ns = "alice/notes";
    let entries = vec![
        entry(ns, "a.pdf", 1, "ok", vec![1.0, 0.0, 0.0]),
        entry(ns, "a.pdf", 2, "too short", vec![1.0, 0.0]),
    ];

    let err = index.upsert(ns, &entries).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::DimensionMismatch {
            expected: 3,
            actual: 2,
            ..
        }
    ));
    assert_eq!(index.count(ns).await.unwrap(), 0);
}

#[tokio::test]
async fn test_query_vector_dimension_checked() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp, 100).await;
    assert!(matches!(
        index.query("ns", &[1.0], 3).await.unwrap_err(),
        IndexError::DimensionMismatch { .. }
    ));
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let ns = "alice/notes";
    {
        let index = open(&tmp, 100).await;
        index
            .upsert(ns, &[entry(ns, "a.pdf", 1, "persisted", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        index.pool().close().await;
    }
    let index = open(&tmp, 100).await;
    let hits = index.query(ns, &[0.0, 0.0, 1.0], 1).await.unwrap();
    assert_eq!(hits[0].entry.text, "persisted");
}

#[tokio::test]
async fn test_failed_batch_reports_committed_ids() {
    let tmp = TempDir::new().unwrap();
    let index = open(&tmp, 2).await;
    sqlx::query(
        r#"
        CREATE TRIGGER reject_poison BEFORE INSERT ON index_entries
        WHEN NEW.text = 'poison'
        BEGIN SELECT RAISE(ABORT, 'poisoned entry'); END
        "#,
    )
    .execute(index.pool())
    .await
    .unwrap();

    let ns = "alice/notes";
    let entries = vec![
        entry(ns, "a.pdf", 1, "one", vec![1.0, 0.0, 0.0]),
        entry(ns, "a.pdf", 2, "two", vec![1.0, 0.0, 0.0]),
        entry(ns, "a.pdf", 3, "three", vec![1.0, 0.0, 0.0]),
        entry(ns, "a.pdf", 4, "poison", vec![1.0, 0.0, 0.0]),
    ];

    let err = index.upsert(ns, &entries).await.unwrap_err();
    assert_eq!(err.confirmed_ids(), &[entries[0].id.clone(), entries[1].id.clone()]);
    assert!(matches!(err.root(), IndexError::Rejected(_)));
    // The failed batch rolled back as a whole.
    assert_eq!(index.count(ns).await.unwrap(), 2);
}

fn no_wait_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::ZERO)
}

/// An index that sees SQLITE_BUSY at once instead of waiting on the lock.
async fn open_impatient(path: &Path, retry: RetryPolicy) -> SqliteIndex {
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(no_wait_options(path))
        .await
        .unwrap();
    migrate_pool(&pool).await.unwrap();
    SqliteIndex::new(pool, 3, 100).with_retry(retry)
}

/// A second connection holding the write lock.
async fn lock_writes(path: &Path) -> SqliteConnection {
    let mut conn = no_wait_options(path).connect().await.unwrap();
    sqlx::query("BEGIN EXCLUSIVE").execute(&mut conn).await.unwrap();
    conn
}

#[tokio::test]
async fn test_busy_database_is_retried_until_lock_clears() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");
    let index = open_impatient(&path, RetryPolicy::new(8, 50)).await;
    let mut holder = lock_writes(&path).await;

    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        sqlx::query("COMMIT").execute(&mut holder).await.unwrap();
        holder
    });

    let ns = "alice/notes";
    let written = index
        .upsert(ns, &[entry(ns, "a.pdf", 1, "waited", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(written, 1);
    release.await.unwrap();
    assert_eq!(index.count(ns).await.unwrap(), 1);
}

#[tokio::test]
async fn test_busy_database_gives_up_as_unavailable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");
    let index = open_impatient(&path, RetryPolicy::new(2, 10)).await;
    let _holder = lock_writes(&path).await;

    let ns = "alice/notes";
    let err = index
        .upsert(ns, &[entry(ns, "a.pdf", 1, "blocked", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Unavailable(_)), "{:?}", err);
    assert!(err.confirmed_ids().is_empty());
}
