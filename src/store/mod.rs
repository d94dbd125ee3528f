//! Durable chapter store, scoped per `(site, book_id)`.
//!
//! One SQLite file per book holds a single `chapters` table keyed by
//! chapter id. Writes are total upserts: on conflict every column is
//! replaced, including `need_refetch` and `extra`. The pipeline has a
//! single writer (the parse/store worker); exporters read concurrently
//! through [`ChapterStore::get_ordered`].

mod sidecar;

pub use sidecar::{BOOK_INFO_FILENAME, read_book_info, write_book_info};

use std::collections::HashMap;
use std::path::Path;

use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::{Database, DbError};
use crate::models::{ChapterRecord, ExtraMap};

/// Database filename inside a book directory.
pub const CHAPTER_DB_FILENAME: &str = "chapters.sqlite";

/// Errors from chapter store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or migrate the backing database.
    #[error(transparent)]
    Db(#[from] DbError),

    /// A query against the chapters table failed.
    #[error("chapter query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The `extra` payload could not be serialized or deserialized.
    #[error("invalid extra payload for chapter {id}: {source}")]
    Extra {
        /// Chapter id whose payload is invalid.
        id: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure creating the book directory or writing a sidecar.
    #[error("I/O error under {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A sidecar file held JSON that does not parse as the expected type.
    #[error("malformed sidecar {path}: {source}")]
    MalformedSidecar {
        /// The sidecar path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Raw row shape of the `chapters` table.
#[derive(Debug, FromRow)]
struct ChapterRow {
    id: String,
    title: String,
    content: String,
    need_refetch: bool,
    extra: Option<String>,
}

impl ChapterRow {
    fn into_record(self) -> Result<ChapterRecord, StoreError> {
        let extra = match self.extra.as_deref() {
            Some(json) => serde_json::from_str::<ExtraMap>(json).map_err(|source| {
                StoreError::Extra {
                    id: self.id.clone(),
                    source,
                }
            })?,
            None => ExtraMap::new(),
        };
        Ok(ChapterRecord {
            id: self.id,
            title: self.title,
            content: self.content,
            need_refetch: self.need_refetch,
            extra,
        })
    }
}

/// Chapter persistence for one book.
#[derive(Debug, Clone)]
pub struct ChapterStore {
    db: Database,
}

impl ChapterStore {
    /// Opens the chapter store inside `book_dir`, creating the directory
    /// and database file as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created or
    /// [`StoreError::Db`] if the database cannot be opened.
    #[instrument(skip(book_dir), fields(dir = %book_dir.display()))]
    pub async fn open(book_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(book_dir)
            .await
            .map_err(|source| StoreError::Io {
                path: book_dir.display().to_string(),
                source,
            })?;
        let db = Database::open(&book_dir.join(CHAPTER_DB_FILENAME)).await?;
        Ok(Self { db })
    }

    /// Opens an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] if the in-memory database cannot be set up.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory().await?,
        })
    }

    /// Inserts or fully replaces the record with the same id.
    ///
    /// `INSERT OR REPLACE` executes as one atomic row operation. REPLACE
    /// deletes and re-inserts, which would invalidate foreign keys and
    /// AUTOINCREMENT elsewhere; this table has neither.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Extra`] if the extra map fails to serialize,
    /// or [`StoreError::Query`] on database failure.
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub async fn upsert(&self, record: &ChapterRecord) -> Result<(), StoreError> {
        let extra = if record.extra.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&record.extra).map_err(|source| StoreError::Extra {
                    id: record.id.clone(),
                    source,
                })?,
            )
        };

        sqlx::query(
            "INSERT OR REPLACE INTO chapters (id, title, content, need_refetch, extra) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.content)
        .bind(record.need_refetch)
        .bind(extra)
        .execute(self.db.pool())
        .await?;

        debug!(id = %record.id, need_refetch = record.need_refetch, "chapter upserted");
        Ok(())
    }

    /// Point read of a chapter record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn get(&self, id: &str) -> Result<Option<ChapterRecord>, StoreError> {
        let row = sqlx::query_as::<_, ChapterRow>(
            "SELECT id, title, content, need_refetch, extra FROM chapters WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(ChapterRow::into_record).transpose()
    }

    /// Whether a record exists for `id` with `need_refetch == false`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn exists_complete(&self, id: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM chapters WHERE id = ? AND need_refetch = 0")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Reads the stored records for `order`, returned in that order.
    ///
    /// Chapters missing from the store are skipped, so exporters see the
    /// catalog order restricted to what was actually fetched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn get_ordered(&self, order: &[String]) -> Result<Vec<ChapterRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ChapterRow>(
            "SELECT id, title, content, need_refetch, extra FROM chapters",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut by_id: HashMap<String, ChapterRecord> = HashMap::with_capacity(rows.len());
        for row in rows {
            let record = row.into_record()?;
            by_id.insert(record.id.clone(), record);
        }

        Ok(order.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Number of stored chapters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on database failure.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chapters")
            .fetch_one(self.db.pool())
            .await?;
        #[allow(clippy::cast_sign_loss)]
        Ok(row.0 as u64)
    }

    /// Closes the backing database pool.
    pub async fn close(self) {
        self.db.close().await;
    }
}
