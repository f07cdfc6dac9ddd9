//! Index store: the shared, queryable cache that reconciliation writes into
//!
//! The filesystem manifest is authoritative; every record here can be rebuilt
//! from it at any time.

pub mod memory;
pub mod sqlite;

use crate::models::IndexRecord;
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::InMemoryIndexStore;
pub use sqlite::SqliteIndexStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode index column: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Index record not found: {0}")]
    NotFound(Uuid),

    #[error("Index record already exists for slug '{0}'")]
    DuplicateSlug(String),

    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt index row: {0}")]
    Corrupt(String),

    #[error("Index worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Create / get-by-slug / update-by-identity over index records
///
/// Implementations provide their own transactional guarantees; each call is
/// one logical write or read.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_by_slug(&self, slug: &str) -> StoreResult<Option<IndexRecord>>;

    /// Insert a new record. Fails with [`StoreError::DuplicateSlug`] if the slug is taken.
    async fn create(&self, record: IndexRecord) -> StoreResult<IndexRecord>;

    /// Overwrite every mapped field of the record identified by `id`.
    ///
    /// The stored identity is kept regardless of `record.id`.
    async fn update(&self, id: Uuid, record: IndexRecord) -> StoreResult<IndexRecord>;

    /// All records, ordered by slug
    async fn list(&self) -> StoreResult<Vec<IndexRecord>>;
}
