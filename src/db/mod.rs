//! Product storage: upsert-by-key over a products table, a one-to-many
//! nutrients table and an append-only run-stats table.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::models::product::{ProductRecord, StorageId};
use crate::models::run::RunStats;

pub mod document_store;
pub mod queries;

pub use document_store::JsonDocumentStore;
pub use queries::PgProductStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Key-value persistence for normalized products.
///
/// Implementations must keep `key` unique: writing a record whose key is
/// already stored replaces its fields and keeps its storage id.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert or replace one record. Returns its storage id.
    async fn upsert_one(&self, record: &ProductRecord) -> Result<StorageId, StoreError>;

    /// Insert new keys in bulk and update existing ones individually.
    ///
    /// Duplicate keys within `records` collapse to the last occurrence.
    /// Returns the storage ids of all affected records.
    async fn upsert_many(&self, records: &[ProductRecord]) -> Result<Vec<StorageId>, StoreError>;

    /// Every key currently stored, including those written by earlier processes.
    async fn existing_keys(&self) -> Result<HashSet<String>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<ProductRecord>, StoreError>;

    async fn product_count(&self) -> Result<usize, StoreError>;

    /// Append one run's statistics.
    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError>;

    /// Release the underlying connection or file handle.
    async fn close(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Cannot store a product without a key")]
    MissingKey,
}

/// Collapse duplicate keys, keeping first-seen order and the last-seen record.
/// Records without a key are dropped.
pub(crate) fn dedup_by_key(records: &[ProductRecord]) -> Vec<&ProductRecord> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<&ProductRecord> = Vec::with_capacity(records.len());

    for record in records {
        if record.key.is_empty() {
            tracing::warn!("Skipping product without a key");
            continue;
        }
        match positions.get(record.key.as_str()) {
            Some(&idx) => out[idx] = record,
            None => {
                positions.insert(record.key.as_str(), out.len());
                out.push(record);
            }
        }
    }

    out
}
