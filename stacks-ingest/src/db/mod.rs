//! Persistence seams
//!
//! The pipelines talk to storage through these traits so tests can wrap or
//! replace the SQLite implementation (for example to inject a failing commit).

pub mod settings;
pub mod sqlite_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stacks_common::db::{Library, ProductionRecord, QuarantineRecord, RecordStatus, StagingRecord};
use stacks_common::Result;
use uuid::Uuid;

pub use sqlite_store::SqliteStore;

/// Library roots (inbound, staging, production pools)
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn insert_library(&self, library: &Library) -> Result<()>;
    async fn get_library(&self, id: Uuid) -> Result<Option<Library>>;
    async fn find_library_by_name(&self, name: &str) -> Result<Option<Library>>;
    async fn list_libraries(&self) -> Result<Vec<Library>>;
    async fn set_library_locked(&self, id: Uuid, locked: bool) -> Result<()>;
    /// Sum of committed item sizes placed in the library
    async fn library_usage_bytes(&self, id: Uuid) -> Result<u64>;
}

/// Staging and production item rows plus the processed-file ledger
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Write a pending staging row.
    ///
    /// With `reject_duplicate_content` set, the insert is skipped (returns
    /// `false`) when any production row or non-quarantined staging row already
    /// carries the same content hash. The check and the insert are one statement.
    async fn insert_staging_pending(&self, record: &StagingRecord, reject_duplicate_content: bool) -> Result<bool>;
    async fn commit_staging(&self, id: Uuid) -> Result<()>;
    async fn discard_staging(&self, id: Uuid) -> Result<()>;
    async fn get_staging(&self, id: Uuid) -> Result<Option<StagingRecord>>;
    async fn list_staging(&self, status: RecordStatus) -> Result<Vec<StagingRecord>>;
    async fn mark_staging_promoted(&self, id: Uuid, production_id: Uuid) -> Result<()>;
    /// Retire a committed row whose file failed re-verification
    async fn mark_staging_quarantined(&self, id: Uuid) -> Result<()>;

    /// Write a pending production row; `false` when the content is already
    /// live in production
    async fn insert_production_pending(&self, record: &ProductionRecord) -> Result<bool>;
    async fn commit_production(&self, id: Uuid) -> Result<()>;
    async fn discard_production(&self, id: Uuid) -> Result<()>;
    async fn get_production(&self, id: Uuid) -> Result<Option<ProductionRecord>>;
    async fn list_production(&self, status: RecordStatus) -> Result<Vec<ProductionRecord>>;

    /// Content already accepted (committed/promoted staging or committed production)
    async fn content_exists(&self, content_hash: &str) -> Result<bool>;
    async fn is_processed(&self, path: &str, content_hash: &str) -> Result<bool>;
    async fn mark_processed(&self, path: &str, content_hash: &str) -> Result<()>;
}

/// Quarantine audit trail
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    async fn insert_quarantine(&self, record: &QuarantineRecord) -> Result<()>;
    async fn get_quarantine(&self, id: Uuid) -> Result<Option<QuarantineRecord>>;
    async fn delete_quarantine(&self, id: Uuid) -> Result<()>;
    async fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>>;
    async fn list_quarantine_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QuarantineRecord>>;
}

/// Runtime key/value settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_raw_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw_setting(&self, key: &str, value: &str) -> Result<()>;
}
