//! Test doubles for the encoder, the stores and file moves

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use stacks_common::db::{ProductionRecord, QuarantineRecord, RecordStatus, StagingRecord};
use stacks_common::{Error, Result};
use stacks_ingest::db::{ItemStore, QuarantineStore, SqliteStore};
use stacks_ingest::services::transcode::{EncodeError, Encoder, TranscodeProfile};
use stacks_ingest::utils::{move_file, FileMover};

/// Writes `output_len` bytes per call and counts calls
pub struct CountingEncoder {
    calls: AtomicUsize,
    output_len: usize,
}

impl CountingEncoder {
    pub fn new(output_len: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            output_len,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for CountingEncoder {
    async fn encode(&self, _input: &Path, output: &Path, _profile: &TranscodeProfile, _bitrate_kbps: u32) -> std::result::Result<(), EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, vec![0x55u8; self.output_len]).await?;
        Ok(())
    }
}

/// Delegates to SQLite but can be told to fail commits
pub struct FailingItemStore {
    inner: Arc<SqliteStore>,
    pub fail_commit_staging: AtomicBool,
    pub fail_commit_production: AtomicBool,
}

impl FailingItemStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_commit_staging: AtomicBool::new(false),
            fail_commit_production: AtomicBool::new(false),
        }
    }

    fn injected() -> Error {
        Error::Internal("injected commit failure".to_string())
    }
}

#[async_trait]
impl ItemStore for FailingItemStore {
    async fn insert_staging_pending(&self, record: &StagingRecord, reject_duplicate_content: bool) -> Result<bool> {
        self.inner.insert_staging_pending(record, reject_duplicate_content).await
    }

    async fn commit_staging(&self, id: Uuid) -> Result<()> {
        if self.fail_commit_staging.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.commit_staging(id).await
    }

    async fn discard_staging(&self, id: Uuid) -> Result<()> {
        self.inner.discard_staging(id).await
    }

    async fn get_staging(&self, id: Uuid) -> Result<Option<StagingRecord>> {
        self.inner.get_staging(id).await
    }

    async fn list_staging(&self, status: RecordStatus) -> Result<Vec<StagingRecord>> {
        self.inner.list_staging(status).await
    }

    async fn mark_staging_promoted(&self, id: Uuid, production_id: Uuid) -> Result<()> {
        self.inner.mark_staging_promoted(id, production_id).await
    }

    async fn mark_staging_quarantined(&self, id: Uuid) -> Result<()> {
        self.inner.mark_staging_quarantined(id).await
    }

    async fn insert_production_pending(&self, record: &ProductionRecord) -> Result<bool> {
        self.inner.insert_production_pending(record).await
    }

    async fn commit_production(&self, id: Uuid) -> Result<()> {
        if self.fail_commit_production.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.commit_production(id).await
    }

    async fn discard_production(&self, id: Uuid) -> Result<()> {
        self.inner.discard_production(id).await
    }

    async fn get_production(&self, id: Uuid) -> Result<Option<ProductionRecord>> {
        self.inner.get_production(id).await
    }

    async fn list_production(&self, status: RecordStatus) -> Result<Vec<ProductionRecord>> {
        self.inner.list_production(status).await
    }

    async fn content_exists(&self, content_hash: &str) -> Result<bool> {
        self.inner.content_exists(content_hash).await
    }

    async fn is_processed(&self, path: &str, content_hash: &str) -> Result<bool> {
        self.inner.is_processed(path, content_hash).await
    }

    async fn mark_processed(&self, path: &str, content_hash: &str) -> Result<()> {
        self.inner.mark_processed(path, content_hash).await
    }
}

/// Quarantine store whose inserts always fail; reads go to SQLite
pub struct RejectingQuarantineStore {
    inner: Arc<SqliteStore>,
}

impl RejectingQuarantineStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QuarantineStore for RejectingQuarantineStore {
    async fn insert_quarantine(&self, _record: &QuarantineRecord) -> Result<()> {
        Err(Error::Internal("injected quarantine insert failure".to_string()))
    }

    async fn get_quarantine(&self, id: Uuid) -> Result<Option<QuarantineRecord>> {
        self.inner.get_quarantine(id).await
    }

    async fn delete_quarantine(&self, id: Uuid) -> Result<()> {
        self.inner.delete_quarantine(id).await
    }

    async fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        self.inner.list_quarantine().await
    }

    async fn list_quarantine_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QuarantineRecord>> {
        self.inner.list_quarantine_before(cutoff).await
    }
}

/// Reports ENOSPC for any move into `full_root`
pub struct FullDiskMover {
    full_root: PathBuf,
}

impl FullDiskMover {
    pub fn new(full_root: impl Into<PathBuf>) -> Self {
        Self {
            full_root: full_root.into(),
        }
    }
}

#[async_trait]
impl FileMover for FullDiskMover {
    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to.starts_with(&self.full_root) {
            return Err(io::Error::from_raw_os_error(28));
        }
        move_file(from, to).await
    }
}
