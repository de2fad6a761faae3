//! Staging → production promotion
//!
//! Re-verifies the staged bytes, picks a production library, moves the file
//! and records it. Like ingestion, the production row is written `pending`
//! before the move and committed after; a failed commit moves the file back
//! to staging and drops the row.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use stacks_common::db::{Library, LibraryType, ProductionRecord, QuarantineReason, RecordStatus, StagingRecord};

use crate::db::{ItemStore, LibraryStore};
use crate::error::{IngestError, IngestResult};
use crate::services::checksum::{ChecksumService, IntegrityCheck};
use crate::services::library_selector::{LibrarySelector, PlacementCandidate};
use crate::services::normalizer::{UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use crate::services::path_resolver::{ItemIdentity, PathResolver};
use crate::services::quarantine::QuarantineService;
use crate::utils::{move_file, retry_store, unique_path, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    Promoted {
        production_id: Uuid,
        library_id: Uuid,
        path: PathBuf,
    },
    /// Staged bytes no longer match the recorded digest
    Quarantined { reason: QuarantineReason, record_id: Uuid },
    /// Same content is already live in production; nothing moved
    AlreadyInProduction { content_hash: String },
}

#[derive(Debug, Default)]
pub struct PromotionReport {
    pub promoted: usize,
    pub quarantined: usize,
    pub already_in_production: usize,
    pub errors: Vec<(Uuid, String)>,
}

impl PromotionReport {
    fn record(&mut self, id: Uuid, result: IngestResult<PromotionOutcome>) {
        match result {
            Ok(PromotionOutcome::Promoted { .. }) => self.promoted += 1,
            Ok(PromotionOutcome::Quarantined { .. }) => self.quarantined += 1,
            Ok(PromotionOutcome::AlreadyInProduction { .. }) => self.already_in_production += 1,
            Err(e) => {
                tracing::warn!(staging_id = %id, error = %e, "Promotion failed");
                self.errors.push((id, e.to_string()));
            }
        }
    }
}

pub struct PromotionPipeline {
    checksums: Arc<ChecksumService>,
    quarantine: Arc<QuarantineService>,
    items: Arc<dyn ItemStore>,
    libraries: Arc<dyn LibraryStore>,
    selector: Arc<LibrarySelector>,
    resolver: Arc<dyn PathResolver>,
    staging: Library,
    retry: RetryPolicy,
    workers: usize,
    placement_lock: Mutex<()>,
}

impl PromotionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checksums: Arc<ChecksumService>,
        quarantine: Arc<QuarantineService>,
        items: Arc<dyn ItemStore>,
        libraries: Arc<dyn LibraryStore>,
        selector: Arc<LibrarySelector>,
        resolver: Arc<dyn PathResolver>,
        staging: Library,
    ) -> Self {
        Self {
            checksums,
            quarantine,
            items,
            libraries,
            selector,
            resolver,
            staging,
            retry: RetryPolicy::default(),
            workers: 2,
            placement_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Promote one committed staging item
    pub async fn promote(&self, staging_id: Uuid) -> IngestResult<PromotionOutcome> {
        let staged = self
            .items
            .get_staging(staging_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("staging item {}", staging_id)))?;
        if staged.status != RecordStatus::Committed {
            return Err(IngestError::InvalidState(format!(
                "staging item {} is {}, expected committed",
                staging_id, staged.status
            )));
        }

        let source = self.staging.path.join(&staged.relative_path);
        self.quarantine.validate_path(&source)?;

        if let IntegrityCheck::Mismatch { actual } =
            self.checksums.verify_integrity(&source, &staged.content_hash).await?
        {
            let message = format!("expected {}, found {}", staged.content_hash, actual);
            let record = self
                .quarantine
                .quarantine(&source, QuarantineReason::ChecksumMismatch, &message, Some(self.staging.id))
                .await?;
            self.checksums.invalidate(&source).await;
            retry_store("mark staging quarantined", &self.retry, || {
                self.items.mark_staging_quarantined(staging_id)
            })
            .await?;
            return Ok(PromotionOutcome::Quarantined {
                reason: QuarantineReason::ChecksumMismatch,
                record_id: record.id,
            });
        }

        let candidates = self.candidates().await?;
        let selection = self.selector.select(&staged.directory, &candidates)?;
        let library = selection.library;
        tracing::debug!(
            staging_id = %staging_id,
            code = %staged.directory,
            library = %library.name,
            rule = ?selection.rule,
            "Production library selected"
        );

        let identity = ItemIdentity {
            directory_code: &staged.directory,
            artist: staged.artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
            album: staged.album.as_deref().unwrap_or(UNKNOWN_ALBUM),
        };
        let relative_dir = self.resolver.resolve(&identity, &library)?;

        let guard = self.placement_lock.lock().await;

        let destination = unique_path(&library.path.join(&relative_dir).join(&staged.filename)).await?;
        self.quarantine.validate_path(&destination)?;

        let production = production_record(&staged, &library, &destination);
        let inserted = retry_store("insert production row", &self.retry, || {
            self.items.insert_production_pending(&production)
        })
        .await?;
        if !inserted {
            drop(guard);
            tracing::info!(
                staging_id = %staging_id,
                hash = %staged.content_hash,
                "Content already live in production"
            );
            return Ok(PromotionOutcome::AlreadyInProduction {
                content_hash: staged.content_hash,
            });
        }

        if let Err(e) = move_file(&source, &destination).await {
            drop(guard);
            self.discard_pending(production.id).await;
            return Err(IngestError::Io(e));
        }
        drop(guard);

        if let Err(e) = self.finish(staging_id, production.id).await {
            tracing::error!(
                staging_id = %staging_id,
                production_id = %production.id,
                error = %e,
                "Production record failed, moving file back to staging"
            );
            self.compensate(&source, &destination, production.id).await;
            return Err(IngestError::Persistence(e));
        }

        self.checksums.invalidate(&source).await;
        tracing::info!(
            staging_id = %staging_id,
            production_id = %production.id,
            library = %library.name,
            path = %destination.display(),
            "Item promoted"
        );

        Ok(PromotionOutcome::Promoted {
            production_id: production.id,
            library_id: library.id,
            path: destination,
        })
    }

    /// Promote several items, `workers` at a time
    pub async fn promote_batch(&self, ids: Vec<Uuid>) -> PromotionReport {
        let results: Vec<(Uuid, IngestResult<PromotionOutcome>)> = stream::iter(ids)
            .map(|id| async move { (id, self.promote(id).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut report = PromotionReport::default();
        for (id, result) in results {
            report.record(id, result);
        }

        tracing::info!(
            promoted = report.promoted,
            quarantined = report.quarantined,
            already_in_production = report.already_in_production,
            errors = report.errors.len(),
            "Promotion batch complete"
        );
        report
    }

    /// Promote every committed staging item
    pub async fn promote_all(&self) -> IngestResult<PromotionReport> {
        let ids = self
            .items
            .list_staging(RecordStatus::Committed)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        Ok(self.promote_batch(ids).await)
    }

    async fn candidates(&self) -> IngestResult<Vec<PlacementCandidate>> {
        let mut candidates = Vec::new();
        for library in self.libraries.list_libraries().await? {
            if library.library_type != LibraryType::Production {
                continue;
            }
            let used = self.libraries.library_usage_bytes(library.id).await?;
            candidates.push(PlacementCandidate::new(library, used));
        }
        Ok(candidates)
    }

    async fn finish(&self, staging_id: Uuid, production_id: Uuid) -> stacks_common::Result<()> {
        retry_store("commit production row", &self.retry, || {
            self.items.commit_production(production_id)
        })
        .await?;
        retry_store("mark staging promoted", &self.retry, || {
            self.items.mark_staging_promoted(staging_id, production_id)
        })
        .await
    }

    async fn discard_pending(&self, id: Uuid) {
        if let Err(e) = retry_store("discard production row", &self.retry, || self.items.discard_production(id)).await {
            tracing::error!(production_id = %id, error = %e, "Production row left for reconcile");
        }
    }

    async fn compensate(&self, source: &Path, destination: &Path, production_id: Uuid) {
        match move_file(destination, source).await {
            Ok(()) => self.discard_pending(production_id).await,
            Err(e) => tracing::error!(
                file = %destination.display(),
                staging_path = %source.display(),
                production_id = %production_id,
                error = %e,
                "Could not move file back to staging; production row left for reconcile"
            ),
        }
    }
}

fn production_record(staged: &StagingRecord, library: &Library, destination: &Path) -> ProductionRecord {
    let now = Utc::now();
    ProductionRecord {
        id: Uuid::new_v4(),
        library_id: library.id,
        staging_id: Some(staged.id),
        name: staged.name.clone(),
        directory: staged.directory.clone(),
        filename: destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| staged.filename.clone()),
        relative_path: destination
            .strip_prefix(&library.path)
            .unwrap_or(destination)
            .to_string_lossy()
            .into_owned(),
        content_hash: staged.content_hash.clone(),
        size_bytes: staged.size_bytes,
        artist: staged.artist.clone(),
        album: staged.album.clone(),
        status: RecordStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}
