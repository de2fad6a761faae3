//! Inbound → staging pipeline
//!
//! Each file walks a fixed sequence of gates:
//!
//! ```text
//! Discovered → PathValidated → FormatValidated → Checksummed → DuplicateCheck
//!   → MetadataExtracted → Normalized → StagingPathResolved → FileMoved
//!   → RecordPersisted → MarkedProcessed
//! ```
//!
//! A failure before `FileMoved` quarantines the file and ends that item only.
//! The move and the staging row form a saga: the row is written `pending`
//! before the move and flipped to `committed` after it. If the commit fails
//! the file is moved back to inbound; anything a crash leaves half-done is
//! repaired by [`reconcile_pending`](super::reconcile::reconcile_pending).

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stacks_common::db::{Library, QuarantineReason, RecordStatus, StagingRecord};

use crate::db::ItemStore;
use crate::error::{IngestError, IngestResult};
use crate::models::media::lowercase_extension;
use crate::services::checksum::ChecksumService;
use crate::services::cue_sheet;
use crate::services::file_scanner::{FileScanner, ScanOptions, ScanResult};
use crate::services::normalizer::{normalize, NormalizedMetadata};
use crate::services::path_resolver::{sanitize_file_name, ItemIdentity, PathResolver};
use crate::services::quarantine::QuarantineService;
use crate::services::validator::MediaFileValidator;
use crate::utils::{is_disk_full, retry_store, unique_path, FileMover, LocalMover, RetryPolicy};

/// Stages of one file's trip through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Discovered,
    PathValidated,
    FormatValidated,
    Checksummed,
    DuplicateCheck,
    MetadataExtracted,
    Normalized,
    StagingPathResolved,
    FileMoved,
    RecordPersisted,
    MarkedProcessed,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestState::Discovered => "discovered",
            IngestState::PathValidated => "path_validated",
            IngestState::FormatValidated => "format_validated",
            IngestState::Checksummed => "checksummed",
            IngestState::DuplicateCheck => "duplicate_check",
            IngestState::MetadataExtracted => "metadata_extracted",
            IngestState::Normalized => "normalized",
            IngestState::StagingPathResolved => "staging_path_resolved",
            IngestState::FileMoved => "file_moved",
            IngestState::RecordPersisted => "record_persisted",
            IngestState::MarkedProcessed => "marked_processed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Stage even when the content is already in the library
    pub force: bool,
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Staged {
        staging_id: Uuid,
        content_hash: String,
        path: PathBuf,
    },
    /// Same bytes already accepted; nothing was touched
    Duplicate { content_hash: String },
    Quarantined {
        reason: QuarantineReason,
        record_id: Uuid,
        /// Gate that rejected the file
        failed_at: IngestState,
    },
    /// Cue sheet whose audio is all present; left in place
    CueAccepted,
}

/// Per-batch tally
#[derive(Debug, Default)]
pub struct BatchReport {
    pub staged: usize,
    pub duplicates: usize,
    pub quarantined: usize,
    pub cue_accepted: usize,
    /// Items that failed without being quarantined
    pub errors: Vec<(PathBuf, String)>,
}

impl BatchReport {
    fn record(&mut self, path: PathBuf, result: IngestResult<IngestOutcome>) {
        match result {
            Ok(IngestOutcome::Staged { .. }) => self.staged += 1,
            Ok(IngestOutcome::Duplicate { .. }) => self.duplicates += 1,
            Ok(IngestOutcome::Quarantined { .. }) => self.quarantined += 1,
            Ok(IngestOutcome::CueAccepted) => self.cue_accepted += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ingest failed");
                self.errors.push((path, e.to_string()));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.staged + self.duplicates + self.quarantined + self.cue_accepted + self.errors.len()
    }
}

pub struct IngestionPipeline {
    checksums: Arc<ChecksumService>,
    validator: MediaFileValidator,
    quarantine: Arc<QuarantineService>,
    items: Arc<dyn ItemStore>,
    resolver: Arc<dyn PathResolver>,
    inbound: Library,
    staging: Library,
    mover: Arc<dyn FileMover>,
    retry: RetryPolicy,
    workers: usize,
    /// Held while a destination is picked and the file moved into it
    placement_lock: Mutex<()>,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checksums: Arc<ChecksumService>,
        validator: MediaFileValidator,
        quarantine: Arc<QuarantineService>,
        items: Arc<dyn ItemStore>,
        resolver: Arc<dyn PathResolver>,
        inbound: Library,
        staging: Library,
    ) -> Self {
        Self {
            checksums,
            validator,
            quarantine,
            items,
            resolver,
            inbound,
            staging,
            mover: Arc::new(LocalMover),
            retry: RetryPolicy::default(),
            workers: 4,
            placement_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_mover(mut self, mover: Arc<dyn FileMover>) -> Self {
        self.mover = mover;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn inbound(&self) -> &Library {
        &self.inbound
    }

    pub fn staging(&self) -> &Library {
        &self.staging
    }

    /// Take one inbound file through every gate
    pub async fn ingest_file(&self, path: &Path, options: IngestOptions) -> IngestResult<IngestOutcome> {
        tracing::debug!(path = %path.display(), state = %IngestState::Discovered, "Ingesting file");

        if let Err(e) = self.quarantine.validate_path(path) {
            tracing::warn!(path = %path.display(), error = %e, "Unsafe inbound path");
            return self
                .divert(path, QuarantineReason::PathUnsafe, &e.to_string(), IngestState::PathValidated)
                .await;
        }

        if lowercase_extension(path).as_deref() == Some("cue") {
            return self.check_cue_sheet(path).await;
        }

        let mut metadata = match self.validator.validate(path).await {
            Ok(metadata) => metadata,
            Err(failure) => {
                return self
                    .divert(path, failure.reason, &failure.message, IngestState::FormatValidated)
                    .await
            }
        };

        let hash = self.checksums.hash(path).await?;
        tracing::debug!(path = %path.display(), hash = %hash, state = %IngestState::Checksummed, "Content hashed");

        if !options.force && self.checksums.is_already_processed_by_content(&hash).await? {
            tracing::info!(path = %path.display(), hash = %hash, "Content already in library, skipping");
            return Ok(IngestOutcome::Duplicate { content_hash: hash });
        }
        metadata.content_hash = Some(hash.clone());

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let normalized = match normalize(&metadata, &stem) {
            Ok(normalized) => normalized,
            Err(e) => {
                return self
                    .divert(path, QuarantineReason::MetadataConflict, &e.to_string(), IngestState::Normalized)
                    .await
            }
        };

        let identity = ItemIdentity {
            directory_code: &normalized.directory_code,
            artist: &normalized.artist,
            album: &normalized.album,
        };
        let relative_dir = match self.resolver.resolve(&identity, &self.staging) {
            Ok(dir) => dir,
            Err(e) => {
                return self
                    .divert(
                        path,
                        QuarantineReason::MetadataConflict,
                        &e.to_string(),
                        IngestState::StagingPathResolved,
                    )
                    .await
            }
        };
        let file_name = staged_file_name(&normalized, path);

        let guard = self.placement_lock.lock().await;

        let destination = unique_path(&self.staging.path.join(&relative_dir).join(&file_name)).await?;
        if let Err(e) = self.quarantine.validate_path(&destination) {
            drop(guard);
            return self
                .divert(path, QuarantineReason::PathUnsafe, &e.to_string(), IngestState::StagingPathResolved)
                .await;
        }

        let record = self.pending_record(path, &destination, &normalized, &hash, metadata.size_bytes);
        let inserted = retry_store("insert staging row", &self.retry, || {
            self.items.insert_staging_pending(&record, !options.force)
        })
        .await?;
        if !inserted {
            drop(guard);
            tracing::info!(path = %path.display(), hash = %hash, "Content staged concurrently, skipping");
            return Ok(IngestOutcome::Duplicate { content_hash: hash });
        }

        if let Err(e) = self.mover.move_file(path, &destination).await {
            drop(guard);
            self.discard_pending(record.id).await;
            if is_disk_full(&e) {
                return self
                    .divert(path, QuarantineReason::DiskFull, &e.to_string(), IngestState::FileMoved)
                    .await;
            }
            return Err(IngestError::Io(e));
        }
        drop(guard);
        tracing::debug!(
            path = %path.display(),
            destination = %destination.display(),
            state = %IngestState::FileMoved,
            "File moved to staging"
        );

        if let Err(e) = retry_store("commit staging row", &self.retry, || self.items.commit_staging(record.id)).await {
            tracing::error!(
                path = %path.display(),
                staging_id = %record.id,
                error = %e,
                "Staging row commit failed, moving file back"
            );
            self.compensate(path, &destination, record.id).await;
            return Err(IngestError::Persistence(e));
        }

        if let Err(e) = self.items.mark_processed(&record.original_path, &hash).await {
            tracing::warn!(path = %path.display(), error = %e, "Could not record processed file");
        }
        self.checksums.invalidate(path).await;

        tracing::info!(
            path = %path.display(),
            staging_id = %record.id,
            name = %record.name,
            state = %IngestState::MarkedProcessed,
            "File staged"
        );

        Ok(IngestOutcome::Staged {
            staging_id: record.id,
            content_hash: hash,
            path: destination,
        })
    }

    /// Ingest many files, `workers` at a time.
    ///
    /// Cue sheets are checked before any audio moves so a complete sheet is
    /// not mistaken for an orphan.
    pub async fn ingest_batch(&self, paths: Vec<PathBuf>, options: IngestOptions) -> BatchReport {
        let (cues, media): (Vec<PathBuf>, Vec<PathBuf>) = paths
            .into_iter()
            .partition(|p| lowercase_extension(p).as_deref() == Some("cue"));

        let mut report = BatchReport::default();
        for group in [cues, media] {
            let results: Vec<(PathBuf, IngestResult<IngestOutcome>)> = stream::iter(group)
                .map(|path| async move {
                    let result = self.ingest_file(&path, options).await;
                    (path, result)
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

            for (path, result) in results {
                report.record(path, result);
            }
        }

        tracing::info!(
            staged = report.staged,
            duplicates = report.duplicates,
            quarantined = report.quarantined,
            cue_accepted = report.cue_accepted,
            errors = report.errors.len(),
            "Ingest batch complete"
        );
        report
    }

    /// Scan the inbound library and ingest everything found
    pub async fn scan_and_ingest(
        &self,
        scanner: &FileScanner,
        scan_options: &ScanOptions,
        cancel: &CancellationToken,
        options: IngestOptions,
    ) -> IngestResult<(ScanResult, BatchReport)> {
        let scan = scanner.scan(&self.inbound.path, scan_options, cancel).await?;
        if scan.cancelled || cancel.is_cancelled() {
            tracing::info!(found = scan.files.len(), "Scan cancelled, nothing ingested");
            return Err(IngestError::Cancelled);
        }

        let paths = scan.files.iter().map(|f| f.path.clone()).collect();
        let report = self.ingest_batch(paths, options).await;
        Ok((scan, report))
    }

    async fn check_cue_sheet(&self, path: &Path) -> IngestResult<IngestOutcome> {
        let hash = self.checksums.hash(path).await?;
        if self.checksums.is_already_processed(path, &hash).await? {
            return Ok(IngestOutcome::CueAccepted);
        }

        let missing = cue_sheet::missing_audio(path).await?;
        if missing.is_empty() {
            if let Err(e) = self.items.mark_processed(&path.to_string_lossy(), &hash).await {
                tracing::warn!(path = %path.display(), error = %e, "Could not record processed cue sheet");
            }
            tracing::debug!(path = %path.display(), "Cue sheet complete, left in place");
            return Ok(IngestOutcome::CueAccepted);
        }

        let message = format!("referenced audio missing: {}", missing.join(", "));
        self.divert(path, QuarantineReason::CueMissingAudio, &message, IngestState::FormatValidated)
            .await
    }

    async fn divert(
        &self,
        path: &Path,
        reason: QuarantineReason,
        message: &str,
        failed_at: IngestState,
    ) -> IngestResult<IngestOutcome> {
        let record = self
            .quarantine
            .quarantine(path, reason, message, Some(self.inbound.id))
            .await?;
        self.checksums.invalidate(path).await;

        Ok(IngestOutcome::Quarantined {
            reason,
            record_id: record.id,
            failed_at,
        })
    }

    fn pending_record(
        &self,
        original: &Path,
        destination: &Path,
        normalized: &NormalizedMetadata,
        hash: &str,
        size_bytes: u64,
    ) -> StagingRecord {
        let relative_path = destination
            .strip_prefix(&self.staging.path)
            .unwrap_or(destination)
            .to_string_lossy()
            .into_owned();
        let filename = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let now = Utc::now();

        StagingRecord {
            id: Uuid::new_v4(),
            name: normalized.display_name.clone(),
            directory: normalized.directory_code.clone(),
            filename,
            relative_path,
            content_hash: hash.to_string(),
            size_bytes,
            artist: Some(normalized.artist.clone()),
            album: Some(normalized.album.clone()),
            original_path: original.to_string_lossy().into_owned(),
            status: RecordStatus::Pending,
            promoted_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn discard_pending(&self, id: Uuid) {
        if let Err(e) = retry_store("discard staging row", &self.retry, || self.items.discard_staging(id)).await {
            tracing::error!(staging_id = %id, error = %e, "Pending staging row left for reconcile");
        }
    }

    /// Undo a move whose row could not be committed
    async fn compensate(&self, original: &Path, destination: &Path, id: Uuid) {
        match self.mover.move_file(destination, original).await {
            Ok(()) => self.discard_pending(id).await,
            Err(e) => tracing::error!(
                file = %destination.display(),
                original = %original.display(),
                staging_id = %id,
                error = %e,
                "Could not move file back to inbound; pending row left for reconcile"
            ),
        }
    }
}

/// `NN Title.ext`, or `Title.ext` without a track number
fn staged_file_name(normalized: &NormalizedMetadata, source: &Path) -> String {
    let ext = lowercase_extension(source).unwrap_or_default();
    let name = match normalized.track_number {
        Some(track) => format!("{:02} {}.{}", track, normalized.title, ext),
        None => format!("{}.{}", normalized.title, ext),
    };
    sanitize_file_name(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(track: Option<u32>, title: &str) -> NormalizedMetadata {
        NormalizedMetadata {
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            title: title.to_string(),
            display_name: format!("Artist - {}", title),
            directory_code: "ART".to_string(),
            track_number: track,
            disc_number: None,
        }
    }

    #[test]
    fn test_staged_file_name() {
        let src = Path::new("/in/x.FLAC");
        assert_eq!(staged_file_name(&normalized(Some(3), "Song"), src), "03 Song.flac");
        assert_eq!(staged_file_name(&normalized(None, "Song"), src), "Song.flac");
        assert_eq!(staged_file_name(&normalized(None, "A/B: C"), src), "A_B_ C.flac");
    }

    #[test]
    fn test_batch_report_tally() {
        let mut report = BatchReport::default();
        report.record(PathBuf::from("a"), Ok(IngestOutcome::CueAccepted));
        report.record(
            PathBuf::from("b"),
            Ok(IngestOutcome::Duplicate {
                content_hash: "h".to_string(),
            }),
        );
        report.record(PathBuf::from("c"), Err(IngestError::Cancelled));

        assert_eq!(report.cue_accepted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.total(), 3);
    }
}
