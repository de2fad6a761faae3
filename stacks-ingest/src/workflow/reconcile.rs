//! Startup repair of half-finished moves
//!
//! A `pending` row means the process stopped somewhere between writing the
//! row and committing it. Where the file sits decides the repair: if it
//! reached its destination the row is committed, otherwise the row is
//! dropped and the file stays where it was.

use std::path::Path;

use stacks_common::db::{Library, RecordStatus};

use crate::db::{ItemStore, LibraryStore};
use crate::error::IngestResult;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub staging_committed: usize,
    pub staging_discarded: usize,
    pub production_committed: usize,
    pub production_discarded: usize,
    pub errors: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.staging_committed + self.staging_discarded + self.production_committed + self.production_discarded == 0
            && self.errors.is_empty()
    }
}

/// Settle every pending staging and production row
pub async fn reconcile_pending(
    items: &dyn ItemStore,
    libraries: &dyn LibraryStore,
    staging: &Library,
) -> IngestResult<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for record in items.list_staging(RecordStatus::Pending).await? {
        let staged_path = staging.path.join(&record.relative_path);
        let result = if exists(&staged_path).await {
            items.commit_staging(record.id).await.map(|_| {
                report.staging_committed += 1;
                tracing::info!(staging_id = %record.id, path = %staged_path.display(), "Committed pending staging row");
            })
        } else {
            if !exists(Path::new(&record.original_path)).await {
                tracing::warn!(
                    staging_id = %record.id,
                    original = %record.original_path,
                    "Pending staging row has no file at either end"
                );
            }
            items.discard_staging(record.id).await.map(|_| {
                report.staging_discarded += 1;
                tracing::info!(staging_id = %record.id, "Discarded pending staging row");
            })
        };
        if let Err(e) = result {
            report.errors.push(format!("staging {}: {}", record.id, e));
        }
    }

    for record in items.list_production(RecordStatus::Pending).await? {
        let Some(library) = libraries.get_library(record.library_id).await? else {
            report
                .errors
                .push(format!("production {}: library {} not found", record.id, record.library_id));
            continue;
        };

        let placed = library.path.join(&record.relative_path);
        let result = if exists(&placed).await {
            let committed = items.commit_production(record.id).await;
            match (committed, record.staging_id) {
                (Ok(()), Some(staging_id)) => items.mark_staging_promoted(staging_id, record.id).await,
                (other, _) => other,
            }
            .map(|_| {
                report.production_committed += 1;
                tracing::info!(production_id = %record.id, path = %placed.display(), "Committed pending production row");
            })
        } else {
            items.discard_production(record.id).await.map(|_| {
                report.production_discarded += 1;
                tracing::info!(production_id = %record.id, "Discarded pending production row");
            })
        };
        if let Err(e) = result {
            report.errors.push(format!("production {}: {}", record.id, e));
        }
    }

    if report.is_clean() {
        tracing::debug!("No pending rows to reconcile");
    } else {
        tracing::info!(
            staging_committed = report.staging_committed,
            staging_discarded = report.staging_discarded,
            production_committed = report.production_committed,
            production_discarded = report.production_discarded,
            errors = report.errors.len(),
            "Reconcile finished"
        );
    }
    Ok(report)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
