//! Service wiring
//!
//! Builds every service from a [`StacksConfig`] and one SQLite pool so the
//! binary, the job runner and integration tests share the same graph.

use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use stacks_common::config::StacksConfig;
use stacks_common::db::{init_database, Library, LibraryType};

use crate::db::settings::{scan_max_files, scan_worker_count};
use crate::db::{LibraryStore, SqliteStore};
use crate::error::IngestResult;
use crate::services::checksum::ChecksumService;
use crate::services::file_scanner::{FileScanner, ScanOptions};
use crate::services::library_selector::LibrarySelector;
use crate::services::path_resolver::{ArtistAlbumResolver, PathResolver};
use crate::services::quarantine::QuarantineService;
use crate::services::transcode::{Encoder, FfmpegEncoder, ProfileRegistry, TranscodeCache, TranscodeService};
use crate::services::validator::MediaFileValidator;
use crate::utils::{RetryPolicy, SweeperHandle};
use crate::workflow::{reconcile_pending, IngestionPipeline, PromotionPipeline, ReconcileReport};

pub const INBOUND_LIBRARY: &str = "inbound";
pub const STAGING_LIBRARY: &str = "staging";

pub struct AppContext {
    pub config: StacksConfig,
    pub store: Arc<SqliteStore>,
    pub inbound: Library,
    pub staging: Library,
    pub checksums: Arc<ChecksumService>,
    pub quarantine: Arc<QuarantineService>,
    pub selector: Arc<LibrarySelector>,
    pub scanner: FileScanner,
    pub ingestion: Arc<IngestionPipeline>,
    pub promotion: Arc<PromotionPipeline>,
    pub transcode: Arc<TranscodeService>,
    sweepers: Mutex<Vec<SweeperHandle>>,
}

impl AppContext {
    /// Open the configured database and build everything with ffmpeg as the encoder
    pub async fn open(config: StacksConfig) -> IngestResult<Self> {
        let pool = init_database(&config.database_path).await?;
        let encoder = Arc::new(FfmpegEncoder::new(
            config.transcode.ffmpeg_path.clone(),
            Duration::from_secs(config.transcode.encoder_timeout_secs),
        ));
        Self::build(config, pool, encoder).await
    }

    /// Build on an existing pool with the given encoder
    pub async fn build(config: StacksConfig, pool: SqlitePool, encoder: Arc<dyn Encoder>) -> IngestResult<Self> {
        let store = Arc::new(SqliteStore::new(pool));
        let roots = &config.roots;

        let inbound = ensure_library(store.as_ref(), INBOUND_LIBRARY, &roots.inbound, LibraryType::Inbound).await?;
        let staging = ensure_library(store.as_ref(), STAGING_LIBRARY, &roots.staging, LibraryType::Staging).await?;
        let quarantine_root = prepare_root(&roots.quarantine).await?;
        let cache_root = prepare_root(&roots.transcode_cache).await?;

        let retry = RetryPolicy::from_config(&config.retry);
        let resolver: Arc<dyn PathResolver> = Arc::new(ArtistAlbumResolver);

        let checksums = Arc::new(ChecksumService::new(&config.checksum, store.clone()));
        let quarantine = Arc::new(QuarantineService::new(
            quarantine_root,
            store.clone(),
            config.quarantine.max_path_len,
        ));
        let validator = MediaFileValidator::new(config.validator.clone());
        let selector = Arc::new(LibrarySelector::from_config(&config.placement));
        let scanner = FileScanner::new(&config.validator.allowed_extensions, config.scan.ignore_patterns.clone());

        let ingestion = Arc::new(
            IngestionPipeline::new(
                checksums.clone(),
                validator,
                quarantine.clone(),
                store.clone(),
                resolver.clone(),
                inbound.clone(),
                staging.clone(),
            )
            .with_retry(retry)
            .with_workers(config.workers.ingest),
        );

        let promotion = Arc::new(
            PromotionPipeline::new(
                checksums.clone(),
                quarantine.clone(),
                store.clone(),
                store.clone(),
                selector.clone(),
                resolver,
                staging.clone(),
            )
            .with_retry(retry)
            .with_workers(config.workers.promote),
        );

        let cache = Arc::new(TranscodeCache::new(cache_root, config.transcode.cache_max_bytes));
        if let Err(e) = cache.load_index().await {
            tracing::warn!(error = %e, "Transcode cache index unreadable, starting empty");
        }
        let transcode = Arc::new(TranscodeService::new(
            cache,
            encoder,
            ProfileRegistry::with_builtins(),
            config.workers.transcode,
        ));

        Ok(Self {
            config,
            store,
            inbound,
            staging,
            checksums,
            quarantine,
            selector,
            scanner,
            ingestion,
            promotion,
            transcode,
            sweepers: Mutex::new(Vec::new()),
        })
    }

    /// Scan knobs, with runtime settings taking precedence over the config file
    pub async fn scan_options(&self) -> IngestResult<ScanOptions> {
        Ok(ScanOptions {
            workers: scan_worker_count(self.store.as_ref(), self.config.workers.scan).await?,
            channel_buffer: self.config.scan.channel_buffer,
            max_files: scan_max_files(self.store.as_ref(), self.config.scan.max_files).await?,
        })
    }

    pub async fn reconcile(&self) -> IngestResult<ReconcileReport> {
        reconcile_pending(self.store.as_ref(), self.store.as_ref(), &self.staging).await
    }

    /// Start the checksum and transcode cache sweepers; a second call is a no-op
    pub async fn start_sweepers(&self) {
        let mut sweepers = self.sweepers.lock().await;
        if !sweepers.is_empty() {
            return;
        }
        sweepers.push(
            self.checksums
                .start_sweeper(Duration::from_secs(self.config.checksum.sweep_interval_secs)),
        );
        sweepers.push(
            self.transcode
                .cache()
                .start_sweeper(Duration::from_secs(self.config.transcode.sweep_interval_secs)),
        );
    }

    /// Stop the sweepers and flush state that lives outside the database
    pub async fn shutdown(&self) {
        let sweepers = std::mem::take(&mut *self.sweepers.lock().await);
        for sweeper in sweepers {
            sweeper.stop().await;
        }
        if let Err(e) = self.transcode.cache().persist_index().await {
            tracing::warn!(error = %e, "Could not persist transcode cache index");
        }
    }
}

/// Create `root` and return its canonical form
async fn prepare_root(root: &Path) -> IngestResult<PathBuf> {
    tokio::fs::create_dir_all(root).await?;
    Ok(tokio::fs::canonicalize(root).await?)
}

/// Fetch the named library row, creating it (and its directory) if needed
async fn ensure_library(
    store: &dyn LibraryStore,
    name: &str,
    root: &Path,
    library_type: LibraryType,
) -> IngestResult<Library> {
    let path = prepare_root(root).await?;

    if let Some(existing) = store.find_library_by_name(name).await? {
        if existing.path != path {
            tracing::warn!(
                library = name,
                recorded = %existing.path.display(),
                configured = %path.display(),
                "Library root differs from configuration, keeping recorded root"
            );
            prepare_root(&existing.path).await?;
        }
        return Ok(existing);
    }

    let library = Library::new(name, path, library_type);
    store.insert_library(&library).await?;
    tracing::info!(library = name, path = %library.path.display(), "Registered library");
    Ok(library)
}
