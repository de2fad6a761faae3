//! Shared helpers for stacks-ingest integration tests
#![allow(dead_code)]

pub mod audio_generator;
pub mod stubs;

pub use audio_generator::{generate_test_wav, generate_truncated_wav, AudioConfig};
pub use stubs::{CountingEncoder, FailingItemStore, FullDiskMover, RejectingQuarantineStore};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use stacks_common::config::{RetryConfig, RootsConfig, StacksConfig};
use stacks_common::db::{init_database, Library, LibraryType};
use stacks_ingest::db::LibraryStore;
use stacks_ingest::AppContext;

/// A complete application rooted in a temp directory
pub struct TestEnv {
    pub dir: TempDir,
    pub ctx: Arc<AppContext>,
    pub encoder: Arc<CountingEncoder>,
}

pub fn test_config(root: &Path) -> StacksConfig {
    StacksConfig {
        database_path: root.join("stacks.db"),
        roots: RootsConfig::under(root),
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        },
        ..StacksConfig::default()
    }
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut StacksConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let mut config = test_config(&root);
        adjust(&mut config);

        let pool = init_database(&config.database_path).await.unwrap();
        let encoder = Arc::new(CountingEncoder::new(4096));
        let ctx = AppContext::build(config, pool, encoder.clone()).await.unwrap();

        Self {
            dir,
            ctx: Arc::new(ctx),
            encoder,
        }
    }

    pub fn root(&self) -> PathBuf {
        std::fs::canonicalize(self.dir.path()).unwrap()
    }

    pub fn inbound(&self) -> &Path {
        &self.ctx.inbound.path
    }

    /// Write a tone into the inbound folder
    pub fn drop_wav(&self, name: &str, frequency: f32) -> PathBuf {
        generate_test_wav(&self.inbound().join(name), &AudioConfig::tone(frequency)).unwrap()
    }

    pub async fn add_production_library(&self, name: &str) -> Library {
        let path = self.root().join("production").join(name);
        std::fs::create_dir_all(&path).unwrap();
        let library = Library::new(name, path, LibraryType::Production);
        self.ctx.store.insert_library(&library).await.unwrap();
        library
    }

    /// `{quarantine}/{reason}/{today}/{name}`
    pub fn quarantine_path(&self, reason: &str, name: &str) -> PathBuf {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        self.ctx.quarantine.root().join(reason).join(today).join(name)
    }
}
