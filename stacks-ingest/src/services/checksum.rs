//! Content checksums with a validated in-memory cache
//!
//! Digests are cached per path together with the size and modification time
//! observed when hashing. A cached digest is served only while both still
//! match and the entry's TTL has not run out; anything else recomputes.
//! Integrity verification always recomputes.

use sha2::{Digest, Sha256};
use stacks_common::config::{ChecksumAlgorithm, ChecksumConfig};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::ItemStore;
use crate::utils::{spawn_sweeper, SweeperHandle};

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("Failed to hash {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Hash task failed: {0}")]
    Task(String),

    #[error("Store lookup failed: {0}")]
    Store(#[from] stacks_common::Error),
}

/// Cached digest for one path
#[derive(Debug, Clone)]
pub struct ChecksumEntry {
    pub hash: String,
    pub algorithm: ChecksumAlgorithm,
    pub file_size: u64,
    pub modified: SystemTime,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl ChecksumEntry {
    fn matches(&self, size: u64, modified: SystemTime, now: Instant) -> bool {
        self.file_size == size && self.modified == modified && now < self.expires_at
    }
}

/// Outcome of an integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityCheck {
    Verified,
    Mismatch { actual: String },
}

/// Per-path results of a batch hash; failures do not abort the batch
#[derive(Debug, Default)]
pub struct BatchHashResult {
    pub hashes: HashMap<PathBuf, String>,
    pub errors: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Checksum service shared by the pipelines
pub struct ChecksumService {
    algorithm: ChecksumAlgorithm,
    ttl: Duration,
    cache: RwLock<HashMap<PathBuf, ChecksumEntry>>,
    items: Arc<dyn ItemStore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ChecksumService {
    pub fn new(config: &ChecksumConfig, items: Arc<dyn ItemStore>) -> Self {
        Self {
            algorithm: config.algorithm,
            ttl: Duration::from_secs(config.ttl_secs),
            cache: RwLock::new(HashMap::new()),
            items,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Digest of `path`, served from cache when still valid
    pub async fn hash(&self, path: &Path) -> Result<String, ChecksumError> {
        let (size, modified) = stat(path).await?;
        let now = Instant::now();

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(path) {
                if entry.matches(size, modified, now) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.hash.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let hash = self.compute(path).await?;

        let now = Instant::now();
        let entry = ChecksumEntry {
            hash: hash.clone(),
            algorithm: self.algorithm,
            file_size: size,
            modified,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.cache.write().await.insert(path.to_path_buf(), entry);

        Ok(hash)
    }

    /// Digest of `path` without touching the cache
    pub async fn compute(&self, path: &Path) -> Result<String, ChecksumError> {
        let owned = path.to_path_buf();
        let algorithm = self.algorithm;

        let hash = tokio::task::spawn_blocking(move || compute_digest(&owned, algorithm))
            .await
            .map_err(|e| ChecksumError::Task(e.to_string()))?
            .map_err(|source| ChecksumError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(path = %path.display(), algorithm = ?algorithm, "Calculated checksum");
        Ok(hash)
    }

    /// Recompute the digest and compare against `expected`
    pub async fn verify_integrity(&self, path: &Path, expected: &str) -> Result<IntegrityCheck, ChecksumError> {
        let actual = self.compute(path).await?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(IntegrityCheck::Verified)
        } else {
            tracing::warn!(
                path = %path.display(),
                expected,
                actual = %actual,
                "Checksum mismatch"
            );
            Ok(IntegrityCheck::Mismatch { actual })
        }
    }

    /// Hash many paths; each failure is reported per path
    pub async fn hash_batch(&self, paths: &[PathBuf]) -> BatchHashResult {
        let mut result = BatchHashResult::default();
        for path in paths {
            match self.hash(path).await {
                Ok(hash) => {
                    result.hashes.insert(path.clone(), hash);
                }
                Err(e) => result.errors.push((path.clone(), e.to_string())),
            }
        }
        result
    }

    /// Was this exact (path, digest) pair ingested before?
    pub async fn is_already_processed(&self, path: &Path, hash: &str) -> Result<bool, ChecksumError> {
        Ok(self.items.is_processed(&path.to_string_lossy(), hash).await?)
    }

    /// Is this content already accepted anywhere, regardless of path?
    pub async fn is_already_processed_by_content(&self, hash: &str) -> Result<bool, ChecksumError> {
        Ok(self.items.content_exists(hash).await?)
    }

    /// Drop the cached digest for `path` (after it moved)
    pub async fn invalidate(&self, path: &Path) {
        self.cache.write().await.remove(path);
    }

    /// Remove entries past their TTL; returns how many were dropped
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| now < entry.expires_at);
        let removed = before - cache.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = cache.len(), "Swept expired checksum entries");
        }
        removed
    }

    /// Sweep expired entries every `period` until the handle is stopped
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let service = Arc::clone(self);
        spawn_sweeper("checksum-cache", period, move || {
            let service = Arc::clone(&service);
            async move {
                service.sweep_expired().await;
            }
        })
    }

    pub async fn stats(&self) -> ChecksumCacheStats {
        ChecksumCacheStats {
            entries: self.cache.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

async fn stat(path: &Path) -> Result<(u64, SystemTime), ChecksumError> {
    let to_err = |source| ChecksumError::Io {
        path: path.to_path_buf(),
        source,
    };
    let meta = tokio::fs::metadata(path).await.map_err(to_err)?;
    let modified = meta.modified().map_err(to_err)?;
    Ok((meta.len(), modified))
}

/// Blocking digest of a file, read in 1 MiB chunks
pub fn compute_digest(path: &Path, algorithm: ChecksumAlgorithm) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let bytes_read = file.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
        ChecksumAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            loop {
                let bytes_read = file.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(format!("{:08x}", hasher.finalize()))
        }
    }
}
