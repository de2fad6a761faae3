//! Byte-bounded LRU cache of encoded renditions
//!
//! Keys are derived from the source file's identity (path, mtime, size) and
//! the requested rendition, so the same request always maps to the same
//! entry. Encoders write to a uniquely named temp file which is renamed into
//! place when the entry is admitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::utils::{spawn_sweeper, SweeperHandle};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("artifact of {size} bytes exceeds the cache budget of {max} bytes")]
    ExceedsBudget { size: u64, max: u64 },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache index error: {0}")]
    Index(#[from] serde_json::Error),
}

/// One cached rendition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFile {
    pub key: String,
    pub source_path: PathBuf,
    pub source_digest: String,
    pub profile: String,
    pub format: String,
    pub bitrate_kbps: u32,
    pub size_bytes: u64,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Monotonic access counter; the lowest value is evicted first
    #[serde(default)]
    pub access_seq: u64,
}

/// What the caller knows about an artifact before it is admitted
#[derive(Debug, Clone)]
pub struct PendingArtifact {
    pub key: String,
    pub source_path: PathBuf,
    pub source_digest: String,
    pub profile: String,
    pub format: String,
    pub bitrate_kbps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub current_bytes: u64,
    pub max_bytes: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<String, CachedFile>,
    current_bytes: u64,
    clock: u64,
}

impl CacheIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, entry: CachedFile) {
        self.clock = self.clock.max(entry.access_seq);
        self.current_bytes += entry.size_bytes;
        if let Some(old) = self.entries.insert(entry.key.clone(), entry) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }
    }

    fn remove(&mut self, key: &str) -> Option<CachedFile> {
        let removed = self.entries.remove(key)?;
        self.current_bytes = self.current_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    fn least_recently_used(&self) -> Option<String> {
        self.entries
            .values()
            .min_by(|a, b| a.access_seq.cmp(&b.access_seq).then_with(|| a.key.cmp(&b.key)))
            .map(|e| e.key.clone())
    }
}

/// Digest of a source file's identity
pub fn source_digest(path: &Path, modified: SystemTime, size: u64) -> String {
    let mtime_nanos = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(mtime_nanos.to_le_bytes());
    hasher.update(size.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Deterministic, filesystem-safe cache key
pub fn cache_key(source_digest: &str, profile: &str, bitrate_kbps: u32, format: &str) -> String {
    format!("{}_{}_{}k_{}", source_digest, profile, bitrate_kbps, format)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Rendition cache
pub struct TranscodeCache {
    root: PathBuf,
    max_bytes: u64,
    index: RwLock<CacheIndex>,
}

impl TranscodeCache {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            index: RwLock::new(CacheIndex::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Where an admitted artifact lives
    pub fn final_path(&self, key: &str, format: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, sanitize_ext(format)))
    }

    /// Fresh temp path for an in-progress encode; unique per call
    pub fn temp_path(&self, key: &str, format: &str) -> PathBuf {
        self.root.join(format!(
            ".tmp-{}-{}.{}",
            key,
            Uuid::new_v4().simple(),
            sanitize_ext(format)
        ))
    }

    /// Look up `key` and mark it recently used.
    ///
    /// An entry whose file vanished is dropped and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<CachedFile> {
        let path = self.index.read().await.entries.get(key)?.path.clone();
        let present = tokio::fs::try_exists(&path).await.unwrap_or(false);

        let mut index = self.index.write().await;
        if !present {
            // Leave a concurrently re-admitted entry alone
            if index.entries.get(key).is_some_and(|e| e.path == path) {
                tracing::debug!(key, path = %path.display(), "Cached rendition missing on disk, dropping entry");
                index.remove(key);
            }
            return None;
        }

        let seq = index.tick();
        let entry = index.entries.get_mut(key)?;
        entry.access_seq = seq;
        entry.last_access = Utc::now();
        Some(entry.clone())
    }

    /// Move the finished temp file into the cache, evicting as needed.
    ///
    /// Returns the admitted entry and whatever was evicted to make room.
    /// An artifact bigger than the whole budget is deleted and rejected.
    pub async fn admit(
        &self,
        artifact: PendingArtifact,
        temp_path: &Path,
    ) -> Result<(CachedFile, Vec<CachedFile>), CacheError> {
        let size = match tokio::fs::metadata(temp_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                let _ = tokio::fs::remove_file(temp_path).await;
                return Err(CacheError::Io(e));
            }
        };

        if size > self.max_bytes {
            let _ = tokio::fs::remove_file(temp_path).await;
            tracing::warn!(
                key = %artifact.key,
                size,
                max_bytes = self.max_bytes,
                "Rendition larger than the cache budget, discarded"
            );
            return Err(CacheError::ExceedsBudget {
                size,
                max: self.max_bytes,
            });
        }

        let final_path = self.final_path(&artifact.key, &artifact.format);
        let mut index = self.index.write().await;

        if let Some(previous) = index.remove(&artifact.key) {
            if previous.path != final_path {
                remove_quietly(&previous.path).await;
            }
        }

        let mut evicted = Vec::new();
        while index.current_bytes + size > self.max_bytes {
            let Some(victim_key) = index.least_recently_used() else {
                break;
            };
            if let Some(victim) = index.remove(&victim_key) {
                remove_quietly(&victim.path).await;
                tracing::debug!(key = %victim.key, size = victim.size_bytes, "Evicted rendition");
                evicted.push(victim);
            }
        }

        if let Err(e) = tokio::fs::rename(temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(temp_path).await;
            return Err(CacheError::Io(e));
        }

        let now = Utc::now();
        let seq = index.tick();
        let entry = CachedFile {
            key: artifact.key,
            source_path: artifact.source_path,
            source_digest: artifact.source_digest,
            profile: artifact.profile,
            format: artifact.format,
            bitrate_kbps: artifact.bitrate_kbps,
            size_bytes: size,
            path: final_path,
            created_at: now,
            last_access: now,
            access_seq: seq,
        };
        index.insert(entry.clone());

        Ok((entry, evicted))
    }

    /// Forget `key` and delete its file
    pub async fn remove(&self, key: &str) -> Option<CachedFile> {
        let removed = self.index.write().await.remove(key)?;
        remove_quietly(&removed.path).await;
        Some(removed)
    }

    /// Drop entries whose backing file no longer exists
    pub async fn sweep_missing(&self) -> usize {
        let snapshot: Vec<(String, PathBuf)> = {
            let index = self.index.read().await;
            index
                .entries
                .values()
                .map(|e| (e.key.clone(), e.path.clone()))
                .collect()
        };

        let mut missing = Vec::new();
        for (key, path) in snapshot {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                missing.push(key);
            }
        }

        if missing.is_empty() {
            return 0;
        }

        let mut index = self.index.write().await;
        let removed = missing.iter().filter(|key| index.remove(key).is_some()).count();
        tracing::debug!(removed, "Swept cache entries with missing files");
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        CacheStats {
            entries: index.entries.len(),
            current_bytes: index.current_bytes,
            max_bytes: self.max_bytes,
        }
    }

    pub async fn entries(&self) -> Vec<CachedFile> {
        let mut entries: Vec<CachedFile> = self.index.read().await.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.access_seq);
        entries
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Write the index next to the cached files
    pub async fn persist_index(&self) -> Result<(), CacheError> {
        let entries = self.entries().await;
        let json = serde_json::to_vec_pretty(&entries)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = self.root.join(format!(".{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.index_path()).await?;

        tracing::debug!(entries = entries.len(), "Persisted transcode cache index");
        Ok(())
    }

    /// Load a persisted index, skipping entries whose file is gone.
    ///
    /// Returns how many entries were restored.
    pub async fn load_index(&self) -> Result<usize, CacheError> {
        let path = self.index_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::Io(e)),
        };
        let entries: Vec<CachedFile> = serde_json::from_slice(&bytes)?;

        let mut restored = Vec::new();
        for entry in entries {
            if tokio::fs::try_exists(&entry.path).await.unwrap_or(false) {
                restored.push(entry);
            }
        }

        let mut index = self.index.write().await;
        for entry in restored {
            index.insert(entry);
        }
        while index.current_bytes > self.max_bytes {
            let Some(victim_key) = index.least_recently_used() else {
                break;
            };
            if let Some(victim) = index.remove(&victim_key) {
                remove_quietly(&victim.path).await;
            }
        }

        let count = index.entries.len();
        tracing::info!(entries = count, bytes = index.current_bytes, "Loaded transcode cache index");
        Ok(count)
    }

    /// Sweep missing files every `period` until the handle is stopped
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let cache = Arc::clone(self);
        spawn_sweeper("transcode-cache", period, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.sweep_missing().await;
            }
        })
    }
}

fn sanitize_ext(format: &str) -> String {
    format.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not delete cached rendition"),
    }
}
