//! Cache-or-encode front end for renditions

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Semaphore;

use stacks_common::db::QuarantineReason;

use super::cache::{cache_key, source_digest, CacheError, PendingArtifact, TranscodeCache};
use super::encoder::{EncodeError, Encoder};
use super::profiles::ProfileRegistry;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Unknown transcode profile: {0}")]
    UnknownProfile(String),

    #[error("Cannot read source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Rendition of {size} bytes exceeds the cache budget of {max} bytes")]
    ExceedsBudget { size: u64, max: u64 },

    #[error("Transcode cache error: {0}")]
    Cache(CacheError),

    #[error("Transcode worker pool closed")]
    Closed,
}

impl From<CacheError> for TranscodeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ExceedsBudget { size, max } => TranscodeError::ExceedsBudget { size, max },
            other => TranscodeError::Cache(other),
        }
    }
}

impl TranscodeError {
    /// Quarantine reason for failures that indict the source file
    pub fn quarantine_reason(&self) -> Option<QuarantineReason> {
        match self {
            TranscodeError::Encode(_) => Some(QuarantineReason::EncoderFailure),
            _ => None,
        }
    }
}

/// One rendition request
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub profile: String,
    /// Overrides the profile's bitrate
    pub bitrate_kbps: Option<u32>,
    /// Overrides the profile's container
    pub format: Option<String>,
}

impl TranscodeRequest {
    pub fn new(source: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            profile: profile.into(),
            bitrate_kbps: None,
            format: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub path: PathBuf,
    pub cache_hit: bool,
    pub size_bytes: u64,
}

pub struct TranscodeService {
    cache: Arc<TranscodeCache>,
    encoder: Arc<dyn Encoder>,
    profiles: ProfileRegistry,
    permits: Semaphore,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TranscodeService {
    pub fn new(
        cache: Arc<TranscodeCache>,
        encoder: Arc<dyn Encoder>,
        profiles: ProfileRegistry,
        workers: usize,
    ) -> Self {
        Self {
            cache,
            encoder,
            profiles,
            permits: Semaphore::new(workers.max(1)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<TranscodeCache> {
        &self.cache
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Return a cached rendition, encoding it first on a miss.
    ///
    /// Concurrent misses for the same key share one encoder run.
    pub async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeResult, TranscodeError> {
        let profile = self
            .profiles
            .get(&request.profile)
            .ok_or_else(|| TranscodeError::UnknownProfile(request.profile.clone()))?;
        let bitrate = request.bitrate_kbps.unwrap_or(profile.bitrate_kbps);
        let format = request.format.clone().unwrap_or_else(|| profile.format.clone());

        let meta = tokio::fs::metadata(&request.source)
            .await
            .map_err(|source| TranscodeError::Source {
                path: request.source.clone(),
                source,
            })?;
        let modified = meta.modified().map_err(|source| TranscodeError::Source {
            path: request.source.clone(),
            source,
        })?;
        let digest = source_digest(&request.source, modified, meta.len());
        let key = cache_key(&digest, &profile.name, bitrate, &format);

        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(key = %key, "Transcode cache hit");
            return Ok(TranscodeResult {
                path: hit.path,
                cache_hit: true,
                size_bytes: hit.size_bytes,
            });
        }

        let key_lock = self.key_lock(&key);
        let guard = key_lock.lock().await;

        // Another request may have finished this key while we waited
        let outcome = match self.cache.get(&key).await {
            Some(hit) => Ok(TranscodeResult {
                path: hit.path,
                cache_hit: true,
                size_bytes: hit.size_bytes,
            }),
            None => {
                let artifact = PendingArtifact {
                    key: key.clone(),
                    source_path: request.source.clone(),
                    source_digest: digest,
                    profile: profile.name.clone(),
                    format: format.clone(),
                    bitrate_kbps: bitrate,
                };
                self.encode_and_admit(&request.source, artifact, profile, bitrate).await
            }
        };

        drop(guard);
        self.release_key_lock(&key, &key_lock);
        outcome
    }

    async fn encode_and_admit(
        &self,
        source: &Path,
        artifact: PendingArtifact,
        profile: &super::profiles::TranscodeProfile,
        bitrate: u32,
    ) -> Result<TranscodeResult, TranscodeError> {
        let _permit = self.permits.acquire().await.map_err(|_| TranscodeError::Closed)?;

        tokio::fs::create_dir_all(self.cache.root())
            .await
            .map_err(|e| TranscodeError::Cache(CacheError::Io(e)))?;
        let temp = self.cache.temp_path(&artifact.key, &artifact.format);

        tracing::debug!(
            source = %source.display(),
            profile = %profile.name,
            bitrate,
            "Transcode cache miss, encoding"
        );

        if let Err(e) = self.encoder.encode(source, &temp, profile, bitrate).await {
            let _ = tokio::fs::remove_file(&temp).await;
            tracing::warn!(source = %source.display(), error = %e, "Encoding failed");
            return Err(TranscodeError::Encode(e));
        }
        if !tokio::fs::try_exists(&temp).await.unwrap_or(false) {
            return Err(TranscodeError::Encode(EncodeError::MissingOutput(temp)));
        }

        let (entry, evicted) = self.cache.admit(artifact, &temp).await?;
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "Evicted renditions to fit new entry");
        }

        Ok(TranscodeResult {
            path: entry.path,
            cache_hit: false,
            size_bytes: entry.size_bytes,
        })
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = match self.in_flight.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(map.entry(key.to_string()).or_default())
    }

    fn release_key_lock(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = match self.in_flight.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Two strong refs left means only the map and this caller hold it
        if Arc::strong_count(lock) <= 2 {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transcode::profiles::TranscodeProfile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct CountingEncoder {
        calls: AtomicUsize,
        output_len: usize,
        delay: Duration,
    }

    #[async_trait]
    impl Encoder for CountingEncoder {
        async fn encode(&self, _input: &Path, output: &Path, _profile: &TranscodeProfile, _bitrate_kbps: u32) -> Result<(), EncodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            tokio::fs::write(output, vec![7u8; self.output_len]).await?;
            Ok(())
        }
    }

    struct BrokenEncoder;

    #[async_trait]
    impl Encoder for BrokenEncoder {
        async fn encode(&self, _input: &Path, _output: &Path, _profile: &TranscodeProfile, _bitrate_kbps: u32) -> Result<(), EncodeError> {
            Err(EncodeError::Failed {
                status: Some(1),
                stderr: "invalid data".to_string(),
            })
        }
    }

    fn setup(encoder: Arc<dyn Encoder>, max_bytes: u64) -> (TempDir, PathBuf, TranscodeService) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("song.flac");
        std::fs::write(&source, b"fake flac").unwrap();
        let cache = Arc::new(TranscodeCache::new(dir.path().join("cache"), max_bytes));
        let service = TranscodeService::new(cache, encoder, ProfileRegistry::with_builtins(), 2);
        (dir, source, service)
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let encoder = Arc::new(CountingEncoder {
            calls: AtomicUsize::new(0),
            output_len: 64,
            delay: Duration::ZERO,
        });
        let (_dir, source, service) = setup(encoder.clone(), 1024);
        let request = TranscodeRequest::new(&source, "mp3_192");

        let first = service.transcode(&request).await.unwrap();
        let second = service.transcode(&request).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.path, second.path);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.path.extension().unwrap(), "mp3");
    }

    #[tokio::test]
    async fn test_concurrent_misses_encode_once() {
        let encoder = Arc::new(CountingEncoder {
            calls: AtomicUsize::new(0),
            output_len: 32,
            delay: Duration::from_millis(50),
        });
        let (_dir, source, service) = setup(encoder.clone(), 1024);
        let service = Arc::new(service);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                let request = TranscodeRequest::new(&source, "opus_128");
                tokio::spawn(async move { service.transcode(&request).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let (_dir, source, service) = setup(Arc::new(BrokenEncoder), 1024);
        let err = service
            .transcode(&TranscodeRequest::new(&source, "flac_lossless"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::UnknownProfile(_)));
    }

    #[tokio::test]
    async fn test_encoder_failure_leaves_no_temp_file() {
        let (dir, source, service) = setup(Arc::new(BrokenEncoder), 1024);
        let err = service
            .transcode(&TranscodeRequest::new(&source, "mp3_320"))
            .await
            .unwrap_err();

        assert_eq!(err.quarantine_reason(), Some(QuarantineReason::EncoderFailure));
        let leftovers = std::fs::read_dir(dir.path().join("cache")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_oversized_rendition_rejected() {
        let encoder = Arc::new(CountingEncoder {
            calls: AtomicUsize::new(0),
            output_len: 200,
            delay: Duration::ZERO,
        });
        let (_dir, source, service) = setup(encoder, 100);
        let err = service
            .transcode(&TranscodeRequest::new(&source, "mp3_192"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::ExceedsBudget { size: 200, max: 100 }));
        assert_eq!(service.cache().stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_bitrate_override_changes_key() {
        let encoder = Arc::new(CountingEncoder {
            calls: AtomicUsize::new(0),
            output_len: 16,
            delay: Duration::ZERO,
        });
        let (_dir, source, service) = setup(encoder.clone(), 1024);

        let mut request = TranscodeRequest::new(&source, "mp3_320");
        let default_rate = service.transcode(&request).await.unwrap();
        request.bitrate_kbps = Some(128);
        let low_rate = service.transcode(&request).await.unwrap();

        assert_ne!(default_rate.path, low_rate.path);
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    }
}
