//! Quarantine: isolate failed files with an audit record
//!
//! Files land in `{root}/{reason}/{yyyy-mm-dd}/{name}`. The move and the
//! record are kept consistent: when the record cannot be written the file is
//! moved back to where it was found.

use chrono::{Duration as ChronoDuration, Utc};
use stacks_common::db::{QuarantineReason, QuarantineRecord};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::QuarantineStore;
use crate::services::path_resolver::sanitize_file_name;
use crate::utils::{move_file, unique_path};

/// Rejection reasons of the path guard
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSafetyError {
    #[error("path contains a parent-directory traversal: {0}")]
    Traversal(String),

    #[error("path contains a NUL byte")]
    NullByte,

    #[error("path is {len} bytes long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("path is not in canonical form: {0}")]
    NotClean(String),
}

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("Quarantine record {0} not found")]
    NotFound(Uuid),

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Quarantine record store failed: {0}")]
    Store(#[from] stacks_common::Error),

    #[error("Quarantined file is missing: {0}")]
    MissingFile(PathBuf),

    #[error("Restore target already exists: {0}")]
    TargetExists(PathBuf),

    #[error(transparent)]
    UnsafePath(#[from] PathSafetyError),
}

/// Result of an age-based cleanup; failures are listed, not fatal
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<(Uuid, String)>,
}

/// Reject paths that could escape their root or smuggle odd bytes.
///
/// A path passes only if it has no `../` or `..\` segment, no NUL byte, is
/// at most `max_len` bytes, and lexical cleaning leaves it unchanged.
pub fn validate_path(path: &Path, max_len: usize) -> Result<(), PathSafetyError> {
    let raw = path.to_string_lossy();

    if raw.contains('\0') {
        return Err(PathSafetyError::NullByte);
    }
    if raw.len() > max_len {
        return Err(PathSafetyError::TooLong {
            len: raw.len(),
            max: max_len,
        });
    }
    if raw.contains("../") || raw.contains("..\\") || raw == ".." || raw.ends_with("/..") {
        return Err(PathSafetyError::Traversal(raw.into_owned()));
    }

    let cleaned = clean_path(path);
    if cleaned.as_os_str() != path.as_os_str() {
        return Err(PathSafetyError::NotClean(raw.into_owned()));
    }

    Ok(())
}

/// Lexical cleanup: drop interior `.` segments, resolve `..`, collapse
/// separators. A leading `./` is kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for (index, component) in path.components().enumerate() {
        match component {
            Component::CurDir if index == 0 => out.push("."),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_))) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Quarantine service
pub struct QuarantineService {
    root: PathBuf,
    store: Arc<dyn QuarantineStore>,
    max_path_len: usize,
}

impl QuarantineService {
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn QuarantineStore>, max_path_len: usize) -> Self {
        Self {
            root: root.into(),
            store,
            max_path_len,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path guard with this service's length limit
    pub fn validate_path(&self, path: &Path) -> Result<(), PathSafetyError> {
        validate_path(path, self.max_path_len)
    }

    /// Move `path` into quarantine and record why
    pub async fn quarantine(
        &self,
        path: &Path,
        reason: QuarantineReason,
        message: &str,
        library_id: Option<Uuid>,
    ) -> Result<QuarantineRecord, QuarantineError> {
        // Only the destination name is cleaned; the record keeps the path as found
        let file_name = path
            .file_name()
            .map(|n| sanitize_file_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "unnamed".to_string());
        let dated_dir = self
            .root
            .join(reason.as_str())
            .join(Utc::now().format("%Y-%m-%d").to_string());

        let destination = self.free_destination(&dated_dir, &file_name).await?;

        move_file(path, &destination)
            .await
            .map_err(|source| QuarantineError::Move {
                from: path.to_path_buf(),
                to: destination.clone(),
                source,
            })?;

        let record = QuarantineRecord {
            id: Uuid::new_v4(),
            file_path: destination.to_string_lossy().into_owned(),
            original_path: path.to_string_lossy().into_owned(),
            reason,
            message: message.to_string(),
            library_id,
            created_at: Utc::now(),
        };

        if let Err(store_err) = self.store.insert_quarantine(&record).await {
            tracing::error!(
                path = %path.display(),
                error = %store_err,
                "Quarantine record failed, moving file back"
            );
            if let Err(e) = move_file(&destination, path).await {
                tracing::error!(
                    file = %destination.display(),
                    original = %path.display(),
                    error = %e,
                    "Could not move file back after failed quarantine record"
                );
            }
            return Err(QuarantineError::Store(store_err));
        }

        tracing::warn!(
            path = %path.display(),
            destination = %destination.display(),
            reason = reason.as_str(),
            message,
            "File quarantined"
        );
        Ok(record)
    }

    /// Move a quarantined file back and drop its record.
    ///
    /// Without `target_dir` the file returns to its original path.
    pub async fn restore(&self, id: Uuid, target_dir: Option<&Path>) -> Result<PathBuf, QuarantineError> {
        let record = self
            .store
            .get_quarantine(id)
            .await?
            .ok_or(QuarantineError::NotFound(id))?;

        let current = PathBuf::from(&record.file_path);
        if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Err(QuarantineError::MissingFile(current));
        }

        let original = PathBuf::from(&record.original_path);
        let target = match target_dir {
            Some(dir) => {
                let name = original
                    .file_name()
                    .or_else(|| current.file_name())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("restored"));
                dir.join(name)
            }
            None => original,
        };
        self.validate_path(&target)?;

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(QuarantineError::TargetExists(target));
        }

        move_file(&current, &target)
            .await
            .map_err(|source| QuarantineError::Move {
                from: current.clone(),
                to: target.clone(),
                source,
            })?;

        if let Err(store_err) = self.store.delete_quarantine(id).await {
            tracing::error!(id = %id, error = %store_err, "Deleting quarantine record failed, moving file back");
            if let Err(e) = move_file(&target, &current).await {
                tracing::error!(file = %target.display(), error = %e, "Could not return restored file to quarantine");
            }
            return Err(QuarantineError::Store(store_err));
        }

        tracing::info!(id = %id, target = %target.display(), "Quarantined file restored");
        Ok(target)
    }

    /// Delete quarantined files older than `max_age_days`
    pub async fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport, QuarantineError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let expired = self.store.list_quarantine_before(cutoff).await?;
        let mut report = CleanupReport::default();

        for record in expired {
            match tokio::fs::remove_file(&record.file_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(id = %record.id, file = %record.file_path, error = %e, "Cleanup could not delete file");
                    report.failures.push((record.id, e.to_string()));
                    continue;
                }
            }

            match self.store.delete_quarantine(record.id).await {
                Ok(()) => report.removed += 1,
                Err(e) => report.failures.push((record.id, e.to_string())),
            }
        }

        tracing::info!(
            removed = report.removed,
            failures = report.failures.len(),
            max_age_days,
            "Quarantine cleanup finished"
        );
        Ok(report)
    }

    pub async fn list(&self) -> Result<Vec<QuarantineRecord>, QuarantineError> {
        Ok(self.store.list_quarantine().await?)
    }

    async fn free_destination(&self, dir: &Path, file_name: &str) -> Result<PathBuf, QuarantineError> {
        let candidate = dir.join(file_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }

        let suffix = Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..8];
        let name = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
            _ => format!("{}-{}", file_name, suffix),
        };
        let candidate = dir.join(name);
        unique_path(&candidate).await.map_err(|source| QuarantineError::Move {
            from: dir.join(file_name),
            to: candidate.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use stacks_common::db::open_in_memory;
    use tempfile::TempDir;

    #[test]
    fn test_validate_path_accepts_clean_paths() {
        assert!(validate_path(Path::new("/music/inbound/a.flac"), 4096).is_ok());
        assert!(validate_path(Path::new("BEA/The Beatles/Abbey Road/x.flac"), 4096).is_ok());
        assert!(validate_path(Path::new("file..name.mp3"), 4096).is_ok());
    }

    #[test]
    fn test_validate_path_rejections() {
        assert!(matches!(
            validate_path(Path::new("/music/../etc/passwd"), 4096),
            Err(PathSafetyError::Traversal(_))
        ));
        assert!(matches!(
            validate_path(Path::new("music\\..\\x"), 4096),
            Err(PathSafetyError::Traversal(_))
        ));
        assert_eq!(validate_path(Path::new("a\0b"), 4096), Err(PathSafetyError::NullByte));
        assert!(matches!(
            validate_path(Path::new("/a/bcdef"), 4),
            Err(PathSafetyError::TooLong { len: 8, max: 4 })
        ));
        assert!(matches!(
            validate_path(Path::new("/music//a.mp3"), 4096),
            Err(PathSafetyError::NotClean(_))
        ));
        assert!(matches!(
            validate_path(Path::new("/music/./a.mp3"), 4096),
            Err(PathSafetyError::NotClean(_))
        ));
        assert!(matches!(
            validate_path(Path::new("/music/dir/"), 4096),
            Err(PathSafetyError::NotClean(_))
        ));
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(clean_path(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(clean_path(Path::new("")), PathBuf::from("."));
        assert_eq!(clean_path(Path::new("./data/a.mp3")), PathBuf::from("./data/a.mp3"));
    }

    async fn service(root: &Path) -> (QuarantineService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::new(open_in_memory().await.unwrap()));
        (QuarantineService::new(root, store.clone(), 4096), store)
    }

    #[tokio::test]
    async fn test_quarantine_moves_file_under_reason_and_date() {
        let dir = TempDir::new().unwrap();
        let inbound = dir.path().join("inbound");
        std::fs::create_dir_all(&inbound).unwrap();
        let file = inbound.join("bad.mp3");
        std::fs::write(&file, b"junk").unwrap();

        let (svc, store) = service(&dir.path().join("quarantine")).await;
        let record = svc
            .quarantine(&file, QuarantineReason::TagParseError, "no frames", None)
            .await
            .unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let expected = dir
            .path()
            .join("quarantine")
            .join("tag_parse_error")
            .join(today)
            .join("bad.mp3");
        assert!(!file.exists());
        assert!(expected.exists());
        assert_eq!(PathBuf::from(&record.file_path), expected);
        assert_eq!(record.original_path, file.to_string_lossy());
        assert_eq!(store.list_quarantine().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_name_collision_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let (svc, _store) = service(&dir.path().join("q")).await;

        let a = dir.path().join("a").join("song.mp3");
        let b = dir.path().join("b").join("song.mp3");
        for p in [&a, &b] {
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, b"x").unwrap();
        }

        let first = svc.quarantine(&a, QuarantineReason::ValidationFailed, "x", None).await.unwrap();
        let second = svc.quarantine(&b, QuarantineReason::ValidationFailed, "x", None).await.unwrap();

        assert_ne!(first.file_path, second.file_path);
        assert!(Path::new(&first.file_path).exists());
        assert!(Path::new(&second.file_path).exists());
    }

    #[tokio::test]
    async fn test_restore_to_original_location() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("in").join("song.flac");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"x").unwrap();

        let (svc, store) = service(&dir.path().join("q")).await;
        let record = svc.quarantine(&file, QuarantineReason::MetadataConflict, "x", None).await.unwrap();

        let restored = svc.restore(record.id, None).await.unwrap();
        assert_eq!(restored, file);
        assert!(file.exists());
        assert!(store.get_quarantine(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_into_target_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("in").join("song.flac");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"x").unwrap();

        let (svc, _store) = service(&dir.path().join("q")).await;
        let record = svc.quarantine(&file, QuarantineReason::MetadataConflict, "x", None).await.unwrap();

        let target_dir = dir.path().join("review");
        let restored = svc.restore(record.id, Some(&target_dir)).await.unwrap();
        assert_eq!(restored, target_dir.join("song.flac"));
        assert!(restored.exists());
    }

    #[tokio::test]
    async fn test_restore_unknown_id() {
        let dir = TempDir::new().unwrap();
        let (svc, _store) = service(dir.path()).await;
        assert!(matches!(
            svc.restore(Uuid::new_v4(), None).await,
            Err(QuarantineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_records() {
        let dir = TempDir::new().unwrap();
        let (svc, store) = service(&dir.path().join("q")).await;

        let old_file = dir.path().join("old.mp3");
        std::fs::write(&old_file, b"x").unwrap();
        let old = QuarantineRecord {
            id: Uuid::new_v4(),
            file_path: old_file.to_string_lossy().into_owned(),
            original_path: "/in/old.mp3".to_string(),
            reason: QuarantineReason::ValidationFailed,
            message: "x".to_string(),
            library_id: None,
            created_at: Utc::now() - ChronoDuration::days(45),
        };
        store.insert_quarantine(&old).await.unwrap();

        let fresh_src = dir.path().join("fresh.mp3");
        std::fs::write(&fresh_src, b"x").unwrap();
        let fresh = svc.quarantine(&fresh_src, QuarantineReason::ValidationFailed, "x", None).await.unwrap();

        let report = svc.cleanup(30).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(report.failures.is_empty());
        assert!(!old_file.exists());
        assert!(Path::new(&fresh.file_path).exists());
        assert_eq!(store.list_quarantine().await.unwrap().len(), 1);
    }
}
