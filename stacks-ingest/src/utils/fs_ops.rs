//! File moves shared by quarantine, ingestion and promotion

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// ENOSPC on Linux and macOS
#[cfg(unix)]
const ENOSPC: i32 = 28;
/// ERROR_DISK_FULL
#[cfg(windows)]
const ENOSPC: i32 = 112;

/// Move `from` to `to`, creating parent directories.
///
/// Tries a rename first and falls back to copy + remove when the rename is
/// refused (for example across filesystems). A partial copy is removed
/// before the error is returned.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(rename_err) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "Rename refused, falling back to copy"
            );
            if let Err(copy_err) = tokio::fs::copy(from, to).await {
                let _ = tokio::fs::remove_file(to).await;
                return Err(copy_err);
            }
            tokio::fs::remove_file(from).await
        }
    }
}

/// Moves a file between library roots
#[async_trait]
pub trait FileMover: Send + Sync {
    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`move_file`] on the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMover;

#[async_trait]
impl FileMover for LocalMover {
    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        move_file(from, to).await
    }
}

/// True when the error means the destination device ran out of space
pub fn is_disk_full(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ENOSPC)
}

/// First free path among `path`, `stem (1).ext`, `stem (2).ext`, ...
pub async fn unique_path(path: &Path) -> io::Result<PathBuf> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(path.to_path_buf());
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1u32.. {
        let name = match &ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"payload").unwrap();
        let dst = dir.path().join("x").join("y").join("a.bin");

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let err = move_file(&dir.path().join("nope"), &dir.path().join("dst"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unique_path_appends_counter() {
        let dir = TempDir::new().unwrap();
        let taken = dir.path().join("song.flac");
        std::fs::write(&taken, b"1").unwrap();
        std::fs::write(dir.path().join("song (1).flac"), b"2").unwrap();

        let free = unique_path(&taken).await.unwrap();
        assert_eq!(free, dir.path().join("song (2).flac"));
    }

    #[test]
    fn test_disk_full_detection() {
        assert!(is_disk_full(&io::Error::from_raw_os_error(ENOSPC)));
        assert!(!is_disk_full(&io::Error::new(io::ErrorKind::Other, "x")));
    }
}
