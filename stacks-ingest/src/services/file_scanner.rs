//! Inbound file scanner
//!
//! A blocking walkdir traversal feeds candidate paths into a bounded channel;
//! a fixed set of async workers stat each candidate and keep the ones with a
//! supported extension. Scanning stops early on cancellation or once the
//! optional file limit is reached.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::models::media::{lowercase_extension, MediaFile};

/// Scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A walker or worker task panicked
    #[error("Scan task failed: {0}")]
    Task(String),
}

/// Per-scan knobs
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub workers: usize,
    pub channel_buffer: usize,
    /// Stop after this many accepted files
    pub max_files: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_buffer: 256,
            max_files: None,
        }
    }
}

/// Scan result with statistics
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Accepted files, sorted by path
    pub files: Vec<MediaFile>,
    /// Total size of all accepted files in bytes
    pub total_size: u64,
    /// Count of files by extension
    pub by_format: HashMap<String, usize>,
    /// Entries that could not be read; the scan continued past them
    pub errors: Vec<String>,
    /// The file limit was reached before the walk finished
    pub truncated: bool,
    pub cancelled: bool,
}

#[derive(Default)]
struct ScanCounters {
    accepted: AtomicUsize,
    total_size: AtomicU64,
    stop: AtomicBool,
}

/// Inbound scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    ignore_patterns: Vec<String>,
    extensions: HashSet<String>,
}

impl FileScanner {
    /// Scanner accepting `extensions` (lowercase, no dot) plus cue sheets
    pub fn new(extensions: &[String], ignore_patterns: Vec<String>) -> Self {
        let mut extensions: HashSet<String> = extensions.iter().map(|e| e.to_lowercase()).collect();
        extensions.insert("cue".to_string());
        Self {
            ignore_patterns,
            extensions,
        }
    }

    /// True when the scanner would hand `path` to the pipeline
    pub fn accepts(&self, path: &Path) -> bool {
        lowercase_extension(path)
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Walk `root` and collect accepted files
    pub async fn scan(
        &self,
        root: &Path,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<ScanResult, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let (tx, rx) = mpsc::channel::<PathBuf>(options.channel_buffer.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(ScanCounters::default());
        let accepted_files = Arc::new(Mutex::new(Vec::new()));
        let worker_errors = Arc::new(Mutex::new(Vec::new()));

        let walker = {
            let root = root.to_path_buf();
            let ignore_patterns = self.ignore_patterns.clone();
            let cancel = cancel.clone();
            let counters = Arc::clone(&counters);
            tokio::task::spawn_blocking(move || {
                walk(&root, &ignore_patterns, tx, &cancel, &counters)
            })
        };

        let worker_count = options.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            let accepted_files = Arc::clone(&accepted_files);
            let worker_errors = Arc::clone(&worker_errors);
            let cancel = cancel.clone();
            let extensions = self.extensions.clone();
            let max_files = options.max_files;

            workers.push(tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some(path) = next else { break };

                    if cancel.is_cancelled() {
                        break;
                    }
                    if counters.stop.load(Ordering::SeqCst) {
                        continue;
                    }

                    let accepted_ext = lowercase_extension(&path)
                        .map(|ext| extensions.contains(&ext))
                        .unwrap_or(false);
                    if !accepted_ext {
                        continue;
                    }

                    let file = match MediaFile::from_path(&path).await {
                        Ok(file) => file,
                        Err(e) => {
                            worker_errors
                                .lock()
                                .await
                                .push(format!("{}: {}", path.display(), e));
                            continue;
                        }
                    };

                    let admitted = counters.accepted.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        match max_files {
                            Some(max) if n >= max => None,
                            _ => Some(n + 1),
                        }
                    });
                    match admitted {
                        Ok(previous) => {
                            if max_files == Some(previous + 1) {
                                counters.stop.store(true, Ordering::SeqCst);
                            }
                            counters.total_size.fetch_add(file.size, Ordering::SeqCst);
                            accepted_files.lock().await.push(file);
                        }
                        Err(_) => counters.stop.store(true, Ordering::SeqCst),
                    }
                }
                tracing::trace!(worker_id, "Scan worker finished");
            }));
        }

        let mut errors = walker.await.map_err(|e| ScanError::Task(e.to_string()))?;
        for worker in workers {
            worker.await.map_err(|e| ScanError::Task(e.to_string()))?;
        }

        errors.append(&mut *worker_errors.lock().await);
        let mut files = std::mem::take(&mut *accepted_files.lock().await);
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut by_format = HashMap::new();
        for file in &files {
            if let Some(ext) = &file.extension {
                *by_format.entry(ext.clone()).or_insert(0) += 1;
            }
        }

        let result = ScanResult {
            total_size: counters.total_size.load(Ordering::SeqCst),
            truncated: counters.stop.load(Ordering::SeqCst),
            cancelled: cancel.is_cancelled(),
            files,
            by_format,
            errors,
        };

        tracing::info!(
            root = %root.display(),
            files = result.files.len(),
            total_size = result.total_size,
            errors = result.errors.len(),
            truncated = result.truncated,
            cancelled = result.cancelled,
            "Scan complete"
        );

        Ok(result)
    }
}

/// Blocking traversal; returns per-entry errors
fn walk(
    root: &Path,
    ignore_patterns: &[String],
    tx: mpsc::Sender<PathBuf>,
    cancel: &CancellationToken,
    counters: &ScanCounters,
) -> Vec<String> {
    let mut errors = Vec::new();
    let mut symlink_visited = HashSet::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| should_process_entry(e, ignore_patterns, &mut symlink_visited));

    for entry in walker {
        if cancel.is_cancelled() || counters.stop.load(Ordering::SeqCst) {
            break;
        }

        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && tx.blocking_send(entry.into_path()).is_err() {
                    // All workers are gone
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                errors.push(e.to_string());
            }
        }
    }

    errors
}

fn should_process_entry(entry: &DirEntry, ignore_patterns: &[String], symlink_visited: &mut HashSet<PathBuf>) -> bool {
    let file_name = entry.file_name().to_string_lossy();

    if ignore_patterns.iter().any(|pattern| file_name.contains(pattern.as_str())) {
        return false;
    }

    if entry.file_type().is_symlink() {
        if let Ok(canonical) = entry.path().canonicalize() {
            if !symlink_visited.insert(canonical) {
                tracing::warn!("Symlink loop detected: {}", entry.path().display());
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scanner() -> FileScanner {
        FileScanner::new(
            &["mp3".to_string(), "flac".to_string()],
            vec![".DS_Store".to_string(), ".git".to_string()],
        )
    }

    fn options(workers: usize, max_files: Option<usize>) -> ScanOptions {
        ScanOptions {
            workers,
            channel_buffer: 2,
            max_files,
        }
    }

    #[tokio::test]
    async fn test_scan_nonexistent_path() {
        let result = scanner()
            .scan(Path::new("/nonexistent/path"), &ScanOptions::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ScanError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_scan_file_as_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp3");
        fs::write(&file, b"x").unwrap();

        let result = scanner()
            .scan(&file, &ScanOptions::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ScanError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_scan_filters_extensions_and_ignores() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("one.mp3"), b"1").unwrap();
        fs::write(dir.path().join("nested/two.FLAC"), b"22").unwrap();
        fs::write(dir.path().join("nested/deeper/album.cue"), b"333").unwrap();
        fs::write(dir.path().join("nested/notes.txt"), b"x").unwrap();
        fs::write(dir.path().join(".git/hidden.mp3"), b"x").unwrap();

        let result = scanner()
            .scan(dir.path(), &options(3, None), &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<String> = result.files.iter().map(|f| f.file_name()).collect();
        assert_eq!(names.len(), 3, "got {:?}", names);
        assert!(names.contains(&"one.mp3".to_string()));
        assert!(names.contains(&"two.FLAC".to_string()));
        assert!(names.contains(&"album.cue".to_string()));
        assert_eq!(result.total_size, 6);
        assert_eq!(result.by_format.get("flac"), Some(&1));
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_scan_stops_at_max_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("{:02}.mp3", i)), b"x").unwrap();
        }

        let result = scanner()
            .scan(dir.path(), &options(4, Some(5)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.files.len(), 5);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_cancelled_scan_returns_early() {
        let dir = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(dir.path().join(format!("{}.mp3", i)), b"x").unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scanner().scan(dir.path(), &options(2, None), &cancel).await.unwrap();
        assert!(result.cancelled);
        assert!(result.files.is_empty());
    }

    #[test]
    fn test_accepts() {
        let s = scanner();
        assert!(s.accepts(Path::new("/a/b.MP3")));
        assert!(s.accepts(Path::new("/a/b.cue")));
        assert!(!s.accepts(Path::new("/a/b.txt")));
        assert!(!s.accepts(Path::new("/a/noext")));
    }
}
