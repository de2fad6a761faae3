//! Discovered files and their extracted metadata

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A regular file found during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Lowercase extension without the dot
    pub extension: Option<String>,
}

impl MediaFile {
    /// Stat `path` and build the descriptor
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        Ok(Self::from_parts(path, meta.len(), meta.modified()?))
    }

    pub fn from_parts(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        let extension = lowercase_extension(&path);
        Self {
            path,
            size,
            modified,
            extension,
        }
    }

    /// Final path component, lossily decoded
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_cue_sheet(&self) -> bool {
        self.extension.as_deref() == Some("cue")
    }
}

/// Lowercase extension of `path`, if any
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Container/codec family detected by the tag reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Vorbis,
    Opus,
    Aac,
    Mp4,
    Wav,
    Aiff,
    WavPack,
    Ape,
    Unknown,
}

impl AudioFormat {
    /// Lossless formats are exempt from the lossy bitrate ceiling
    pub fn is_lossless(&self) -> bool {
        matches!(
            self,
            AudioFormat::Flac | AudioFormat::Wav | AudioFormat::Aiff | AudioFormat::WavPack | AudioFormat::Ape
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Vorbis => "vorbis",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
            AudioFormat::Mp4 => "mp4",
            AudioFormat::Wav => "wav",
            AudioFormat::Aiff => "aiff",
            AudioFormat::WavPack => "wavpack",
            AudioFormat::Ape => "ape",
            AudioFormat::Unknown => "unknown",
        }
    }
}

/// Everything the tag reader learned about one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
    /// Filled in once the checksum gate ran
    pub content_hash: Option<String>,

    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub track_total: Option<u32>,
    pub disc_number: Option<u32>,
    pub disc_total: Option<u32>,

    pub format: AudioFormat,
    pub duration_secs: f64,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u8>,
    pub channels: Option<u8>,

    pub artwork_count: usize,
    /// Size of the largest embedded picture
    pub largest_artwork_bytes: u64,
}

impl MediaMetadata {
    /// Empty metadata for `path`, used as the starting point by the extractor
    pub fn empty(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            modified: None,
            content_hash: None,
            artist: None,
            album_artist: None,
            title: None,
            album: None,
            genre: None,
            year: None,
            track_number: None,
            track_total: None,
            disc_number: None,
            disc_total: None,
            format: AudioFormat::Unknown,
            duration_secs: 0.0,
            bitrate_kbps: None,
            sample_rate: None,
            bit_depth: None,
            channels: None,
            artwork_count: 0,
            largest_artwork_bytes: 0,
        }
    }
}
