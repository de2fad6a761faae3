//! Audio metadata extraction
//!
//! Reads tags and stream properties with lofty. Extraction failures are
//! reported as errors; the validator maps them to a tag-parse quarantine.

use lofty::file::{FileType, TaggedFileExt};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;
use std::path::Path;
use thiserror::Error;

use crate::models::{AudioFormat, MediaMetadata};

/// Metadata extraction errors
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The tag reader could not identify or parse the file
    #[error("Failed to read file: {0}")]
    ReadError(String),

    /// I/O error (file read)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Metadata extractor service
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract tags and stream properties from `file_path` (blocking)
    pub fn extract(&self, file_path: &Path) -> Result<MediaMetadata, MetadataError> {
        let fs_meta = std::fs::metadata(file_path)?;
        let mut metadata = MediaMetadata::empty(file_path, fs_meta.len());
        metadata.modified = fs_meta.modified().ok();

        let tagged_file = Probe::open(file_path)
            .map_err(|e| MetadataError::ReadError(e.to_string()))?
            .read()
            .map_err(|e| MetadataError::ReadError(e.to_string()))?;

        let properties = tagged_file.properties();
        metadata.duration_secs = properties.duration().as_secs_f64();
        metadata.sample_rate = properties.sample_rate();
        metadata.bit_depth = properties.bit_depth();
        metadata.channels = properties.channels();
        metadata.bitrate_kbps = properties.audio_bitrate().or_else(|| properties.overall_bitrate());
        metadata.format = audio_format(tagged_file.file_type());

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            metadata.artist = tag.artist().map(|s| s.to_string());
            metadata.title = tag.title().map(|s| s.to_string());
            metadata.album = tag.album().map(|s| s.to_string());
            metadata.genre = tag.genre().map(|s| s.to_string());
            metadata.album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|s| s.to_string());
            metadata.year = tag.year();
            metadata.track_number = tag.track();
            metadata.track_total = tag.track_total();
            metadata.disc_number = tag.disk();
            metadata.disc_total = tag.disk_total();
        }

        for tag in tagged_file.tags() {
            for picture in tag.pictures() {
                metadata.artwork_count += 1;
                metadata.largest_artwork_bytes = metadata.largest_artwork_bytes.max(picture.data().len() as u64);
            }
        }

        tracing::debug!(
            file = %file_path.display(),
            artist = ?metadata.artist,
            title = ?metadata.title,
            duration_s = metadata.duration_secs,
            format = metadata.format.as_str(),
            "Extracted metadata"
        );

        Ok(metadata)
    }
}

fn audio_format(file_type: FileType) -> AudioFormat {
    match file_type {
        FileType::Mpeg => AudioFormat::Mp3,
        FileType::Flac => AudioFormat::Flac,
        FileType::Opus => AudioFormat::Opus,
        FileType::Vorbis => AudioFormat::Vorbis,
        FileType::Aac => AudioFormat::Aac,
        FileType::Mp4 => AudioFormat::Mp4,
        FileType::Aiff => AudioFormat::Aiff,
        FileType::Wav => AudioFormat::Wav,
        FileType::WavPack => AudioFormat::WavPack,
        FileType::Ape => AudioFormat::Ape,
        _ => AudioFormat::Unknown,
    }
}
