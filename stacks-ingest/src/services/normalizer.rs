//! Metadata normalization
//!
//! Turns raw tag values into the identity used for naming and placement.
//! Missing artist/album get placeholder values; inconsistent numbering is
//! rejected as a metadata conflict.

use thiserror::Error;

use crate::models::MediaMetadata;
use crate::services::path_resolver::directory_code;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Track number {track} exceeds track total {total}")]
    TrackConflict { track: u32, total: u32 },

    #[error("Disc number {disc} exceeds disc total {total}")]
    DiscConflict { disc: u32, total: u32 },

    #[error("No usable title")]
    EmptyTitle,
}

/// Identity of an item after cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMetadata {
    pub artist: String,
    pub album: String,
    pub title: String,
    /// "Artist - Title"
    pub display_name: String,
    pub directory_code: String,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
}

/// Trim and collapse internal whitespace; `None` when nothing is left
pub fn clean_text(raw: Option<&str>) -> Option<String> {
    let collapsed = raw?.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Normalize `metadata`; `file_stem` supplies the title when the tag has none
pub fn normalize(metadata: &MediaMetadata, file_stem: &str) -> Result<NormalizedMetadata, NormalizeError> {
    if let (Some(track), Some(total)) = (metadata.track_number, metadata.track_total) {
        if total > 0 && track > total {
            return Err(NormalizeError::TrackConflict { track, total });
        }
    }
    if let (Some(disc), Some(total)) = (metadata.disc_number, metadata.disc_total) {
        if total > 0 && disc > total {
            return Err(NormalizeError::DiscConflict { disc, total });
        }
    }

    let artist = clean_text(metadata.artist.as_deref())
        .or_else(|| clean_text(metadata.album_artist.as_deref()))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = clean_text(metadata.album.as_deref()).unwrap_or_else(|| UNKNOWN_ALBUM.to_string());
    let title = clean_text(metadata.title.as_deref())
        .or_else(|| clean_text(Some(file_stem)))
        .ok_or(NormalizeError::EmptyTitle)?;

    Ok(NormalizedMetadata {
        display_name: format!("{} - {}", artist, title),
        directory_code: directory_code(&artist),
        artist,
        album,
        title,
        track_number: metadata.track_number,
        disc_number: metadata.disc_number,
    })
}
