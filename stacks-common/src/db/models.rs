//! Shared database models
//!
//! Row types for libraries, staging/production items and quarantine records.
//! Timestamps are stored as RFC 3339 text and ids as UUID text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Role a library root plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryType {
    Inbound,
    Staging,
    Production,
}

impl LibraryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::Inbound => "inbound",
            LibraryType::Staging => "staging",
            LibraryType::Production => "production",
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LibraryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(LibraryType::Inbound),
            "staging" => Ok(LibraryType::Staging),
            "production" => Ok(LibraryType::Production),
            other => Err(Error::InvalidInput(format!("Unknown library type: {}", other))),
        }
    }
}

/// A storage root (inbound area, staging area, or one production pool)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub library_type: LibraryType,
    /// Locked libraries are never chosen as a placement target
    pub locked: bool,
}

impl Library {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, library_type: LibraryType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            library_type,
            locked: false,
        }
    }
}

/// Saga state of an item row
///
/// Rows are written `Pending` before the file move and flipped to `Committed`
/// once the move succeeded. `Promoted` and `Quarantined` only apply to staging
/// rows; a quarantined row no longer counts as accepted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Committed,
    Promoted,
    Quarantined,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Committed => "committed",
            RecordStatus::Promoted => "promoted",
            RecordStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "committed" => Ok(RecordStatus::Committed),
            "promoted" => Ok(RecordStatus::Promoted),
            "quarantined" => Ok(RecordStatus::Quarantined),
            other => Err(Error::InvalidInput(format!("Unknown record status: {}", other))),
        }
    }
}

/// One media item sitting in the staging area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub id: Uuid,
    /// Display name ("Artist - Title")
    pub name: String,
    /// Directory code derived from the artist name
    pub directory: String,
    pub filename: String,
    /// Path relative to the staging root
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Inbound path the file was moved from
    pub original_path: String,
    pub status: RecordStatus,
    /// Production record created by promotion
    pub promoted_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One media item served from a production library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub staging_id: Option<Uuid>,
    pub name: String,
    pub directory: String,
    pub filename: String,
    /// Path relative to the production library root
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a file was isolated
///
/// The string form doubles as the quarantine sub-directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    ChecksumMismatch,
    TagParseError,
    UnsupportedContainer,
    EncoderFailure,
    PathUnsafe,
    ValidationFailed,
    MetadataConflict,
    DiskFull,
    CueMissingAudio,
}

impl QuarantineReason {
    pub const ALL: [QuarantineReason; 9] = [
        QuarantineReason::ChecksumMismatch,
        QuarantineReason::TagParseError,
        QuarantineReason::UnsupportedContainer,
        QuarantineReason::EncoderFailure,
        QuarantineReason::PathUnsafe,
        QuarantineReason::ValidationFailed,
        QuarantineReason::MetadataConflict,
        QuarantineReason::DiskFull,
        QuarantineReason::CueMissingAudio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::ChecksumMismatch => "checksum_mismatch",
            QuarantineReason::TagParseError => "tag_parse_error",
            QuarantineReason::UnsupportedContainer => "unsupported_container",
            QuarantineReason::EncoderFailure => "encoder_failure",
            QuarantineReason::PathUnsafe => "path_unsafe",
            QuarantineReason::ValidationFailed => "validation_failed",
            QuarantineReason::MetadataConflict => "metadata_conflict",
            QuarantineReason::DiskFull => "disk_full",
            QuarantineReason::CueMissingAudio => "cue_missing_audio",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuarantineReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuarantineReason::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown quarantine reason: {}", s)))
    }
}

/// Audit row for one isolation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: Uuid,
    /// Where the file lives now
    pub file_path: String,
    /// Where the file was found, verbatim
    pub original_path: String,
    pub reason: QuarantineReason,
    pub message: String,
    pub library_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
