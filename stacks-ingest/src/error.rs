//! Error types for stacks-ingest
//!
//! Each service owns a narrow error enum; `IngestError` is the pipeline-level
//! taxonomy that callers match on.

use thiserror::Error;

use crate::services::checksum::ChecksumError;
use crate::services::library_selector::PlacementError;
use crate::services::path_resolver::ResolveError;
use crate::services::quarantine::{PathSafetyError, QuarantineError};
use crate::services::file_scanner::ScanError;
use crate::services::transcode::TranscodeError;
use crate::services::validator::ValidationFailure;

/// Pipeline result type
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Pipeline-level error
#[derive(Debug, Error)]
pub enum IngestError {
    /// A validator gate rejected the file
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    /// No production library can take the item
    #[error("Placement failed: {0}")]
    Placement(#[from] PlacementError),

    /// Store read or write failed
    #[error("Persistence failed: {0}")]
    Persistence(#[from] stacks_common::Error),

    #[error("Transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Unsafe path: {0}")]
    PathSafety(#[from] PathSafetyError),

    #[error("Path resolution failed: {0}")]
    PathResolution(#[from] ResolveError),

    #[error("Checksum failed: {0}")]
    Checksum(#[from] ChecksumError),

    #[error("Quarantine failed: {0}")]
    Quarantine(#[from] QuarantineError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record exists but is not in a state the operation accepts
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,
}
