//! Services used by the ingest and promotion pipelines

pub mod checksum;
pub mod cue_sheet;
pub mod file_scanner;
pub mod library_selector;
pub mod metadata_extractor;
pub mod normalizer;
pub mod path_resolver;
pub mod quarantine;
pub mod transcode;
pub mod validator;

pub use checksum::{BatchHashResult, ChecksumError, ChecksumService, IntegrityCheck};
pub use file_scanner::{FileScanner, ScanError, ScanOptions, ScanResult};
pub use library_selector::{LibrarySelector, Placement, PlacementCandidate, PlacementError, Selection};
pub use metadata_extractor::{MetadataError, MetadataExtractor};
pub use normalizer::{normalize, NormalizeError, NormalizedMetadata};
pub use path_resolver::{directory_code, ArtistAlbumResolver, ItemIdentity, PathResolver, ResolveError};
pub use quarantine::{CleanupReport, PathSafetyError, QuarantineError, QuarantineService};
pub use transcode::{TranscodeError, TranscodeRequest, TranscodeResult, TranscodeService};
pub use validator::{MediaFileValidator, ValidationFailure, ValidationGate};
