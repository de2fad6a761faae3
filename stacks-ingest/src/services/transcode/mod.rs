//! Transcoding: profiles, encoder contract, rendition cache, service

pub mod cache;
pub mod encoder;
pub mod profiles;
pub mod service;

pub use cache::{cache_key, source_digest, CacheError, CacheStats, CachedFile, PendingArtifact, TranscodeCache};
pub use encoder::{EncodeError, Encoder, FfmpegEncoder};
pub use profiles::{ProfileRegistry, TranscodeProfile};
pub use service::{TranscodeError, TranscodeRequest, TranscodeResult, TranscodeService};
