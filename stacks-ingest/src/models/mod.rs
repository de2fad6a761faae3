//! Data models for the ingestion pipeline
//!
//! Persisted rows live in `stacks_common::db::models`; these types only exist
//! while an item is moving through the pipeline.

pub mod media;

pub use media::{AudioFormat, MediaFile, MediaMetadata};
