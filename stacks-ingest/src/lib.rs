//! stacks-ingest - media library ingest core
//!
//! Moves audio from an inbound drop folder into a normalized staging tree,
//! promotes approved items into production libraries, isolates bad files in
//! quarantine and serves transcoded renditions from a byte-bounded cache.

pub mod app;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::app::AppContext;
pub use crate::error::{IngestError, IngestResult};
