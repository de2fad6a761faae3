//! # Stacks Common Library
//!
//! Shared code for the Stacks media library crates:
//! - Error type
//! - Configuration loading
//! - Database schema and row models

pub mod config;
pub mod db;
pub mod error;

pub use config::StacksConfig;
pub use error::{Error, Result};
