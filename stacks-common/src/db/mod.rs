//! Database schema and shared row models

pub mod init;
pub mod models;

pub use init::{init_database, init_schema, open_in_memory};
pub use models::{
    Library, LibraryType, ProductionRecord, QuarantineReason, QuarantineRecord, RecordStatus,
    StagingRecord,
};
