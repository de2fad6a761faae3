//! Item workflows: inbound → staging, staging → production, and the
//! startup repair of both

pub mod ingestion;
pub mod promotion;
pub mod reconcile;

pub use ingestion::{BatchReport, IngestOptions, IngestOutcome, IngestState, IngestionPipeline};
pub use promotion::{PromotionOutcome, PromotionPipeline, PromotionReport};
pub use reconcile::{reconcile_pending, ReconcileReport};
