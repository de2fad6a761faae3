//! Background jobs
//!
//! Work that runs outside a direct request is a [`Job`] value handed to a
//! [`JobScheduler`]. [`TokioJobScheduler`] queues jobs on a bounded channel
//! and runs them one at a time on a worker task until stopped.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app::AppContext;
use crate::error::{IngestError, IngestResult};
use crate::services::quarantine::CleanupReport;
use crate::workflow::{BatchReport, IngestOptions, PromotionReport, ReconcileReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    ScanInbound { force: bool },
    /// Promote the listed staging items, or every committed one when empty
    Promote { staging_ids: Vec<Uuid> },
    QuarantineCleanup { max_age_days: u32 },
    Reconcile,
    SweepChecksums,
    SweepTranscodes,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ScanInbound { .. } => "scan_inbound",
            Job::Promote { .. } => "promote",
            Job::QuarantineCleanup { .. } => "quarantine_cleanup",
            Job::Reconcile => "reconcile",
            Job::SweepChecksums => "sweep_checksums",
            Job::SweepTranscodes => "sweep_transcodes",
        }
    }
}

#[derive(Debug)]
pub enum JobReport {
    Ingest(BatchReport),
    Promotion(PromotionReport),
    Cleanup(CleanupReport),
    Reconcile(ReconcileReport),
    Swept { removed: usize },
}

/// Executes one job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: Job) -> IngestResult<JobReport>;
}

/// Runs jobs against the application services
pub struct JobRunner {
    ctx: Arc<AppContext>,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(ctx: Arc<AppContext>, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn run(&self, job: Job) -> IngestResult<JobReport> {
        match job {
            Job::ScanInbound { force } => {
                let scan_options = self.ctx.scan_options().await?;
                let (_, report) = self
                    .ctx
                    .ingestion
                    .scan_and_ingest(&self.ctx.scanner, &scan_options, &self.cancel, IngestOptions { force })
                    .await?;
                Ok(JobReport::Ingest(report))
            }
            Job::Promote { staging_ids } if staging_ids.is_empty() => {
                Ok(JobReport::Promotion(self.ctx.promotion.promote_all().await?))
            }
            Job::Promote { staging_ids } => {
                Ok(JobReport::Promotion(self.ctx.promotion.promote_batch(staging_ids).await))
            }
            Job::QuarantineCleanup { max_age_days } => {
                Ok(JobReport::Cleanup(self.ctx.quarantine.cleanup(max_age_days).await?))
            }
            Job::Reconcile => Ok(JobReport::Reconcile(self.ctx.reconcile().await?)),
            Job::SweepChecksums => Ok(JobReport::Swept {
                removed: self.ctx.checksums.sweep_expired().await,
            }),
            Job::SweepTranscodes => Ok(JobReport::Swept {
                removed: self.ctx.transcode.cache().sweep_missing().await,
            }),
        }
    }
}

/// Accepts jobs for asynchronous execution
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Queue `job` without waiting for it
    async fn submit(&self, job: Job) -> IngestResult<()>;

    /// Queue `job` and wait for its report
    async fn run(&self, job: Job) -> IngestResult<JobReport>;
}

type Reply = oneshot::Sender<IngestResult<JobReport>>;

pub struct TokioJobScheduler {
    sender: mpsc::Sender<(Job, Option<Reply>)>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl TokioJobScheduler {
    /// Spawn the worker task; at most `capacity` jobs wait in the queue
    pub fn start(handler: Arc<dyn JobHandler>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<(Job, Option<Reply>)>(capacity.max(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let worker = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => None,
                    next = receiver.recv() => next,
                };
                let Some((job, reply)) = next else {
                    break;
                };

                let name = job.name();
                tracing::debug!(job = name, "Job started");
                let result = handler.run(job).await;
                match &result {
                    Ok(_) => tracing::debug!(job = name, "Job finished"),
                    Err(e) => tracing::warn!(job = name, error = %e, "Job failed"),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            tracing::debug!("Job worker stopped");
        });

        Self { sender, cancel, worker }
    }

    /// Stop taking jobs and wait for the one in progress to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        drop(self.sender);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Job worker ended abnormally");
        }
    }

    async fn enqueue(&self, job: Job, reply: Option<Reply>) -> IngestResult<()> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::InvalidState("job scheduler stopped".to_string()));
        }
        self.sender
            .send((job, reply))
            .await
            .map_err(|_| IngestError::InvalidState("job scheduler stopped".to_string()))
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn submit(&self, job: Job) -> IngestResult<()> {
        self.enqueue(job, None).await
    }

    async fn run(&self, job: Job) -> IngestResult<JobReport> {
        let (reply, response) = oneshot::channel();
        self.enqueue(job, Some(reply)).await?;
        response
            .await
            .map_err(|_| IngestError::InvalidState("job dropped before completion".to_string()))?
    }
}
