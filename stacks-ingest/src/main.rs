//! stacks-ingest - command line front end
//!
//! Every command opens the configured database, repairs half-finished moves
//! left by an earlier run, does its work and persists the transcode index.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use stacks_common::db::{Library, LibraryType};
use stacks_common::StacksConfig;
use stacks_ingest::db::settings::set_setting;
use stacks_ingest::db::LibraryStore;
use stacks_ingest::jobs::{Job, JobReport, JobRunner, JobScheduler, TokioJobScheduler};
use stacks_ingest::services::transcode::TranscodeRequest;
use stacks_ingest::AppContext;

#[derive(Parser, Debug)]
#[command(name = "stacks-ingest")]
#[command(about = "Ingest, promote and transcode a self-hosted media library")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("STACKS_GIT_HASH"), ", built ", env!("STACKS_BUILD_TIMESTAMP"), ")"))]
struct Args {
    /// Config file (defaults to $STACKS_CONFIG, then the user config dir)
    #[arg(short, long, env = "STACKS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the inbound folder and stage what passes validation
    Scan {
        /// Stage files even when their content is already in the library
        #[arg(long)]
        force: bool,
    },
    /// Promote staging items into production (all committed items if none given)
    Promote { ids: Vec<Uuid> },
    /// Settle pending rows left by an interrupted run
    Reconcile,
    #[command(subcommand)]
    Quarantine(QuarantineCommand),
    #[command(subcommand)]
    Library(LibraryCommand),
    /// Produce (or fetch from cache) a rendition of a file
    Transcode {
        source: PathBuf,
        #[arg(short, long, default_value = "mp3_320")]
        profile: String,
        #[arg(short, long)]
        bitrate: Option<u32>,
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Drop expired checksum entries and cache entries whose files vanished
    Sweep,
    /// Store a runtime setting (e.g. scan_worker_count)
    Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
enum QuarantineCommand {
    List,
    Restore {
        id: Uuid,
        /// Restore into this directory instead of the original location
        #[arg(long)]
        to: Option<PathBuf>,
    },
    Cleanup {
        /// Defaults to quarantine.cleanup_max_age_days
        #[arg(long)]
        max_age_days: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
enum LibraryCommand {
    List,
    /// Register a production library
    Add { name: String, path: PathBuf },
    /// Exclude a production library from placement
    Lock { name: String },
    Unlock { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = StacksConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stacks_ingest={0},stacks_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("stacks-ingest {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let ctx = Arc::new(AppContext::open(config).await.context("Failed to open library")?);
    ctx.start_sweepers().await;

    if !matches!(args.command, Command::Reconcile) {
        let report = ctx.reconcile().await.context("Startup reconcile failed")?;
        if !report.errors.is_empty() {
            tracing::warn!(errors = report.errors.len(), "Some pending rows could not be settled");
        }
    }

    let outcome = run(args.command, &ctx).await;
    ctx.shutdown().await;
    outcome
}

async fn run(command: Command, ctx: &Arc<AppContext>) -> Result<()> {
    match command {
        Command::Scan { force } => {
            let report = run_job(ctx, Job::ScanInbound { force }).await?;
            print_report(&report);
        }
        Command::Promote { ids } => {
            let report = run_job(ctx, Job::Promote { staging_ids: ids }).await?;
            print_report(&report);
        }
        Command::Reconcile => {
            let report = run_job(ctx, Job::Reconcile).await?;
            print_report(&report);
        }
        Command::Sweep => {
            for job in [Job::SweepChecksums, Job::SweepTranscodes] {
                let name = job.name();
                if let JobReport::Swept { removed } = run_job(ctx, job).await? {
                    println!("{}: removed {}", name, removed);
                }
            }
        }
        Command::Quarantine(cmd) => quarantine_command(cmd, ctx).await?,
        Command::Library(cmd) => library_command(cmd, ctx).await?,
        Command::Transcode {
            source,
            profile,
            bitrate,
            format,
        } => {
            let mut request = TranscodeRequest::new(source, profile);
            request.bitrate_kbps = bitrate;
            request.format = format;
            let result = ctx.transcode.transcode(&request).await?;
            println!(
                "{} ({} bytes, {})",
                result.path.display(),
                result.size_bytes,
                if result.cache_hit { "cached" } else { "encoded" }
            );
        }
        Command::Set { key, value } => {
            set_setting(ctx.store.as_ref(), &key, &value).await?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

/// Run one job on a scheduler that is torn down afterwards; Ctrl+C cancels scans
async fn run_job(ctx: &Arc<AppContext>, job: Job) -> Result<JobReport> {
    let cancel = CancellationToken::new();
    let runner = Arc::new(JobRunner::new(Arc::clone(ctx), cancel.clone()));
    let scheduler = TokioJobScheduler::start(runner, 1);

    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling");
                cancel.cancel();
            }
        })
    };

    let result = scheduler.run(job).await;
    watcher.abort();
    scheduler.stop().await;
    Ok(result?)
}

async fn quarantine_command(cmd: QuarantineCommand, ctx: &Arc<AppContext>) -> Result<()> {
    match cmd {
        QuarantineCommand::List => {
            for record in ctx.quarantine.list().await? {
                println!(
                    "{}  {}  {}  {}  ({})",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.reason,
                    record.original_path,
                    record.message
                );
            }
        }
        QuarantineCommand::Restore { id, to } => {
            let restored = ctx.quarantine.restore(id, to.as_deref()).await?;
            println!("restored to {}", restored.display());
        }
        QuarantineCommand::Cleanup { max_age_days } => {
            let max_age_days = max_age_days.unwrap_or(ctx.config.quarantine.cleanup_max_age_days);
            let report = run_job(ctx, Job::QuarantineCleanup { max_age_days }).await?;
            print_report(&report);
        }
    }
    Ok(())
}

async fn library_command(cmd: LibraryCommand, ctx: &AppContext) -> Result<()> {
    let store = ctx.store.as_ref();
    match cmd {
        LibraryCommand::List => {
            for library in store.list_libraries().await? {
                let used = store.library_usage_bytes(library.id).await?;
                println!(
                    "{:<16} {:<10} {:<6} {:>12}  {}",
                    library.name,
                    library.library_type,
                    if library.locked { "locked" } else { "open" },
                    used,
                    library.path.display()
                );
            }
        }
        LibraryCommand::Add { name, path } => {
            if store.find_library_by_name(&name).await?.is_some() {
                bail!("library '{}' already exists", name);
            }
            tokio::fs::create_dir_all(&path).await?;
            let path = tokio::fs::canonicalize(&path).await?;
            let library = Library::new(name, path, LibraryType::Production);
            store.insert_library(&library).await?;
            println!("added {} ({})", library.name, library.id);
        }
        LibraryCommand::Lock { name } => set_locked(store, &name, true).await?,
        LibraryCommand::Unlock { name } => set_locked(store, &name, false).await?,
    }
    Ok(())
}

async fn set_locked(store: &dyn LibraryStore, name: &str, locked: bool) -> Result<()> {
    let Some(library) = store.find_library_by_name(name).await? else {
        bail!("no library named '{}'", name);
    };
    store.set_library_locked(library.id, locked).await?;
    println!("{} {}", name, if locked { "locked" } else { "unlocked" });
    Ok(())
}

fn print_report(report: &JobReport) {
    match report {
        JobReport::Ingest(r) => {
            println!(
                "staged {}, duplicates {}, quarantined {}, cue sheets {}, errors {}",
                r.staged,
                r.duplicates,
                r.quarantined,
                r.cue_accepted,
                r.errors.len()
            );
            for (path, error) in &r.errors {
                println!("  {}: {}", path.display(), error);
            }
        }
        JobReport::Promotion(r) => {
            println!(
                "promoted {}, quarantined {}, already in production {}, errors {}",
                r.promoted,
                r.quarantined,
                r.already_in_production,
                r.errors.len()
            );
            for (id, error) in &r.errors {
                println!("  {}: {}", id, error);
            }
        }
        JobReport::Cleanup(r) => println!("removed {}, failed {}", r.removed, r.failures.len()),
        JobReport::Reconcile(r) => println!(
            "staging committed {}, discarded {}; production committed {}, discarded {}; errors {}",
            r.staging_committed, r.staging_discarded, r.production_committed, r.production_discarded, r.errors.len()
        ),
        JobReport::Swept { removed } => println!("removed {}", removed),
    }
}
