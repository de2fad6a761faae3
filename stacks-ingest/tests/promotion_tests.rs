//! Staging → production promotion tests

mod helpers;

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use helpers::{FailingItemStore, TestEnv};
use stacks_common::db::{QuarantineReason, RecordStatus};
use stacks_ingest::db::{ItemStore, LibraryStore};
use stacks_ingest::services::library_selector::PlacementError;
use stacks_ingest::services::path_resolver::ArtistAlbumResolver;
use stacks_ingest::utils::RetryPolicy;
use stacks_ingest::workflow::{IngestOptions, IngestOutcome, PromotionOutcome, PromotionPipeline};
use stacks_ingest::IngestError;
use uuid::Uuid;

/// Drop a tone into inbound and stage it
async fn stage(env: &TestEnv, name: &str, frequency: f32, options: IngestOptions) -> (Uuid, std::path::PathBuf) {
    let source = env.drop_wav(name, frequency);
    match env.ctx.ingestion.ingest_file(&source, options).await.unwrap() {
        IngestOutcome::Staged { staging_id, path, .. } => (staging_id, path),
        other => panic!("expected Staged, got {:?}", other),
    }
}

#[tokio::test]
async fn test_promote_moves_file_and_commits_rows() {
    let env = TestEnv::new().await;
    let pool = env.add_production_library("pool-a").await;
    let (staging_id, staged_path) = stage(&env, "keeper.wav", 440.0, IngestOptions::default()).await;

    let outcome = env.ctx.promotion.promote(staging_id).await.unwrap();
    let PromotionOutcome::Promoted {
        production_id,
        library_id,
        path,
    } = outcome
    else {
        panic!("expected Promoted, got {:?}", outcome);
    };

    assert_eq!(library_id, pool.id);
    assert!(path.starts_with(&pool.path));
    assert!(path.exists());
    assert!(!staged_path.exists());

    let production = env.ctx.store.get_production(production_id).await.unwrap().unwrap();
    assert_eq!(production.status, RecordStatus::Committed);
    assert_eq!(production.staging_id, Some(staging_id));
    assert_eq!(pool.path.join(&production.relative_path), path);

    let staged = env.ctx.store.get_staging(staging_id).await.unwrap().unwrap();
    assert_eq!(staged.status, RecordStatus::Promoted);
    assert_eq!(staged.promoted_to, Some(production_id));
    assert_eq!(production.content_hash, staged.content_hash);

    let used = env.ctx.store.library_usage_bytes(pool.id).await.unwrap();
    assert_eq!(used, production.size_bytes);
}

#[tokio::test]
async fn test_modified_staged_file_is_quarantined() {
    let env = TestEnv::new().await;
    env.add_production_library("pool-a").await;
    let (staging_id, staged_path) = stage(&env, "tampered.wav", 880.0, IngestOptions::default()).await;

    let mut file = std::fs::OpenOptions::new().append(true).open(&staged_path).unwrap();
    file.write_all(b"extra bytes").unwrap();
    drop(file);

    let outcome = env.ctx.promotion.promote(staging_id).await.unwrap();
    assert!(matches!(
        outcome,
        PromotionOutcome::Quarantined {
            reason: QuarantineReason::ChecksumMismatch,
            ..
        }
    ));

    assert!(!staged_path.exists());
    let file_name = staged_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(env.quarantine_path("checksum_mismatch", &file_name).exists());
    assert!(env.ctx.store.list_production(RecordStatus::Committed).await.unwrap().is_empty());
    assert!(env.ctx.store.list_production(RecordStatus::Pending).await.unwrap().is_empty());

    let staged = env.ctx.store.get_staging(staging_id).await.unwrap().unwrap();
    assert_eq!(staged.status, RecordStatus::Quarantined);
    assert!(env.ctx.store.list_staging(RecordStatus::Committed).await.unwrap().is_empty());

    let report = env.ctx.promotion.promote_all().await.unwrap();
    assert_eq!(report.promoted, 0);
    assert!(report.errors.is_empty());

    // A clean copy of the same recording is accepted again
    let (fresh_id, _) = stage(&env, "tampered again.wav", 880.0, IngestOptions::default()).await;
    assert!(matches!(
        env.ctx.promotion.promote(fresh_id).await.unwrap(),
        PromotionOutcome::Promoted { .. }
    ));
}

#[tokio::test]
async fn test_failed_production_commit_returns_file_to_staging() {
    let env = TestEnv::new().await;
    let pool = env.add_production_library("pool-a").await;
    let (staging_id, staged_path) = stage(&env, "bounce.wav", 300.0, IngestOptions::default()).await;

    let failing = Arc::new(FailingItemStore::new(env.ctx.store.clone()));
    failing.fail_commit_production.store(true, Ordering::SeqCst);
    let pipeline = PromotionPipeline::new(
        env.ctx.checksums.clone(),
        env.ctx.quarantine.clone(),
        failing.clone(),
        env.ctx.store.clone(),
        env.ctx.selector.clone(),
        Arc::new(ArtistAlbumResolver),
        env.ctx.staging.clone(),
    )
    .with_retry(RetryPolicy::none());

    let err = pipeline.promote(staging_id).await.unwrap_err();
    assert!(matches!(err, IngestError::Persistence(_)));

    assert!(staged_path.exists(), "file must be back in staging");
    assert!(env.ctx.store.list_production(RecordStatus::Pending).await.unwrap().is_empty());
    assert!(env.ctx.store.list_production(RecordStatus::Committed).await.unwrap().is_empty());
    assert_eq!(
        env.ctx.store.get_staging(staging_id).await.unwrap().unwrap().status,
        RecordStatus::Committed
    );

    let stray = walkdir::WalkDir::new(&pool.path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(stray, 0);

    // Once the store recovers the same item promotes normally
    failing.fail_commit_production.store(false, Ordering::SeqCst);
    let outcome = pipeline.promote(staging_id).await.unwrap();
    assert!(matches!(outcome, PromotionOutcome::Promoted { .. }));
}

#[tokio::test]
async fn test_only_locked_libraries_fails_placement() {
    let env = TestEnv::new().await;
    let pool = env.add_production_library("pool-a").await;
    env.ctx.store.set_library_locked(pool.id, true).await.unwrap();
    let (staging_id, staged_path) = stage(&env, "homeless.wav", 350.0, IngestOptions::default()).await;

    let err = env.ctx.promotion.promote(staging_id).await.unwrap_err();
    assert!(matches!(err, IngestError::Placement(PlacementError::NoEligibleLibrary(_))));
    assert!(staged_path.exists());
}

#[tokio::test]
async fn test_locked_library_is_skipped() {
    let env = TestEnv::new().await;
    let locked = env.add_production_library("pool-a").await;
    let open = env.add_production_library("pool-b").await;
    env.ctx.store.set_library_locked(locked.id, true).await.unwrap();

    for (i, freq) in [210.0, 220.0, 230.0].into_iter().enumerate() {
        let (staging_id, _) = stage(&env, &format!("t{}.wav", i), freq, IngestOptions::default()).await;
        match env.ctx.promotion.promote(staging_id).await.unwrap() {
            PromotionOutcome::Promoted { library_id, .. } => assert_eq!(library_id, open.id),
            other => panic!("expected Promoted, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_same_content_promoted_once() {
    let env = TestEnv::new().await;
    env.add_production_library("pool-a").await;
    let (first, _) = stage(&env, "twin a.wav", 640.0, IngestOptions::default()).await;
    let (second, second_path) = stage(&env, "twin b.wav", 640.0, IngestOptions { force: true }).await;

    assert!(matches!(
        env.ctx.promotion.promote(first).await.unwrap(),
        PromotionOutcome::Promoted { .. }
    ));
    assert!(matches!(
        env.ctx.promotion.promote(second).await.unwrap(),
        PromotionOutcome::AlreadyInProduction { .. }
    ));
    assert!(second_path.exists(), "second copy stays in staging");
    assert_eq!(env.ctx.store.list_production(RecordStatus::Committed).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_promote_all_reports_each_item() {
    let env = TestEnv::new().await;
    env.add_production_library("pool-a").await;
    env.add_production_library("pool-b").await;
    for (i, freq) in [100.0, 150.0, 175.0, 190.0].into_iter().enumerate() {
        stage(&env, &format!("batch {}.wav", i), freq, IngestOptions::default()).await;
    }

    let report = env.ctx.promotion.promote_all().await.unwrap();
    assert_eq!(report.promoted, 4);
    assert!(report.errors.is_empty());
    assert!(env.ctx.store.list_staging(RecordStatus::Committed).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_promote_unknown_item_is_not_found() {
    let env = TestEnv::new().await;
    let err = env.ctx.promotion.promote(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
}
