//! Inbound scan tests

mod helpers;

use helpers::TestEnv;
use stacks_ingest::services::file_scanner::ScanOptions;
use stacks_ingest::workflow::IngestOptions;
use stacks_ingest::IngestError;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_scan_picks_up_audio_and_cue_sheets_only() {
    let env = TestEnv::new().await;
    env.drop_wav("one.wav", 300.0);
    env.drop_wav("nested/two.wav", 310.0);
    std::fs::write(env.inbound().join("notes.txt"), "liner notes").unwrap();
    std::fs::write(env.inbound().join("set.cue"), "FILE \"one.wav\" WAVE\n").unwrap();

    let result = env
        .ctx
        .scanner
        .scan(env.inbound(), &ScanOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let mut names: Vec<String> = result.files.iter().map(|f| f.file_name()).collect();
    names.sort();
    assert_eq!(names, ["one.wav", "set.cue", "two.wav"]);
    assert_eq!(result.by_format.get("wav"), Some(&2));
    assert!(!result.truncated);
}

#[tokio::test]
async fn test_scan_respects_file_limit() {
    let env = TestEnv::new().await;
    for i in 0..5 {
        env.drop_wav(&format!("f{}.wav", i), 200.0 + i as f32 * 10.0);
    }

    let options = ScanOptions {
        max_files: Some(3),
        ..ScanOptions::default()
    };
    let result = env
        .ctx
        .scanner
        .scan(env.inbound(), &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.files.len(), 3);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_cancelled_scan_ingests_nothing() {
    let env = TestEnv::new().await;
    let source = env.drop_wav("waiting.wav", 440.0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let options = env.ctx.scan_options().await.unwrap();
    let err = env
        .ctx
        .ingestion
        .scan_and_ingest(&env.ctx.scanner, &options, &cancel, IngestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert!(source.exists());
}

#[tokio::test]
async fn test_runtime_setting_overrides_scan_workers() {
    let env = TestEnv::new().await;
    stacks_ingest::db::settings::set_setting(env.ctx.store.as_ref(), "scan_worker_count", "7")
        .await
        .unwrap();

    let options = env.ctx.scan_options().await.unwrap();
    assert_eq!(options.workers, 7);
}
