mod common;

use chrono::Duration as ChronoDuration;
use chronicle::db::{Archive, Database};
use chronicle::diagnostics::Diagnostics;
use chronicle::ingest::{EngineState, IngestionEngine, TickOutcome};
use chronicle::transport::MessageSource;
use chronicle::watermark::{resume_epsilon, WatermarkSource};
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn engine(archive: Arc<dyn Archive>, source: Arc<dyn MessageSource>) -> IngestionEngine {
    IngestionEngine::new(
        Some(archive),
        source,
        Some(CHANNEL),
        Duration::from_secs(3600),
        ChronoDuration::days(14),
        Diagnostics::default(),
    )
}

fn completed(outcome: TickOutcome) -> chronicle::ingest::IngestReport {
    match outcome {
        TickOutcome::Completed(report) => report,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_archive_then_rerun_keeps_three_records() {
    let t1 = seconds_ago(3 * 3600);
    let t2 = seconds_ago(2 * 3600);
    let t3 = seconds_ago(3600);
    let source = shared(FakeHistory::new(vec![
        message(t1, 0, "first"),
        message(t2, 0, "second"),
        message(t3, 0, "third"),
    ]));
    let archive: Arc<dyn Archive> = Arc::new(memory_db());
    let engine = engine(archive.clone(), source.clone());

    let first = completed(engine.tick().await);
    assert_eq!(first.resume_point.source, WatermarkSource::Fallback);
    assert_eq!(first.fetched, 3);
    assert_eq!(first.stored, 3);
    assert_eq!(archive.count(&CHANNEL.to_string()).await.unwrap(), 3);

    let second = completed(engine.tick().await);
    assert_eq!(second.fetched, 0);
    assert_eq!(
        second.resume_point.source,
        WatermarkSource::Stored {
            epoch: t3.timestamp()
        }
    );
    assert_eq!(second.resume_point.at, t3 + resume_epsilon());
    assert_eq!(archive.count(&CHANNEL.to_string()).await.unwrap(), 3);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn new_upstream_messages_are_picked_up_next_run() {
    let source = shared(FakeHistory::new(vec![message(seconds_ago(600), 0, "old")]));
    let archive: Arc<dyn Archive> = Arc::new(memory_db());
    let engine = engine(archive.clone(), source.clone());

    completed(engine.tick().await);
    source.push(message(seconds_ago(60), 0, "new"));

    let report = completed(engine.tick().await);
    assert_eq!(report.fetched, 1);
    assert_eq!(archive.count(&CHANNEL.to_string()).await.unwrap(), 2);
}

#[tokio::test]
async fn reingesting_the_same_ids_never_duplicates() {
    let mut history = FakeHistory::new(vec![
        message(seconds_ago(300), 0, "a"),
        message(seconds_ago(200), 0, "b"),
    ]);
    history.ignore_after = true;
    let source = shared(history);
    let db = memory_db();
    let archive: Arc<dyn Archive> = Arc::new(db.clone());

    completed(engine(archive.clone(), source.clone()).tick().await);
    // A fresh engine over a source that re-serves everything.
    source.pages_served.store(0, std::sync::atomic::Ordering::SeqCst);
    let report = completed(engine(archive.clone(), source.clone()).tick().await);

    assert_eq!(report.stored, 2);
    assert_eq!(archive.count(&CHANNEL.to_string()).await.unwrap(), 2);
}

#[tokio::test]
async fn pages_are_walked_oldest_first_until_exhausted() {
    let base = seconds_ago(5 * 3600);
    let messages = (0..250)
        .map(|i| message(base + ChronoDuration::seconds(i), 0, &format!("msg {}", i)))
        .collect();
    let source = shared(FakeHistory::new(messages));
    let archive: Arc<dyn Archive> = Arc::new(memory_db());

    let report = completed(engine(archive.clone(), source.clone()).tick().await);
    assert_eq!(report.fetched, 250);
    assert_eq!(report.stored, 250);
    // Two full pages and a short one.
    assert_eq!(source.pages_served.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(
        archive.max_timestamp_epoch(&CHANNEL.to_string()).await.unwrap(),
        Some((base + ChronoDuration::seconds(249)).timestamp())
    );
}

#[tokio::test]
async fn failed_upserts_are_logged_and_skipped() {
    let bad = message(seconds_ago(500), 0, "unlucky");
    let bad_id = bad.id.to_string();
    let source = shared(FakeHistory::new(vec![
        message(seconds_ago(600), 0, "fine"),
        bad,
        message(seconds_ago(400), 0, "also fine"),
    ]));
    let mut counting = CountingArchive::new(memory_db());
    counting.fail_upsert_ids = vec![bad_id];
    let archive: Arc<dyn Archive> = Arc::new(counting);

    let report = completed(engine(archive.clone(), source).tick().await);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.stored, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(archive.count(&CHANNEL.to_string()).await.unwrap(), 2);
}

#[tokio::test]
async fn transport_failure_aborts_only_the_current_run() {
    let base = seconds_ago(4 * 3600);
    let messages = (0..150)
        .map(|i| message(base + ChronoDuration::seconds(i), 0, "m"))
        .collect();
    let mut history = FakeHistory::new(messages);
    history.fail_after_pages = Some(1);
    let source = shared(history);
    let archive: Arc<dyn Archive> = Arc::new(memory_db());
    let engine = engine(archive.clone(), source.clone());

    match engine.tick().await {
        TickOutcome::Aborted(reason) => assert!(reason.contains("after 100 messages")),
        other => panic!("expected an aborted run, got {:?}", other),
    }
    // What was stored before the failure stays, and the engine is ready for the next tick.
    assert_eq!(archive.count(&CHANNEL.to_string()).await.unwrap(), 100);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn unknown_channel_aborts_without_disabling() {
    let archive: Arc<dyn Archive> = Arc::new(memory_db());
    let engine = IngestionEngine::new(
        Some(archive),
        shared(FakeHistory::new(Vec::new())),
        Some(CHANNEL + 1),
        Duration::from_secs(3600),
        ChronoDuration::days(14),
        Diagnostics::default(),
    );
    match engine.tick().await {
        TickOutcome::Aborted(reason) => assert!(reason.contains("not found")),
        other => panic!("expected an aborted run, got {:?}", other),
    }
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn resume_survives_a_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let path = path.to_str().unwrap();
    let t = seconds_ago(120);
    let source = shared(FakeHistory::new(vec![message(t, 0, "persisted")]));

    {
        let db = Database::open(path, Duration::from_secs(5)).unwrap();
        db.execute_init().unwrap();
        completed(engine(Arc::new(db), source.clone()).tick().await);
    }

    let db = Database::open(path, Duration::from_secs(5)).unwrap();
    db.execute_init().unwrap();
    let report = completed(engine(Arc::new(db), source).tick().await);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.resume_point.at, t + resume_epsilon());
}
