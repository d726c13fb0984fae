//! Restart recovery against a file-backed job database.

mod common;

use common::{collect_events, line, succeed, test_settings, Step, TestHarness};
use mp3ify::conversion::INTERRUPTED_REASON;
use mp3ify::events::OutputEvent;
use mp3ify::store::JobStore;
use mp3ify_common::JobState;
use mp3ify_db::models::Job;

#[tokio::test]
async fn test_orphaned_jobs_fail_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mp3ify.db");

    // First run: a job is left converting when the process goes away
    let orphan_id = {
        let harness = TestHarness::with_store(
            JobStore::open(&db_path).unwrap(),
            test_settings(4),
            |runner| runner.script("long", vec![line("downloading"), Step::Hang]),
        );
        let id = harness.engine.create_job("long").unwrap();
        harness.wait_for_state(id, JobState::Converting).await;
        harness.engine.shutdown().await;
        id
    };

    // Second run over the same database
    let harness = TestHarness::with_store(
        JobStore::open(&db_path).unwrap(),
        test_settings(4),
        |_| {},
    );

    let job = harness.store.get(orphan_id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
    assert!(job.output_path.is_none());

    // No converter was started again for it
    assert_eq!(harness.runner.start_count(orphan_id), 0);

    // Subscribers get the final state and nothing else
    let events = collect_events(harness.engine.subscribe(orphan_id).unwrap()).await;
    assert_eq!(events, vec![OutputEvent::StatusChanged(JobState::Failed)]);
}

#[tokio::test]
async fn test_recovery_happens_before_new_jobs() {
    let store = JobStore::in_memory().unwrap();

    let mut converting = Job::new("was-converting");
    converting.state = JobState::Converting;
    store.put(&converting).unwrap();

    let mut done = Job::new("was-done");
    done.state = JobState::Successful;
    done.output_path = Some("/out/done.mp3".into());
    done.display_name = Some("Done".into());
    store.put(&done).unwrap();

    let harness = TestHarness::with_store(store, test_settings(4), |_| {});

    // Recovery already ran by the time the engine is handed out
    let recovered = harness.store.get(converting.id).unwrap();
    assert_eq!(recovered.state, JobState::Failed);
    assert_eq!(recovered.failure_reason.as_deref(), Some(INTERRUPTED_REASON));

    // Terminal jobs are untouched
    assert_eq!(harness.store.get(done.id).unwrap(), done);
}

#[tokio::test]
async fn test_created_jobs_are_resumed_once() {
    let store = JobStore::in_memory().unwrap();
    let pending = Job::new("never-started");
    store.put(&pending).unwrap();

    let harness = TestHarness::with_store(store, test_settings(4), |runner| {
        runner.script("never-started", vec![line("working"), succeed("Resumed")])
    });

    let job = harness.wait_for_state(pending.id, JobState::Successful).await;
    assert_eq!(job.display_name.as_deref(), Some("Resumed"));
    assert_eq!(harness.runner.start_count(pending.id), 1);
}
