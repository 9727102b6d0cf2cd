
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use bench_controller::config::PoolConfig;
use bench_controller::controller::Directives;
use bench_controller::error::ControllerError;
use bench_controller::scheduler::state::CONTROLLER_DOCUMENT;
use bench_controller::scheduler::{ControllerState, SchedulerEvent};
use bench_controller::storage::DocumentStore;
use bench_controller::worker::{JobReport, WorkerPool, WorkerState};

use test_harness::{
    address, hourly_history, poll_failed, test_controller, FakeSnapshot, FakeUpstream,
    RecordingExecutor,
};

/// Leave `commit` running on worker `id` as if a previous controller had
/// dispatched it.
fn seed_running_worker(dir: &TempDir, id: u32, commit: &str) {
    let mut pool =
        WorkerPool::restore_or_create(DocumentStore::new(dir.path()), &PoolConfig::default())
            .unwrap();
    pool.assign(id, commit, "earlier".to_string(), Utc::now()).unwrap();
}

fn commits(hashes: &[&str]) -> Directives {
    Directives {
        commits: hashes.iter().map(|h| h.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_requested_commits_fill_workers_in_order() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );

    controller.start(commits(&["a", "b", "c", "d"])).await.unwrap();

    let running: Vec<_> = controller
        .pool()
        .workers()
        .iter()
        .map(|w| (w.id, w.state, w.last_commit.as_str()))
        .collect();
    assert_eq!(
        running,
        vec![
            (1, WorkerState::Running, "a"),
            (2, WorkerState::Running, "b"),
            (3, WorkerState::Running, "c"),
        ]
    );
    assert_eq!(controller.queue().peek(), Some("d"));
    assert_eq!(controller.state().runs, 3);
    assert_eq!(controller.running_jobs(), 3);
    assert_eq!(controller.poll_delay(), Some(Duration::ZERO));
    // Requested commits never count as discovered ones
    assert_eq!(controller.state().last_processed_commit(), "");

    let worker = controller.pool().get(1).unwrap();
    assert!(worker.command.starts_with("fake 192.168.2.173 nohup bash"));
    assert!(worker.command.contains("-d -h a"));
}

#[tokio::test]
async fn test_queued_commit_waits_for_a_completion() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller.start(commits(&["a", "b", "c", "d"])).await.unwrap();

    let job = controller.pool().get(2).unwrap().current_job();
    controller
        .handle_event(SchedulerEvent::WorkerDone {
            worker_id: 2,
            job,
            commit: "b".to_string(),
            result: Ok(JobReport::default()),
        })
        .await
        .unwrap();

    let worker = controller.pool().get(2).unwrap();
    assert!(worker.is_running());
    assert_eq!(worker.last_commit, "d");
    assert!(controller.queue().is_empty());
    assert_eq!(controller.state().runs, 4);
}

#[tokio::test]
async fn test_completion_returns_worker_to_idle() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::instant();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller.start(commits(&["a"])).await.unwrap();
    assert!(controller.pool().get(1).unwrap().is_running());

    let event = controller.next_event().await.unwrap();
    assert!(!event.is_poll());
    controller.handle_event(event).await.unwrap();

    let worker = controller.pool().get(1).unwrap();
    assert!(worker.is_idle());
    // Retained for a later restart
    assert_eq!(worker.last_commit, "a");
    assert_eq!(controller.running_jobs(), 0);

    let sent = executor.sent_to(&address(1), "");
    assert!(sent[0].contains("git pull -r"));
    assert!(sent[1].contains("bench-current.sh -d -h a"));
    assert!(sent[2].starts_with("tail -n5"));
}

#[tokio::test]
async fn test_failed_job_still_frees_worker() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller.start(commits(&["a"])).await.unwrap();

    let job = controller.pool().get(1).unwrap().current_job();
    controller
        .handle_event(SchedulerEvent::WorkerDone {
            worker_id: 1,
            job,
            commit: "a".to_string(),
            result: Err(ControllerError::Internal("ssh went away".to_string())),
        })
        .await
        .unwrap();

    assert!(controller.pool().get(1).unwrap().is_idle());
}

#[tokio::test]
async fn test_stale_completion_keeps_new_assignment() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller.start(commits(&["a"])).await.unwrap();
    let stale = controller.pool().get(1).unwrap().current_job();

    controller.force_idle(1).unwrap();
    controller.enqueue("b");
    let stale_done = || SchedulerEvent::WorkerDone {
        worker_id: 1,
        job: stale,
        commit: "a".to_string(),
        result: Ok(JobReport::default()),
    };

    // First stale completion finds the worker idle; the queue then hands it "b"
    controller.handle_event(stale_done()).await.unwrap();
    assert_eq!(controller.pool().get(1).unwrap().last_commit, "b");

    controller.handle_event(stale_done()).await.unwrap();
    let worker = controller.pool().get(1).unwrap();
    assert!(worker.is_running());
    assert_eq!(worker.last_commit, "b");
}

#[tokio::test]
async fn test_running_workers_are_resumed() {
    let dir = TempDir::new().unwrap();
    seed_running_worker(&dir, 2, "abc");

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller.start(Directives::default()).await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(controller.running_jobs(), 1);
    assert_eq!(controller.state().runs, 0);
    assert_eq!(
        executor.sent_to(&address(2), "tail -f").len(),
        1,
        "worker 2 log should be followed"
    );
    assert!(executor.sent_to(&address(2), "bench-current.sh").is_empty());
}

#[tokio::test]
async fn test_restart_reruns_retained_commit() {
    let dir = TempDir::new().unwrap();
    seed_running_worker(&dir, 2, "abc");

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller
        .start(Directives {
            restart: vec![2],
            ..Default::default()
        })
        .await
        .unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let worker = controller.pool().get(2).unwrap();
    assert!(worker.is_running());
    assert_eq!(worker.last_commit, "abc");
    assert_eq!(controller.state().runs, 1);
    assert_eq!(executor.sent_to(&address(2), "bench-current.sh -d -h abc").len(), 1);
    // No resume of the old run for a restarted worker
    assert!(executor.sent_to(&address(2), "tail -f").is_empty());
}

#[tokio::test]
async fn test_restart_rejections_change_nothing() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    let before: Vec<_> = controller
        .pool()
        .workers()
        .iter()
        .map(|w| (w.state, w.last_commit.clone(), w.since))
        .collect();

    for id in [1, 9] {
        let err = controller.restart_worker(id).unwrap_err();
        assert!(matches!(err, ControllerError::RestartRejected { worker_id, .. } if worker_id == id));
    }

    let after: Vec<_> = controller
        .pool()
        .workers()
        .iter()
        .map(|w| (w.state, w.last_commit.clone(), w.since))
        .collect();
    assert_eq!(before, after);
    assert_eq!(controller.state().runs, 0);
    assert_eq!(controller.running_jobs(), 0);
    assert!(executor.commands().is_empty());
}

#[tokio::test]
async fn test_idle_directive_reclaims_worker() {
    let dir = TempDir::new().unwrap();
    seed_running_worker(&dir, 3, "abc");

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    controller
        .start(Directives {
            idle: vec![3, 42],
            ..Default::default()
        })
        .await
        .unwrap();

    let worker = controller.pool().get(3).unwrap();
    assert!(worker.is_idle());
    assert_eq!(worker.last_commit, "abc");
    // Nothing left to resume
    assert_eq!(controller.running_jobs(), 0);
}

#[tokio::test]
async fn test_discovered_commit_is_dispatched() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_latest("new"),
        FakeSnapshot::missing(),
    );
    controller.start(Directives::default()).await.unwrap();

    let event = controller.next_event().await.unwrap();
    assert!(event.is_poll());
    controller.handle_event(event).await.unwrap();

    let worker = controller.pool().get(1).unwrap();
    assert!(worker.is_running());
    assert_eq!(worker.last_commit, "new");
    assert_eq!(controller.candidate(), None);
    assert_eq!(controller.state().last_processed_commit(), "new");
    assert_eq!(controller.state().last_queried_commit, "new");
    assert!(controller.state().last_process_time().is_some());
    assert_eq!(controller.poll_delay(), Some(Duration::from_secs(3600)));

    let saved: ControllerState = DocumentStore::new(dir.path())
        .load(CONTROLLER_DOCUMENT)
        .unwrap()
        .unwrap();
    assert_eq!(saved.last_processed_commit(), "new");
    assert_eq!(saved.runs, 1);
}

#[tokio::test]
async fn test_commit_inside_cooldown_is_skipped() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::new(dir.path());
    let mut state = ControllerState::default();
    state.record_dispatch("old", Utc::now(), &store).unwrap();

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_latest("new"),
        FakeSnapshot::missing(),
    );
    controller.start(Directives::default()).await.unwrap();

    let event = controller.next_event().await.unwrap();
    controller.handle_event(event).await.unwrap();

    assert_eq!(controller.candidate(), None);
    assert_eq!(controller.state().last_queried_commit, "new");
    assert_eq!(controller.state().last_processed_commit(), "old");
    assert_eq!(controller.pool().idle_count(), 3);
    // The next poll waits before asking again
    assert_eq!(controller.poll_delay(), Some(Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_candidate_waits_for_idle_worker() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_latest("new"),
        FakeSnapshot::missing(),
    );
    controller.start(commits(&["a", "b", "c"])).await.unwrap();

    let event = controller.next_event().await.unwrap();
    assert!(event.is_poll());
    controller.handle_event(event).await.unwrap();
    assert_eq!(controller.candidate(), Some("new"));

    let job = controller.pool().get(2).unwrap().current_job();
    controller
        .handle_event(SchedulerEvent::WorkerDone {
            worker_id: 2,
            job,
            commit: "b".to_string(),
            result: Ok(JobReport::default()),
        })
        .await
        .unwrap();

    assert_eq!(controller.candidate(), None);
    assert_eq!(controller.pool().get(2).unwrap().last_commit, "new");
    // Run 4 is neither a full nor a threads run
    assert!(controller.pool().get(2).unwrap().command.contains("-d -h new"));
}

#[tokio::test]
async fn test_queued_commit_beats_candidate() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_latest("new"),
        FakeSnapshot::missing(),
    );
    controller.start(commits(&["a", "b", "c", "d"])).await.unwrap();

    let event = controller.next_event().await.unwrap();
    assert!(event.is_poll());
    controller.handle_event(event).await.unwrap();
    assert_eq!(controller.candidate(), Some("new"));

    let job = controller.pool().get(3).unwrap().current_job();
    controller
        .handle_event(SchedulerEvent::WorkerDone {
            worker_id: 3,
            job,
            commit: "c".to_string(),
            result: Ok(JobReport::default()),
        })
        .await
        .unwrap();

    assert_eq!(controller.pool().get(3).unwrap().last_commit, "d");
    assert_eq!(controller.candidate(), Some("new"));
    assert_eq!(controller.state().last_processed_commit(), "");
}

#[tokio::test]
async fn test_gap_is_filled_at_startup() {
    let dir = TempDir::new().unwrap();
    let history = hourly_history(10);
    let measured = vec![history[0].clone(), history[3].clone(), history[9].clone()];

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_history(history),
        FakeSnapshot::serving(measured),
    );
    // Upstream never answers, so no event arrives before the check
    controller.start(Directives::default()).await.unwrap();

    let worker = controller.pool().get(1).unwrap();
    assert!(worker.is_running());
    assert_eq!(worker.last_commit, "h6");
    assert_eq!(controller.pool().idle_ids(), vec![2, 3]);
    assert_eq!(controller.state().runs, 1);
    // Backfill does not move the processed commit
    assert_eq!(controller.state().last_processed_commit(), "");
}

#[tokio::test]
async fn test_backfill_skips_commits_in_flight() {
    let dir = TempDir::new().unwrap();
    let history = hourly_history(10);
    let measured = vec![history[0].clone(), history[3].clone(), history[9].clone()];

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_history(history),
        FakeSnapshot::serving(measured),
    );
    controller.start(Directives::default()).await.unwrap();
    controller
        .handle_event(SchedulerEvent::PollDone {
            result: Err(poll_failed()),
        })
        .await
        .unwrap();

    // h6 is running on worker 1, leaving three spans of 3; the oldest is split
    assert_eq!(controller.pool().get(1).unwrap().last_commit, "h6");
    assert_eq!(controller.pool().get(2).unwrap().last_commit, "h7");
    assert_eq!(controller.pool().idle_ids(), vec![3]);
    assert_eq!(controller.state().runs, 2);
}

#[tokio::test]
async fn test_no_gap_fill_with_single_idle_worker() {
    let dir = TempDir::new().unwrap();
    let history = hourly_history(10);
    let measured = vec![history[0].clone(), history[9].clone()];

    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_history(history),
        FakeSnapshot::serving(measured),
    );
    controller.start(commits(&["a", "b"])).await.unwrap();
    controller
        .handle_event(SchedulerEvent::PollDone {
            result: Err(poll_failed()),
        })
        .await
        .unwrap();

    assert_eq!(controller.pool().idle_ids(), vec![3]);
    assert_eq!(controller.state().runs, 2);
}

#[tokio::test]
async fn test_missing_snapshot_means_no_gap() {
    let dir = TempDir::new().unwrap();
    let executor = RecordingExecutor::holding();
    let mut controller = test_controller(
        &dir,
        executor.clone(),
        FakeUpstream::with_history(hourly_history(10)),
        FakeSnapshot::missing(),
    );
    controller.start(Directives::default()).await.unwrap();
    controller
        .handle_event(SchedulerEvent::PollDone {
            result: Err(poll_failed()),
        })
        .await
        .unwrap();

    assert_eq!(controller.pool().idle_count(), 3);
    assert_eq!(controller.state().runs, 0);
}

#[tokio::test]
async fn test_state_survives_controller_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mut controller = test_controller(
            &dir,
            RecordingExecutor::holding(),
            FakeUpstream::with_latest("new"),
            FakeSnapshot::missing(),
        );
        controller.start(commits(&["a"])).await.unwrap();
        let event = controller.next_event().await.unwrap();
        controller.handle_event(event).await.unwrap();
    }

    let executor = RecordingExecutor::holding();
    let controller = test_controller(
        &dir,
        executor,
        FakeUpstream::silent(),
        FakeSnapshot::missing(),
    );
    assert_eq!(controller.state().runs, 2);
    assert_eq!(controller.state().last_processed_commit(), "new");
    assert_eq!(controller.pool().get(1).unwrap().last_commit, "a");
    assert_eq!(controller.pool().get(2).unwrap().last_commit, "new");
    assert_eq!(controller.pool().running().count(), 2);
    assert!(dir.path().join("controller.json.bak").exists());
}
