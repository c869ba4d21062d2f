// Scheduler lifecycle against the SQLite store: claims are single-flight,
// cancellation wins races, recurrence survives failures, crash recovery
// requeues orphans.

use std::sync::Arc;

use streamgate_core::application::scheduler::CreateJobOptions;
use streamgate_core::application::{
    shutdown_channel, BackoffPolicy, JobScheduler, SchedulerConfig, StartupRecovery,
};
use streamgate_core::domain::{JobKind, JobStatus};
use streamgate_core::port::id_provider::mocks::SeqIdProvider;
use streamgate_core::port::job_executor::mocks::{MockBehavior, MockJobExecutor};
use streamgate_core::port::notifier::mocks::RecordingNotifier;
use streamgate_core::port::time_provider::mocks::MockTimeProvider;
use streamgate_core::port::{JobRepository, TimeProvider};
use streamgate_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

async fn scheduler_with_clock() -> (Arc<MockTimeProvider>, Arc<SqliteJobRepository>, JobScheduler) {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let clock = Arc::new(MockTimeProvider::new(1_000_000));
    let repo = Arc::new(SqliteJobRepository::new(pool));
    let scheduler = JobScheduler::new(
        repo.clone(),
        Arc::new(RecordingNotifier::new()),
        clock.clone(),
        Arc::new(SeqIdProvider::new()),
        BackoffPolicy::new(1_000, 2.0, 60_000),
        SchedulerConfig::default(),
    );
    (clock, repo, scheduler)
}

#[tokio::test]
async fn test_job_lifecycle_through_store() {
    let (clock, repo, scheduler) = scheduler_with_clock().await;
    let executor = Arc::new(MockJobExecutor::new_success());
    scheduler.register_executor("outbox_flush", executor.clone());

    let id = scheduler
        .create_job(
            JobKind::OutboxFlush,
            "flush",
            CreateJobOptions {
                run_at: Some(clock.now_millis() + 5_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(scheduler.tick().await.unwrap(), 0);

    clock.advance(5_000);
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    assert_eq!(executor.call_count(), 1);

    let job = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.last_run, Some(clock.now_millis()));
}

#[tokio::test]
async fn test_cancelled_job_never_runs() {
    let (clock, repo, scheduler) = scheduler_with_clock().await;
    let executor = Arc::new(MockJobExecutor::new_success());
    scheduler.register_executor("token_sweep", executor.clone());

    let id = scheduler
        .create_job(
            JobKind::TokenSweep,
            "sweep",
            CreateJobOptions {
                run_at: Some(clock.now_millis() + 5_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(scheduler.cancel_job(&id).await.unwrap());
    clock.advance(60_000);
    assert_eq!(scheduler.tick().await.unwrap(), 0);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(
        repo.find_by_id(&id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_recurring_job_survives_failures() {
    let (clock, repo, scheduler) = scheduler_with_clock().await;
    // Fails twice, then succeeds; recurrence must keep it alive throughout
    let executor = Arc::new(MockJobExecutor::new(MockBehavior::FailTimes(2)));
    scheduler.register_executor("token_sweep", executor.clone());

    let id = scheduler
        .ensure_recurring(JobKind::TokenSweep, "sweep", 30_000)
        .await
        .unwrap();

    for _ in 0..3 {
        scheduler.tick().await.unwrap();
        let job = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.next_run, clock.now_millis() + 30_000);
        clock.advance(30_000);
    }
    assert_eq!(executor.call_count(), 3);
}

#[tokio::test]
async fn test_crash_recovery_requeues_running_jobs() {
    let (clock, repo, scheduler) = scheduler_with_clock().await;
    scheduler.register_executor("outbox_flush", Arc::new(MockJobExecutor::new_success()));

    let id = scheduler
        .create_job(JobKind::OutboxFlush, "flush", CreateJobOptions::default())
        .await
        .unwrap();

    // Simulate a crash mid-execution: claim without finishing
    let claimed = repo.claim_due(clock.now_millis(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(
        repo.find_by_id(&id).await.unwrap().unwrap().status,
        JobStatus::Running
    );

    // New process: recovery requeues, the next tick executes
    clock.advance(10_000);
    let recovery = StartupRecovery::new(repo.clone(), clock.clone());
    assert_eq!(recovery.requeue_orphaned_jobs().await.unwrap(), 1);
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    assert_eq!(
        repo.find_by_id(&id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_loop_with_real_clock() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo = Arc::new(SqliteJobRepository::new(pool));
    let scheduler = Arc::new(JobScheduler::new(
        repo.clone(),
        Arc::new(RecordingNotifier::new()),
        Arc::new(streamgate_core::port::time_provider::SystemTimeProvider),
        Arc::new(SeqIdProvider::new()),
        BackoffPolicy::default(),
        SchedulerConfig {
            poll_interval_ms: 20,
            min_sleep_ms: 1,
            ..Default::default()
        },
    ));
    let executor = Arc::new(MockJobExecutor::new_success());
    scheduler.register_executor("health_sweep", executor.clone());

    let id = scheduler
        .ensure_recurring(JobKind::HealthSweep, "health sweep", 10)
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let loop_scheduler = scheduler.clone();
    let handle = tokio::spawn(async move { loop_scheduler.run(shutdown_rx).await });

    // Let the recurring job fire a few times
    let mut fired = false;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if executor.call_count() >= 3 {
            fired = true;
            break;
        }
    }
    assert!(fired, "recurring job did not fire repeatedly under the loop");

    shutdown_tx.shutdown();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("loop did not stop")
        .unwrap()
        .unwrap();

    // Still pending: the recurring job outlives every individual run
    let job = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}
