// Job Scheduler - delayed/recurring task runner with retry
//
// Single-flight per job id is enforced by the atomic PENDING -> RUNNING claim
// in the repository; a job already running is never started again. Recurring
// jobs reschedule after BOTH outcomes so periodic sweeps survive isolated
// failures. A running execution is never aborted by cancellation; its
// completion write is conditional on RUNNING and becomes a no-op instead.

mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::application::backoff::BackoffPolicy;
use crate::domain::{Job, JobId, JobKind, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobExecutor, JobRepository, Notification, Notifier, TimeProvider};

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on loop sleep; the loop wakes earlier when a pending job
    /// is due sooner
    pub poll_interval_ms: u64,
    /// Lower bound on loop sleep
    pub min_sleep_ms: u64,
    /// Jobs claimed per tick
    pub batch_limit: i64,
    /// Consecutive store errors tolerated before the loop stops
    pub store_error_budget: u32,
    /// Sleep after a store error (ms)
    pub error_backoff_ms: u64,
    /// Retry budget for one-shot jobs without an explicit override
    pub default_max_attempts: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            min_sleep_ms: 50,
            batch_limit: 20,
            store_error_budget: 10,
            error_backoff_ms: 1_000,
            default_max_attempts: 3,
        }
    }
}

/// Options accepted by `create_job`
#[derive(Debug, Clone, Default)]
pub struct CreateJobOptions {
    pub priority: i32,
    /// First execution time (epoch ms); defaults to now
    pub run_at: Option<i64>,
    /// When set, the job recurs with this interval after every outcome
    pub repeat_interval_ms: Option<i64>,
    pub max_attempts: Option<i32>,
}

/// Job listing filter
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

/// Generic delayed/recurring task runner. One per process, constructed by the
/// composition root; executors are registered per JobKind discriminator
/// before the loop starts.
pub struct JobScheduler {
    repo: Arc<dyn JobRepository>,
    notifier: Arc<dyn Notifier>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    backoff: BackoffPolicy,
    config: SchedulerConfig,
    executors: Mutex<HashMap<&'static str, Arc<dyn JobExecutor>>>,
}

impl JobScheduler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        notifier: Arc<dyn Notifier>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        backoff: BackoffPolicy,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            notifier,
            time_provider,
            id_provider,
            backoff,
            config,
            executors: Mutex::new(HashMap::new()),
        }
    }

    /// Register the executor for one job kind discriminator
    pub fn register_executor(&self, kind: &'static str, executor: Arc<dyn JobExecutor>) {
        self.executors.lock().unwrap().insert(kind, executor);
    }

    /// Create a new job
    pub async fn create_job(
        &self,
        kind: JobKind,
        name: impl Into<String>,
        options: CreateJobOptions,
    ) -> Result<JobId> {
        let now = self.time_provider.now_millis();
        let mut job = Job::new(self.id_provider.generate_id(), now, kind, name)
            .with_priority(options.priority)
            .with_max_attempts(
                options
                    .max_attempts
                    .unwrap_or(self.config.default_max_attempts),
            );
        if let Some(run_at) = options.run_at {
            job = job.with_run_at(run_at);
        }
        if let Some(interval) = options.repeat_interval_ms {
            if interval <= 0 {
                return Err(AppError::Validation(
                    "repeat_interval_ms must be positive".to_string(),
                ));
            }
            job = job.with_repeat_interval(interval);
        }

        self.repo.insert(&job).await?;
        info!(
            job_id = %job.id,
            kind = job.kind.discriminator(),
            next_run = job.next_run,
            recurring = job.is_recurring(),
            "job created"
        );
        Ok(job.id)
    }

    /// Ensure a recurring control job of this kind exists (idempotent; used at
    /// startup)
    pub async fn ensure_recurring(
        &self,
        kind: JobKind,
        name: impl Into<String>,
        interval_ms: i64,
    ) -> Result<JobId> {
        if let Some(existing) = self
            .repo
            .find_active_recurring(kind.discriminator())
            .await?
        {
            debug!(job_id = %existing.id, kind = kind.discriminator(), "recurring job already present");
            return Ok(existing.id);
        }
        self.create_job(
            kind,
            name,
            CreateJobOptions {
                repeat_interval_ms: Some(interval_ms),
                ..Default::default()
            },
        )
        .await
    }

    /// Cancel a non-terminal job. A running execution is not aborted; its
    /// completion write becomes a no-op.
    pub async fn cancel_job(&self, id: &JobId) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let cancelled = self.repo.cancel(id, now).await?;
        if cancelled {
            info!(job_id = %id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Look up one job
    pub async fn job_status(&self, id: &JobId) -> Result<Option<Job>> {
        self.repo.find_by_id(id).await
    }

    /// List jobs matching a filter
    pub async fn jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.repo
            .list(
                filter.status,
                filter.kind.as_deref(),
                filter.limit.unwrap_or(100),
            )
            .await
    }

    /// Count jobs in a status
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        self.repo.count_by_status(status).await
    }

    /// Claim and execute everything due right now. Returns the number of jobs
    /// executed. Exposed for deterministic tests; the loop calls this.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let claimed = self.repo.claim_due(now, self.config.batch_limit).await?;
        let count = claimed.len();
        for job in claimed {
            self.execute_job(job).await?;
        }
        Ok(count)
    }

    /// Control loop: wakes on the earliest pending next_run (bounded by the
    /// poll interval) and executes all due jobs. Stops on shutdown, or after
    /// the store-error budget is exhausted.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!("scheduler loop started");
        let mut consecutive_store_errors: u32 = 0;

        loop {
            if shutdown.is_shutdown() {
                info!("scheduler loop shutting down");
                break;
            }

            match self.tick().await {
                Ok(executed) => {
                    consecutive_store_errors = 0;
                    if executed > 0 {
                        debug!(executed = executed, "scheduler tick complete");
                    }
                }
                Err(e) => {
                    consecutive_store_errors += 1;
                    error!(
                        error = %e,
                        consecutive = consecutive_store_errors,
                        "scheduler tick failed"
                    );
                    if consecutive_store_errors > self.config.store_error_budget {
                        self.notifier
                            .notify(Notification::LoopStalled {
                                loop_name: "scheduler".to_string(),
                                error: e.to_string(),
                            })
                            .await;
                        error!("scheduler store-error budget exhausted, stopping loop");
                        return Err(e);
                    }
                    tokio::select! {
                        _ = sleep(std::time::Duration::from_millis(self.config.error_backoff_ms)) => {},
                        _ = shutdown.wait() => {
                            info!("scheduler interrupted during error recovery");
                            break;
                        }
                    }
                    continue;
                }
            }

            let sleep_ms = self.next_sleep_ms().await;
            tokio::select! {
                _ = sleep(std::time::Duration::from_millis(sleep_ms)) => {},
                _ = shutdown.wait() => {
                    info!("scheduler interrupted while idle");
                    break;
                }
            }
        }

        info!("scheduler loop stopped");
        Ok(())
    }

    /// Sleep until the earliest pending job, clamped to
    /// [min_sleep, poll_interval]
    async fn next_sleep_ms(&self) -> u64 {
        let now = self.time_provider.now_millis();
        match self.repo.earliest_pending_run().await {
            Ok(Some(next_run)) => {
                let until = (next_run - now).max(self.config.min_sleep_ms as i64) as u64;
                until.min(self.config.poll_interval_ms)
            }
            Ok(None) => self.config.poll_interval_ms,
            Err(e) => {
                warn!(error = %e, "failed to read earliest pending run");
                self.config.poll_interval_ms
            }
        }
    }

    /// Execute one claimed job with panic isolation and apply the outcome
    async fn execute_job(&self, job: Job) -> Result<()> {
        let executor = self
            .executors
            .lock()
            .unwrap()
            .get(job.kind.discriminator())
            .cloned();

        let Some(executor) = executor else {
            warn!(
                job_id = %job.id,
                kind = job.kind.discriminator(),
                "no executor registered, failing job"
            );
            let now = self.time_provider.now_millis();
            self.repo
                .fail(&job.id, now, "no executor registered")
                .await?;
            return Ok(());
        };

        debug!(job_id = %job.id, kind = job.kind.discriminator(), "executing job");

        // Spawn so a panicking executor cannot take down the loop
        let job_for_exec = job.clone();
        let handle =
            tokio::task::spawn(async move { executor.execute(&job_for_exec).await });

        let outcome = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(AppError::Internal(format!("job panicked: {}", join_err))),
        };

        let now = self.time_provider.now_millis();
        match outcome {
            Ok(()) => {
                if let Some(interval) = job.repeat_interval_ms {
                    // Recurrence is independent of the outcome; attempts reset
                    let updated = self
                        .repo
                        .reschedule(&job.id, now + interval, 0, None)
                        .await?;
                    if !updated {
                        debug!(job_id = %job.id, "recurring job cancelled mid-flight");
                    }
                } else if !self.repo.complete(&job.id, now).await? {
                    debug!(job_id = %job.id, "completed job was cancelled mid-flight");
                }
            }
            Err(e) => {
                let error = e.to_string();
                if let Some(interval) = job.repeat_interval_ms {
                    warn!(job_id = %job.id, error = %error, "recurring job failed, rescheduling");
                    let updated = self
                        .repo
                        .reschedule(&job.id, now + interval, 0, Some(&error))
                        .await?;
                    if !updated {
                        debug!(job_id = %job.id, "recurring job cancelled mid-flight");
                    }
                } else {
                    let attempts = job.attempts + 1;
                    if attempts >= job.max_attempts {
                        warn!(
                            job_id = %job.id,
                            attempts = attempts,
                            error = %error,
                            "job failed after exhausting retries"
                        );
                        self.repo.fail(&job.id, now, &error).await?;
                    } else {
                        let delay = self.backoff.delay_for_attempt(&job.id, attempts);
                        debug!(
                            job_id = %job.id,
                            attempt = attempts,
                            delay_ms = delay,
                            "job retry scheduled"
                        );
                        let updated = self
                            .repo
                            .reschedule(&job.id, now + delay, attempts, Some(&error))
                            .await?;
                        if !updated {
                            debug!(job_id = %job.id, "failed job cancelled mid-flight");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::id_provider::mocks::SeqIdProvider;
    use crate::port::job_executor::mocks::{MockBehavior, MockJobExecutor};
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::notifier::mocks::RecordingNotifier;
    use crate::port::time_provider::mocks::MockTimeProvider;

    struct Fixture {
        clock: Arc<MockTimeProvider>,
        repo: Arc<InMemoryJobRepository>,
        scheduler: JobScheduler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(MockTimeProvider::new(1_000_000));
        let repo = Arc::new(InMemoryJobRepository::new());
        let scheduler = JobScheduler::new(
            repo.clone(),
            Arc::new(RecordingNotifier::new()),
            clock.clone(),
            Arc::new(SeqIdProvider::new()),
            BackoffPolicy::new(1_000, 2.0, 60_000),
            SchedulerConfig::default(),
        );
        Fixture {
            clock,
            repo,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_due_job_executes_and_completes() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new_success());
        f.scheduler
            .register_executor("outbox_flush", executor.clone());

        let id = f
            .scheduler
            .create_job(JobKind::OutboxFlush, "flush", CreateJobOptions::default())
            .await
            .unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
        assert_eq!(executor.call_count(), 1);
        assert_eq!(f.repo.get(&id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_future_job_not_claimed_early() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new_success());
        f.scheduler.register_executor("token_sweep", executor.clone());

        let now = f.clock.now_millis();
        f.scheduler
            .create_job(
                JobKind::TokenSweep,
                "sweep",
                CreateJobOptions {
                    run_at: Some(now + 60_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap(), 0);
        f.clock.advance(60_000);
        assert_eq!(f.scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_job_never_runs() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new_success());
        f.scheduler.register_executor("token_sweep", executor.clone());

        let now = f.clock.now_millis();
        let id = f
            .scheduler
            .create_job(
                JobKind::TokenSweep,
                "sweep",
                CreateJobOptions {
                    run_at: Some(now + 60_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(f.scheduler.cancel_job(&id).await.unwrap());
        f.clock.advance(120_000);
        assert_eq!(f.scheduler.tick().await.unwrap(), 0);
        assert_eq!(executor.call_count(), 0);
        assert_eq!(f.repo.get(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_one_shot_retries_then_fails_terminally() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new_fail("boom"));
        f.scheduler
            .register_executor("outbox_flush", executor.clone());

        let id = f
            .scheduler
            .create_job(
                JobKind::OutboxFlush,
                "flush",
                CreateJobOptions {
                    max_attempts: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..5 {
            f.scheduler.tick().await.unwrap();
            f.clock.advance(60_000);
        }

        let job = f.repo.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(executor.call_count(), 3);
        assert_eq!(job.last_error.as_deref(), Some("Internal error: boom"));
    }

    #[tokio::test]
    async fn test_retry_uses_backoff() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new(MockBehavior::FailTimes(1)));
        f.scheduler
            .register_executor("outbox_flush", executor.clone());

        let id = f
            .scheduler
            .create_job(JobKind::OutboxFlush, "flush", CreateJobOptions::default())
            .await
            .unwrap();

        f.scheduler.tick().await.unwrap();
        let job = f.repo.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_run > f.clock.now_millis());

        // Not due yet
        assert_eq!(f.scheduler.tick().await.unwrap(), 0);

        f.clock.advance(2_000);
        f.scheduler.tick().await.unwrap();
        assert_eq!(f.repo.get(&id).unwrap().status, JobStatus::Completed);
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recurring_reschedules_after_success_and_failure() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new(MockBehavior::FailTimes(1)));
        f.scheduler
            .register_executor("token_sweep", executor.clone());

        let id = f
            .scheduler
            .create_job(
                JobKind::TokenSweep,
                "sweep",
                CreateJobOptions {
                    repeat_interval_ms: Some(30_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // First run fails; the job reschedules to now + interval anyway
        f.scheduler.tick().await.unwrap();
        let job = f.repo.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.next_run, f.clock.now_millis() + 30_000);
        assert_eq!(job.attempts, 0);

        // Second run succeeds; same recurrence
        f.clock.advance(30_000);
        f.scheduler.tick().await.unwrap();
        let job = f.repo.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.next_run, f.clock.now_millis() + 30_000);
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_recurring_job_completion_is_noop() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new_success());
        f.scheduler.register_executor("token_sweep", executor);

        let id = f
            .scheduler
            .create_job(
                JobKind::TokenSweep,
                "sweep",
                CreateJobOptions {
                    repeat_interval_ms: Some(30_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Claim (RUNNING), then cancel before the outcome lands
        let claimed = f
            .repo
            .claim_due(f.clock.now_millis(), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(f.scheduler.cancel_job(&id).await.unwrap());

        // The completion write is conditional on RUNNING: no resurrection
        let updated = f
            .repo
            .reschedule(&id, f.clock.now_millis() + 30_000, 0, None)
            .await
            .unwrap();
        assert!(!updated);
        assert_eq!(f.repo.get(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_panicking_executor_counts_as_failure() {
        let f = fixture();
        let executor = Arc::new(MockJobExecutor::new(MockBehavior::Panic("kaboom".into())));
        f.scheduler.register_executor("outbox_flush", executor);

        let id = f
            .scheduler
            .create_job(
                JobKind::OutboxFlush,
                "flush",
                CreateJobOptions {
                    max_attempts: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        f.scheduler.tick().await.unwrap();
        let job = f.repo.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_unregistered_kind_fails_job() {
        let f = fixture();
        let id = f
            .scheduler
            .create_job(JobKind::HealthSweep, "sweep", CreateJobOptions::default())
            .await
            .unwrap();

        f.scheduler.tick().await.unwrap();
        assert_eq!(f.repo.get(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_ensure_recurring_idempotent() {
        let f = fixture();
        let first = f
            .scheduler
            .ensure_recurring(JobKind::OutboxFlush, "flush", 2_000)
            .await
            .unwrap();
        let second = f
            .scheduler
            .ensure_recurring(JobKind::OutboxFlush, "flush", 2_000)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            f.repo.count_by_status(JobStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_run_loop_executes_and_stops() {
        // Real clock for the loop test
        let clock = Arc::new(crate::port::time_provider::SystemTimeProvider);
        let repo = Arc::new(InMemoryJobRepository::new());
        let scheduler = Arc::new(JobScheduler::new(
            repo.clone(),
            Arc::new(RecordingNotifier::new()),
            clock,
            Arc::new(SeqIdProvider::new()),
            BackoffPolicy::default(),
            SchedulerConfig {
                poll_interval_ms: 20,
                min_sleep_ms: 1,
                ..Default::default()
            },
        ));
        let executor = Arc::new(MockJobExecutor::new_success());
        scheduler.register_executor("outbox_flush", executor.clone());

        let id = scheduler
            .create_job(JobKind::OutboxFlush, "flush", CreateJobOptions::default())
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let loop_scheduler = scheduler.clone();
        let handle = tokio::spawn(async move { loop_scheduler.run(shutdown_rx).await });

        // Wait for the job to complete
        let mut done = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if repo.get(&id).map(|j| j.status) == Some(JobStatus::Completed) {
                done = true;
                break;
            }
        }
        assert!(done, "job did not complete under the loop");

        shutdown_tx.shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
