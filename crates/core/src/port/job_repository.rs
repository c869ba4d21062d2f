// Job Repository Port (Interface)
//
// The claim is the single-flight guarantee: a job moves PENDING -> RUNNING in
// one conditional step, so two loops can never execute the same job id
// concurrently, and a completion write is a no-op once the job was cancelled.

use async_trait::async_trait;

use crate::domain::{Job, JobId, JobStatus};
use crate::error::Result;

/// Repository interface for Job persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically claim due pending jobs (PENDING -> RUNNING, last_run = now),
    /// ordered priority-first then next_run. Returns the claimed jobs.
    async fn claim_due(&self, now: i64, limit: i64) -> Result<Vec<Job>>;

    /// RUNNING -> COMPLETED. Returns false if no longer running (cancelled
    /// mid-flight); the caller treats that as a no-op.
    async fn complete(&self, id: &JobId, now: i64) -> Result<bool>;

    /// RUNNING -> FAILED (terminal). Returns false if no longer running.
    async fn fail(&self, id: &JobId, now: i64, error: &str) -> Result<bool>;

    /// RUNNING -> PENDING with a new next_run (retry backoff or recurrence).
    /// Returns false if no longer running.
    async fn reschedule(
        &self,
        id: &JobId,
        next_run: i64,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<bool>;

    /// PENDING/RUNNING -> CANCELLED. Returns false if already terminal.
    async fn cancel(&self, id: &JobId, now: i64) -> Result<bool>;

    /// Earliest next_run across pending jobs (loop wake-up hint)
    async fn earliest_pending_run(&self) -> Result<Option<i64>>;

    /// List jobs, optionally filtered by status and/or kind discriminator
    async fn list(
        &self,
        status: Option<JobStatus>,
        kind: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>>;

    /// Count jobs in a status
    async fn count_by_status(&self, status: JobStatus) -> Result<i64>;

    /// Non-terminal recurring job of a kind, if one exists (idempotent
    /// ensure-registered at startup)
    async fn find_active_recurring(&self, kind: &str) -> Result<Option<Job>>;

    /// Crash recovery: RUNNING -> PENDING with next_run = now for every job
    /// orphaned by a previous process. Returns the number requeued.
    async fn requeue_orphaned_running(&self, now: i64) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository with the same conditional-update semantics as the
    /// SQLite adapter
    pub struct InMemoryJobRepository {
        rows: Mutex<HashMap<JobId, Job>>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
            }
        }

        pub fn get(&self, id: &str) -> Option<Job> {
            self.rows.lock().unwrap().get(id).cloned()
        }
    }

    impl Default for InMemoryJobRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &Job) -> Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }

        async fn claim_due(&self, now: i64, limit: i64) -> Result<Vec<Job>> {
            let mut rows = self.rows.lock().unwrap();
            let mut due_ids: Vec<JobId> = rows
                .values()
                .filter(|j| j.status == JobStatus::Pending && j.next_run <= now)
                .map(|j| j.id.clone())
                .collect();
            due_ids.sort_by(|a, b| {
                let ja = &rows[a];
                let jb = &rows[b];
                jb.priority
                    .cmp(&ja.priority)
                    .then(ja.next_run.cmp(&jb.next_run))
            });
            due_ids.truncate(limit as usize);

            let mut claimed = Vec::new();
            for id in due_ids {
                if let Some(job) = rows.get_mut(&id) {
                    job.status = JobStatus::Running;
                    job.last_run = Some(now);
                    claimed.push(job.clone());
                }
            }
            Ok(claimed)
        }

        async fn complete(&self, id: &JobId, now: i64) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(id) {
                Some(job) if job.status == JobStatus::Running => {
                    job.status = JobStatus::Completed;
                    job.finished_at = Some(now);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn fail(&self, id: &JobId, now: i64, error: &str) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(id) {
                Some(job) if job.status == JobStatus::Running => {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(now);
                    job.last_error = Some(error.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn reschedule(
            &self,
            id: &JobId,
            next_run: i64,
            attempts: i32,
            last_error: Option<&str>,
        ) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(id) {
                Some(job) if job.status == JobStatus::Running => {
                    job.status = JobStatus::Pending;
                    job.next_run = next_run;
                    job.attempts = attempts;
                    if let Some(err) = last_error {
                        job.last_error = Some(err.to_string());
                    }
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn cancel(&self, id: &JobId, now: i64) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(id) {
                Some(job) if !job.status.is_terminal() => {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(now);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn earliest_pending_run(&self) -> Result<Option<i64>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .map(|j| j.next_run)
                .min())
        }

        async fn list(
            &self,
            status: Option<JobStatus>,
            kind: Option<&str>,
            limit: i64,
        ) -> Result<Vec<Job>> {
            let rows = self.rows.lock().unwrap();
            let mut jobs: Vec<Job> = rows
                .values()
                .filter(|j| status.map_or(true, |s| j.status == s))
                .filter(|j| kind.map_or(true, |k| j.kind.discriminator() == k))
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            jobs.truncate(limit as usize);
            Ok(jobs)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.values().filter(|j| j.status == status).count() as i64)
        }

        async fn find_active_recurring(&self, kind: &str) -> Result<Option<Job>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .values()
                .find(|j| {
                    j.kind.discriminator() == kind
                        && j.is_recurring()
                        && !j.status.is_terminal()
                })
                .cloned())
        }

        async fn requeue_orphaned_running(&self, now: i64) -> Result<u64> {
            let mut rows = self.rows.lock().unwrap();
            let mut requeued = 0;
            for job in rows.values_mut() {
                if job.status == JobStatus::Running {
                    job.status = JobStatus::Pending;
                    job.next_run = now;
                    requeued += 1;
                }
            }
            Ok(requeued)
        }
    }
}
