// SQLite JobRepository Implementation
//
// The PENDING -> RUNNING claim is a guarded UPDATE per job id; a job that
// loses the guard was claimed by another tick (or cancelled) and is skipped.

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use streamgate_core::domain::{Job, JobId, JobKind, JobStatus};
use streamgate_core::error::{AppError, Result};
use streamgate_core::port::JobRepository;

use crate::map_sqlx_error;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    payload: String,
    name: String,
    status: String,
    priority: i32,
    run_at: i64,
    repeat_interval_ms: Option<i64>,
    last_run: Option<i64>,
    next_run: i64,
    attempts: i32,
    max_attempts: i32,
    created_at: i64,
    last_error: Option<String>,
    finished_at: Option<i64>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self> {
        let kind: JobKind = serde_json::from_str(&row.payload)?;
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))?;

        Ok(Job {
            id: row.id,
            kind,
            name: row.name,
            status,
            priority: row.priority,
            run_at: row.run_at,
            repeat_interval_ms: row.repeat_interval_ms,
            last_run: row.last_run,
            next_run: row.next_run,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            created_at: row.created_at,
            last_error: row.last_error,
            finished_at: row.finished_at,
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.kind)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, name, payload, status, priority,
                run_at, repeat_interval_ms, last_run, next_run,
                attempts, max_attempts, created_at, last_error, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.kind.discriminator())
        .bind(&job.name)
        .bind(payload)
        .bind(job.status.to_string())
        .bind(job.priority)
        .bind(job.run_at)
        .bind(job.repeat_interval_ms)
        .bind(job.last_run)
        .bind(job.next_run)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.created_at)
        .bind(&job.last_error)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(Job::try_from).transpose()
    }

    async fn claim_due(&self, now: i64, limit: i64) -> Result<Vec<Job>> {
        let due_ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM jobs
            WHERE status = 'PENDING' AND next_run <= ?
            ORDER BY priority DESC, next_run ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut claimed = Vec::with_capacity(due_ids.len());
        for (id,) in due_ids {
            let result = sqlx::query(
                "UPDATE jobs SET status = 'RUNNING', last_run = ? WHERE id = ? AND status = 'PENDING'",
            )
            .bind(now)
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            if result.rows_affected() == 1 {
                if let Some(job) = self.find_by_id(&id).await? {
                    claimed.push(job);
                }
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, id: &JobId, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'COMPLETED', finished_at = ? WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: &JobId, now: i64, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'FAILED', finished_at = ?, last_error = ?
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn reschedule(
        &self,
        id: &JobId,
        next_run: i64,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'PENDING', next_run = ?, attempts = ?,
                last_error = COALESCE(?, last_error)
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(next_run)
        .bind(attempts)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: &JobId, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'CANCELLED', finished_at = ?
            WHERE id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn earliest_pending_run(&self) -> Result<Option<i64>> {
        let next: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(next_run) FROM jobs WHERE status = 'PENDING'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(next)
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        kind: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR job_type = ?)
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(status.map(|s| s.to_string()))
        .bind(status.map(|s| s.to_string()))
        .bind(kind)
        .bind(kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn find_active_recurring(&self, kind: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE job_type = ? AND repeat_interval_ms IS NOT NULL
              AND status IN ('PENDING', 'RUNNING')
            LIMIT 1
            "#,
        )
        .bind(kind)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(Job::try_from).transpose()
    }

    async fn requeue_orphaned_running(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', next_run = ? WHERE status = 'RUNNING'",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn repo() -> SqliteJobRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobRepository::new(pool)
    }

    fn job(id: &str, next_run: i64) -> Job {
        Job::new(id, 1_000, JobKind::OutboxFlush, "flush").with_run_at(next_run)
    }

    #[tokio::test]
    async fn test_insert_and_roundtrip() {
        let repo = repo().await;
        let original = Job::new("j-1", 1_000, JobKind::PurgeTerminal { retention_hours: 48 }, "purge")
            .with_repeat_interval(60_000)
            .with_priority(5);
        repo.insert(&original).await.unwrap();

        let found = repo.find_by_id(&"j-1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.kind, JobKind::PurgeTerminal { retention_hours: 48 });
        assert_eq!(found.priority, 5);
        assert_eq!(found.repeat_interval_ms, Some(60_000));
        assert_eq!(found.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_due_is_single_flight() {
        let repo = repo().await;
        repo.insert(&job("j-1", 1_000)).await.unwrap();

        let first = repo.claim_due(2_000, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, JobStatus::Running);

        // Already running: a second claim finds nothing
        let second = repo.claim_due(2_000, 10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_next_run_and_priority() {
        let repo = repo().await;
        repo.insert(&job("early-low", 1_000)).await.unwrap();
        repo.insert(&job("future", 9_000)).await.unwrap();
        let urgent = Job::new("urgent", 1_000, JobKind::TokenSweep, "sweep")
            .with_run_at(1_500)
            .with_priority(10);
        repo.insert(&urgent).await.unwrap();

        let claimed = repo.claim_due(2_000, 10).await.unwrap();
        let ids: Vec<&str> = claimed.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["urgent", "early-low"]);
    }

    #[tokio::test]
    async fn test_completion_noop_after_cancel() {
        let repo = repo().await;
        repo.insert(&job("j-1", 1_000)).await.unwrap();
        repo.claim_due(2_000, 10).await.unwrap();

        assert!(repo.cancel(&"j-1".to_string(), 3_000).await.unwrap());
        assert!(!repo.complete(&"j-1".to_string(), 4_000).await.unwrap());
        assert!(!repo.reschedule(&"j-1".to_string(), 9_000, 0, None).await.unwrap());

        let row = repo.find_by_id(&"j-1".to_string()).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_terminal_is_noop() {
        let repo = repo().await;
        repo.insert(&job("j-1", 1_000)).await.unwrap();
        repo.claim_due(2_000, 10).await.unwrap();
        repo.complete(&"j-1".to_string(), 3_000).await.unwrap();

        assert!(!repo.cancel(&"j-1".to_string(), 4_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_earliest_pending_run() {
        let repo = repo().await;
        assert_eq!(repo.earliest_pending_run().await.unwrap(), None);
        repo.insert(&job("j-1", 5_000)).await.unwrap();
        repo.insert(&job("j-2", 3_000)).await.unwrap();
        assert_eq!(repo.earliest_pending_run().await.unwrap(), Some(3_000));
    }

    #[tokio::test]
    async fn test_find_active_recurring() {
        let repo = repo().await;
        assert!(repo.find_active_recurring("outbox_flush").await.unwrap().is_none());

        let recurring = Job::new("j-1", 1_000, JobKind::OutboxFlush, "flush")
            .with_repeat_interval(2_000);
        repo.insert(&recurring).await.unwrap();

        let found = repo.find_active_recurring("outbox_flush").await.unwrap();
        assert_eq!(found.unwrap().id, "j-1");
        assert!(repo.find_active_recurring("token_sweep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_requeue_orphaned_running() {
        let repo = repo().await;
        repo.insert(&job("j-1", 1_000)).await.unwrap();
        repo.insert(&job("j-2", 1_000)).await.unwrap();
        repo.claim_due(2_000, 10).await.unwrap();

        let requeued = repo.requeue_orphaned_running(5_000).await.unwrap();
        assert_eq!(requeued, 2);

        let row = repo.find_by_id(&"j-1".to_string()).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
        assert_eq!(row.next_run, 5_000);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let repo = repo().await;
        repo.insert(&job("j-1", 1_000)).await.unwrap();
        let sweep = Job::new("j-2", 1_000, JobKind::TokenSweep, "sweep");
        repo.insert(&sweep).await.unwrap();

        let all = repo.list(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let flushes = repo.list(None, Some("outbox_flush"), 10).await.unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].id, "j-1");

        let pending = repo.list(Some(JobStatus::Pending), None, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
    }
}
