// Startup recovery
//
// Control jobs are in-process and idempotent, so anything left RUNNING by a
// crashed process is safe to requeue immediately. Pending messages and tokens
// need no recovery: their state is already authoritative in the store.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::port::{JobRepository, TimeProvider};

/// Re-queues jobs orphaned by a previous process; run once before the
/// scheduler loop starts
pub struct StartupRecovery {
    job_repo: Arc<dyn JobRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl StartupRecovery {
    pub fn new(job_repo: Arc<dyn JobRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            job_repo,
            time_provider,
        }
    }

    /// RUNNING -> PENDING with next_run = now, in one conditional pass.
    /// Returns the number of jobs requeued.
    pub async fn requeue_orphaned_jobs(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let requeued = self.job_repo.requeue_orphaned_running(now).await?;
        if requeued > 0 {
            info!(requeued = requeued, "orphaned running jobs requeued");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobKind, JobStatus};
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::MockTimeProvider;

    #[tokio::test]
    async fn test_orphaned_running_jobs_requeued() {
        let clock = Arc::new(MockTimeProvider::new(500_000));
        let repo = Arc::new(InMemoryJobRepository::new());

        let mut orphan = Job::new("j-1", 100_000, JobKind::OutboxFlush, "flush");
        orphan.status = JobStatus::Running;
        repo.insert(&orphan).await.unwrap();

        let pending = Job::new("j-2", 100_000, JobKind::TokenSweep, "sweep");
        repo.insert(&pending).await.unwrap();

        let recovery = StartupRecovery::new(repo.clone(), clock);
        assert_eq!(recovery.requeue_orphaned_jobs().await.unwrap(), 1);

        let recovered = repo.get("j-1").unwrap();
        assert_eq!(recovered.status, JobStatus::Pending);
        assert_eq!(recovered.next_run, 500_000);
        assert_eq!(repo.get("j-2").unwrap().status, JobStatus::Pending);
    }
}
