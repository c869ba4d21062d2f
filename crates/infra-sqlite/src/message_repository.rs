// SQLite MessageRepository Implementation
//
// All state changes are guarded UPDATEs; rows_affected tells the caller
// whether it won the race.

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use streamgate_core::domain::{
    MessageId, MessagePayload, MessagePriority, MessageStatus, Platform, PlatformDepth,
    QueueStats, QueuedMessage,
};
use streamgate_core::error::{AppError, Result};
use streamgate_core::port::MessageRepository;

use crate::map_sqlx_error;

pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct MessageRow {
    seq: i64,
    id: String,
    tenant_id: String,
    platform: String,
    payload: String,
    priority: i32,
    status: String,
    scheduled_for: i64,
    attempt_count: i32,
    max_attempts: i32,
    last_error: Option<String>,
    created_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<MessageRow> for QueuedMessage {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let platform: Platform = row
            .platform
            .parse()
            .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))?;
        let status: MessageStatus = row
            .status
            .parse()
            .map_err(|e: streamgate_core::domain::DomainError| AppError::Database(e.to_string()))?;
        let priority = MessagePriority::from_rank(row.priority)
            .map_err(|e| AppError::Database(e.to_string()))?;
        let payload: MessagePayload = serde_json::from_str(&row.payload)?;

        Ok(QueuedMessage {
            id: row.id,
            tenant_id: row.tenant_id,
            platform,
            payload,
            priority,
            status,
            scheduled_for: row.scheduled_for,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            finished_at: row.finished_at,
            seq: row.seq,
        })
    }
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn insert(&self, message: &QueuedMessage) -> Result<()> {
        let payload = serde_json::to_string(&message.payload)?;
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, tenant_id, platform, message_type, payload,
                priority, status, scheduled_for,
                attempt_count, max_attempts, last_error,
                created_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.tenant_id)
        .bind(message.platform.as_str())
        .bind(message.payload.kind())
        .bind(payload)
        .bind(message.priority.rank())
        .bind(message.status.to_string())
        .bind(message.scheduled_for)
        .bind(message.attempt_count)
        .bind(message.max_attempts)
        .bind(&message.last_error)
        .bind(message.created_at)
        .bind(message.finished_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(QueuedMessage::try_from).transpose()
    }

    async fn find_due(&self, now: i64, limit: i64) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM messages
            WHERE status = 'PENDING' AND scheduled_for <= ?
            ORDER BY priority DESC, seq ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(QueuedMessage::try_from).collect()
    }

    async fn mark_sent(&self, id: &MessageId, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'SENT', finished_at = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: &MessageId, now: i64, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = 'FAILED', finished_at = ?, last_error = ?
            WHERE id = ? AND status = 'PENDING'
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
        id: &MessageId,
        expected_attempts: i32,
        new_attempts: i32,
        scheduled_for: i64,
        last_error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET attempt_count = ?, scheduled_for = ?, last_error = ?
            WHERE id = ? AND status = 'PENDING' AND attempt_count = ?
            "#,
        )
        .bind(new_attempts)
        .bind(scheduled_for)
        .bind(last_error)
        .bind(id)
        .bind(expected_attempts)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: &MessageId, now: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = 'CANCELLED', finished_at = ?, last_error = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(now)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_count(&self, platform: Platform) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE platform = ? AND status = 'PENDING'",
        )
        .bind(platform.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn oldest_low_priority_pending(
        &self,
        platform: Platform,
    ) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM messages
            WHERE platform = ? AND status = 'PENDING' AND priority = ?
            ORDER BY seq ASC
            LIMIT 1
            "#,
        )
        .bind(platform.as_str())
        .bind(MessagePriority::Low.rank())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(QueuedMessage::try_from).transpose()
    }

    async fn queue_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats> {
        let status_rows: Vec<(String, i64)> = match tenant_id {
            Some(tenant) => sqlx::query_as(
                "SELECT status, COUNT(*) FROM messages WHERE tenant_id = ? GROUP BY status",
            )
            .bind(tenant)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?,
            None => sqlx::query_as("SELECT status, COUNT(*) FROM messages GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?,
        };

        let mut stats = QueueStats::default();
        for (status, count) in status_rows {
            match status.as_str() {
                "PENDING" => stats.pending = count,
                "SENT" => stats.sent = count,
                "FAILED" => stats.failed = count,
                "CANCELLED" => stats.cancelled = count,
                _ => {}
            }
        }

        let depth_rows: Vec<(String, i64)> = match tenant_id {
            Some(tenant) => sqlx::query_as(
                r#"
                SELECT platform, COUNT(*) FROM messages
                WHERE tenant_id = ? AND status = 'PENDING'
                GROUP BY platform ORDER BY platform
                "#,
            )
            .bind(tenant)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?,
            None => sqlx::query_as(
                r#"
                SELECT platform, COUNT(*) FROM messages
                WHERE status = 'PENDING'
                GROUP BY platform ORDER BY platform
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?,
        };

        for (platform, pending) in depth_rows {
            let platform: Platform = platform
                .parse()
                .map_err(|e: streamgate_core::domain::DomainError| {
                    AppError::Database(e.to_string())
                })?;
            stats.by_platform.push(PlatformDepth { platform, pending });
        }

        Ok(stats)
    }

    async fn count_by_status(&self, status: MessageStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE status = ?")
                .bind(status.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn repo() -> SqliteMessageRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteMessageRepository::new(pool)
    }

    fn message(id: &str, priority: MessagePriority, scheduled_for: i64) -> QueuedMessage {
        QueuedMessage::new(
            id,
            1_000,
            "tenant-a",
            Platform::Twitch,
            MessagePayload::Chat {
                channel: "main".into(),
                text: format!("text-{}", id),
            },
            priority,
            scheduled_for,
            5,
        )
    }

    #[tokio::test]
    async fn test_insert_and_roundtrip() {
        let repo = repo().await;
        let msg = message("m-1", MessagePriority::High, 2_000);
        repo.insert(&msg).await.unwrap();

        let found = repo.find_by_id(&"m-1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.tenant_id, "tenant-a");
        assert_eq!(found.platform, Platform::Twitch);
        assert_eq!(found.priority, MessagePriority::High);
        assert_eq!(found.status, MessageStatus::Pending);
        assert_eq!(found.payload, msg.payload);
        assert!(found.seq > 0);
    }

    #[tokio::test]
    async fn test_find_due_priority_then_seq() {
        let repo = repo().await;
        repo.insert(&message("a", MessagePriority::Normal, 1_000)).await.unwrap();
        repo.insert(&message("b", MessagePriority::High, 1_000)).await.unwrap();
        repo.insert(&message("c", MessagePriority::Normal, 1_000)).await.unwrap();
        repo.insert(&message("later", MessagePriority::Urgent, 9_000)).await.unwrap();

        let due = repo.find_due(2_000, 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_conditional_transitions() {
        let repo = repo().await;
        repo.insert(&message("m-1", MessagePriority::Normal, 1_000)).await.unwrap();

        assert!(repo.mark_sent(&"m-1".to_string(), 3_000).await.unwrap());
        // Second transition loses: no longer pending
        assert!(!repo.mark_sent(&"m-1".to_string(), 3_000).await.unwrap());
        assert!(!repo.mark_failed(&"m-1".to_string(), 3_000, "late").await.unwrap());
        assert!(!repo.cancel(&"m-1".to_string(), 3_000, "late").await.unwrap());
    }

    #[tokio::test]
    async fn test_reschedule_cas_on_attempts() {
        let repo = repo().await;
        repo.insert(&message("m-1", MessagePriority::Normal, 1_000)).await.unwrap();

        assert!(repo
            .reschedule(&"m-1".to_string(), 0, 1, 5_000, "timeout")
            .await
            .unwrap());
        // Stale expected_attempts loses
        assert!(!repo
            .reschedule(&"m-1".to_string(), 0, 1, 9_000, "timeout")
            .await
            .unwrap());

        let row = repo.find_by_id(&"m-1".to_string()).await.unwrap().unwrap();
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.scheduled_for, 5_000);
    }

    #[tokio::test]
    async fn test_oldest_low_priority_and_counts() {
        let repo = repo().await;
        repo.insert(&message("n-1", MessagePriority::Normal, 1_000)).await.unwrap();
        repo.insert(&message("l-1", MessagePriority::Low, 1_000)).await.unwrap();
        repo.insert(&message("l-2", MessagePriority::Low, 1_000)).await.unwrap();

        let victim = repo
            .oldest_low_priority_pending(Platform::Twitch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(victim.id, "l-1");
        assert_eq!(repo.pending_count(Platform::Twitch).await.unwrap(), 3);
        assert_eq!(repo.pending_count(Platform::Kick).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_stats_scoped() {
        let repo = repo().await;
        repo.insert(&message("m-1", MessagePriority::Normal, 1_000)).await.unwrap();
        let mut other = message("m-2", MessagePriority::Normal, 1_000);
        other.tenant_id = "tenant-b".to_string();
        repo.insert(&other).await.unwrap();
        repo.mark_sent(&"m-2".to_string(), 2_000).await.unwrap();

        let all = repo.queue_stats(None).await.unwrap();
        assert_eq!(all.pending, 1);
        assert_eq!(all.sent, 1);

        let scoped = repo.queue_stats(Some("tenant-a")).await.unwrap();
        assert_eq!(scoped.pending, 1);
        assert_eq!(scoped.sent, 0);
        assert_eq!(scoped.by_platform.len(), 1);
        assert_eq!(scoped.by_platform[0].pending, 1);
    }
}
