// Message Repository Port (Interface)
//
// Mutations are atomic conditional updates: the store applies the write only
// when the row is still in the expected state and reports whether it did.
// Callers never read-then-write in two steps.

use async_trait::async_trait;

use crate::domain::{MessageId, MessageStatus, Platform, QueueStats, QueuedMessage};
use crate::error::Result;

/// Repository interface for QueuedMessage persistence
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert a new message; the store assigns the enqueue sequence
    async fn insert(&self, message: &QueuedMessage) -> Result<()>;

    /// Find message by ID
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<QueuedMessage>>;

    /// Pending messages due at `now`, ordered priority-first then enqueue
    /// sequence (stable within a priority)
    async fn find_due(&self, now: i64, limit: i64) -> Result<Vec<QueuedMessage>>;

    /// PENDING -> SENT. Returns false if the message was no longer pending.
    async fn mark_sent(&self, id: &MessageId, now: i64) -> Result<bool>;

    /// PENDING -> FAILED (terminal). Returns false if no longer pending.
    async fn mark_failed(&self, id: &MessageId, now: i64, error: &str) -> Result<bool>;

    /// Retry backoff: bump attempt_count and push scheduled_for, guarded on
    /// the attempt count observed by the caller (compare-and-swap). Returns
    /// false if the row changed underneath or is no longer pending.
    async fn reschedule(
        &self,
        id: &MessageId,
        expected_attempts: i32,
        new_attempts: i32,
        scheduled_for: i64,
        last_error: &str,
    ) -> Result<bool>;

    /// PENDING -> CANCELLED. Returns false if no longer pending.
    async fn cancel(&self, id: &MessageId, now: i64, reason: &str) -> Result<bool>;

    /// Pending depth for one platform (all tenants)
    async fn pending_count(&self, platform: Platform) -> Result<i64>;

    /// Oldest (by enqueue sequence) pending low-priority message for a
    /// platform; the backpressure drop candidate
    async fn oldest_low_priority_pending(
        &self,
        platform: Platform,
    ) -> Result<Option<QueuedMessage>>;

    /// Counts by status, optionally scoped to a tenant
    async fn queue_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats>;

    /// Count messages currently in the given status
    async fn count_by_status(&self, status: MessageStatus) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::{MessagePriority, PlatformDepth};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository with the same conditional-update semantics as the
    /// SQLite adapter
    pub struct InMemoryMessageRepository {
        inner: Mutex<Inner>,
    }

    struct Inner {
        rows: HashMap<MessageId, QueuedMessage>,
        next_seq: i64,
    }

    impl InMemoryMessageRepository {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(Inner {
                    rows: HashMap::new(),
                    next_seq: 1,
                }),
            }
        }

        /// Direct row access for test assertions
        pub fn get(&self, id: &str) -> Option<QueuedMessage> {
            self.inner.lock().unwrap().rows.get(id).cloned()
        }
    }

    impl Default for InMemoryMessageRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl MessageRepository for InMemoryMessageRepository {
        async fn insert(&self, message: &QueuedMessage) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            let mut row = message.clone();
            row.seq = inner.next_seq;
            inner.next_seq += 1;
            inner.rows.insert(row.id.clone(), row);
            Ok(())
        }

        async fn find_by_id(&self, id: &MessageId) -> Result<Option<QueuedMessage>> {
            Ok(self.inner.lock().unwrap().rows.get(id).cloned())
        }

        async fn find_due(&self, now: i64, limit: i64) -> Result<Vec<QueuedMessage>> {
            let inner = self.inner.lock().unwrap();
            let mut due: Vec<QueuedMessage> = inner
                .rows
                .values()
                .filter(|m| m.is_due(now))
                .cloned()
                .collect();
            due.sort_by(|a, b| {
                b.priority
                    .rank()
                    .cmp(&a.priority.rank())
                    .then(a.seq.cmp(&b.seq))
            });
            due.truncate(limit as usize);
            Ok(due)
        }

        async fn mark_sent(&self, id: &MessageId, now: i64) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner.rows.get_mut(id) {
                Some(row) if row.status == MessageStatus::Pending => {
                    row.status = MessageStatus::Sent;
                    row.finished_at = Some(now);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_failed(&self, id: &MessageId, now: i64, error: &str) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner.rows.get_mut(id) {
                Some(row) if row.status == MessageStatus::Pending => {
                    row.status = MessageStatus::Failed;
                    row.finished_at = Some(now);
                    row.last_error = Some(error.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn reschedule(
            &self,
            id: &MessageId,
            expected_attempts: i32,
            new_attempts: i32,
            scheduled_for: i64,
            last_error: &str,
        ) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner.rows.get_mut(id) {
                Some(row)
                    if row.status == MessageStatus::Pending
                        && row.attempt_count == expected_attempts =>
                {
                    row.attempt_count = new_attempts;
                    row.scheduled_for = scheduled_for;
                    row.last_error = Some(last_error.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn cancel(&self, id: &MessageId, now: i64, reason: &str) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            match inner.rows.get_mut(id) {
                Some(row) if row.status == MessageStatus::Pending => {
                    row.status = MessageStatus::Cancelled;
                    row.finished_at = Some(now);
                    row.last_error = Some(reason.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn pending_count(&self, platform: Platform) -> Result<i64> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .rows
                .values()
                .filter(|m| m.platform == platform && m.status == MessageStatus::Pending)
                .count() as i64)
        }

        async fn oldest_low_priority_pending(
            &self,
            platform: Platform,
        ) -> Result<Option<QueuedMessage>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .rows
                .values()
                .filter(|m| {
                    m.platform == platform
                        && m.status == MessageStatus::Pending
                        && m.priority == MessagePriority::Low
                })
                .min_by_key(|m| m.seq)
                .cloned())
        }

        async fn queue_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats> {
            let inner = self.inner.lock().unwrap();
            let mut stats = QueueStats::default();
            let mut depth: HashMap<Platform, i64> = HashMap::new();

            for row in inner.rows.values() {
                if let Some(tenant) = tenant_id {
                    if row.tenant_id != tenant {
                        continue;
                    }
                }
                match row.status {
                    MessageStatus::Pending => {
                        stats.pending += 1;
                        *depth.entry(row.platform).or_default() += 1;
                    }
                    MessageStatus::Sent => stats.sent += 1,
                    MessageStatus::Failed => stats.failed += 1,
                    MessageStatus::Cancelled => stats.cancelled += 1,
                }
            }

            stats.by_platform = depth
                .into_iter()
                .map(|(platform, pending)| PlatformDepth { platform, pending })
                .collect();
            stats.by_platform.sort_by_key(|d| d.platform.as_str());
            Ok(stats)
        }

        async fn count_by_status(&self, status: MessageStatus) -> Result<i64> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .rows
                .values()
                .filter(|m| m.status == status)
                .count() as i64)
        }
    }
}
