// Message Outbox - bounded priority send queue with backpressure
//
// Selection on each flush: pending, due, platform circuit allows a request
// and is not throttled, credential not suspended. Strictly priority-ordered,
// stable within a priority. Messages for a blocked platform are left
// untouched; that is the backpressure mechanism, not a retry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::application::backoff::BackoffPolicy;
use crate::application::health::{FailureKind, PlatformHealthMonitor};
use crate::application::tokens::TokenLifecycleManager;
use crate::domain::{
    MessageId, MessagePayload, MessagePriority, Platform, QueueStats, QueuedMessage, TenantId,
};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, MessageRepository, Notification, Notifier, PlatformSender, SendError, TimeProvider,
};

/// Outbox tuning
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Pending depth cap per platform
    pub depth_cap: i64,
    /// Retry budget per message
    pub max_attempts: i32,
    /// Bounded timeout around one send attempt (ms)
    pub send_timeout_ms: u64,
    /// Messages considered per flush
    pub batch_limit: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            depth_cap: 500,
            max_attempts: 5,
            send_timeout_ms: 10_000,
            batch_limit: 50,
        }
    }
}

/// Priority/scheduled outbound queue. One per process, constructed by the
/// composition root and driven by a recurring scheduler job.
pub struct MessageOutbox {
    repo: Arc<dyn MessageRepository>,
    health: Arc<PlatformHealthMonitor>,
    sender: Arc<dyn PlatformSender>,
    tokens: Arc<TokenLifecycleManager>,
    notifier: Arc<dyn Notifier>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    backoff: BackoffPolicy,
    config: OutboxConfig,
    /// (tenant, platform) pairs whose sends are suspended after an auth
    /// failure, until the token manager reports the credential usable again
    suspended: Mutex<HashSet<(TenantId, Platform)>>,
}

impl MessageOutbox {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        health: Arc<PlatformHealthMonitor>,
        sender: Arc<dyn PlatformSender>,
        tokens: Arc<TokenLifecycleManager>,
        notifier: Arc<dyn Notifier>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        backoff: BackoffPolicy,
        config: OutboxConfig,
    ) -> Self {
        Self {
            repo,
            health,
            sender,
            tokens,
            notifier,
            time_provider,
            id_provider,
            backoff,
            config,
            suspended: Mutex::new(HashSet::new()),
        }
    }

    /// Enqueue an outbound message.
    ///
    /// Validates the payload at the boundary, applies the per-platform depth
    /// cap (dropping the oldest low-priority message, or alerting when no low
    /// candidate exists), and persists the row.
    pub async fn enqueue(
        &self,
        tenant_id: impl Into<String>,
        platform: Platform,
        payload: MessagePayload,
        priority: MessagePriority,
        scheduled_for: Option<i64>,
    ) -> Result<MessageId> {
        payload.validate()?;

        let tenant_id = tenant_id.into();
        let now = self.time_provider.now_millis();
        let scheduled_for = scheduled_for.unwrap_or(now).max(now);

        self.enforce_depth_cap(platform, now).await?;

        let message = QueuedMessage::new(
            self.id_provider.generate_id(),
            now,
            tenant_id,
            platform,
            payload,
            priority,
            scheduled_for,
            self.config.max_attempts,
        );
        self.repo.insert(&message).await?;

        debug!(
            message_id = %message.id,
            platform = %platform,
            priority = ?priority,
            "message enqueued"
        );
        Ok(message.id)
    }

    /// Due messages whose platform and credential currently permit dispatch,
    /// in dispatch order. Pure query; consumes no half-open probe.
    pub async fn dequeue_ready(&self) -> Result<Vec<QueuedMessage>> {
        let now = self.time_provider.now_millis();
        let due = self.repo.find_due(now, self.config.batch_limit).await?;

        let mut ready = Vec::with_capacity(due.len());
        for message in due {
            if self.is_suspended(&message.tenant_id, message.platform).await? {
                continue;
            }
            if self.health.is_throttled(message.platform)
                || !self.health.can_make_request(message.platform)
            {
                continue;
            }
            ready.push(message);
        }
        Ok(ready)
    }

    /// One flush pass: attempt delivery for every dispatchable due message.
    /// Returns the number of messages sent.
    pub async fn flush(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let due = self.repo.find_due(now, self.config.batch_limit).await?;
        let mut sent = 0;

        for message in due {
            if self.is_suspended(&message.tenant_id, message.platform).await? {
                continue;
            }
            if self.health.is_throttled(message.platform) {
                continue;
            }
            // The permit is what enforces the single half-open probe
            if !self.health.acquire_send_permit(message.platform) {
                continue;
            }

            if self.attempt_send(&message).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// PENDING -> SENT (exposed for business logic that delivers out of band)
    pub async fn mark_sent(&self, id: &MessageId) -> Result<bool> {
        let now = self.time_provider.now_millis();
        self.repo.mark_sent(id, now).await
    }

    /// PENDING -> FAILED terminal
    pub async fn mark_failed(&self, id: &MessageId, error: &str) -> Result<bool> {
        let now = self.time_provider.now_millis();
        self.repo.mark_failed(id, now, error).await
    }

    /// Queue statistics, optionally scoped to one tenant
    pub async fn queue_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats> {
        self.repo.queue_stats(tenant_id).await
    }

    /// Attempt one delivery with a bounded timeout; apply the outcome.
    /// Returns true when the message was sent.
    async fn attempt_send(&self, message: &QueuedMessage) -> Result<bool> {
        let timeout = std::time::Duration::from_millis(self.config.send_timeout_ms);
        let outcome = tokio::time::timeout(
            timeout,
            self.sender
                .send(&message.tenant_id, message.platform, &message.payload),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                let now = self.time_provider.now_millis();
                if !self.repo.mark_sent(&message.id, now).await? {
                    debug!(message_id = %message.id, "sent message no longer pending");
                }
                self.health.record_success(message.platform);
                debug!(message_id = %message.id, platform = %message.platform, "message sent");
                Ok(true)
            }
            Err(_elapsed) => {
                self.handle_transient(message, "send timed out").await?;
                Ok(false)
            }
            Ok(Err(SendError::Transient(detail))) => {
                self.handle_transient(message, &detail).await?;
                Ok(false)
            }
            Ok(Err(SendError::RateLimited { retry_after_ms })) => {
                self.handle_rate_limited(message, retry_after_ms).await?;
                Ok(false)
            }
            Ok(Err(SendError::Auth(detail))) => {
                self.handle_auth_failure(message, &detail).await?;
                Ok(false)
            }
            Ok(Err(SendError::Permanent(detail))) => {
                let now = self.time_provider.now_millis();
                self.repo.mark_failed(&message.id, now, &detail).await?;
                self.notify_failed(message, &detail).await;
                warn!(
                    message_id = %message.id,
                    error = %detail,
                    "message failed permanently"
                );
                Ok(false)
            }
        }
    }

    /// Transient failure: feed the circuit, consume one attempt, reschedule
    /// with backoff or fail terminally once the budget is spent
    async fn handle_transient(&self, message: &QueuedMessage, detail: &str) -> Result<()> {
        self.health
            .record_failure(message.platform, FailureKind::Transient);

        let now = self.time_provider.now_millis();
        let new_attempts = message.attempt_count + 1;

        if new_attempts >= message.max_attempts {
            if self.repo.mark_failed(&message.id, now, detail).await? {
                self.notify_failed(message, detail).await;
                warn!(
                    message_id = %message.id,
                    attempts = new_attempts,
                    "message failed after exhausting retries"
                );
            }
            return Ok(());
        }

        let delay = self.backoff.delay_for_attempt(&message.id, new_attempts);
        let updated = self
            .repo
            .reschedule(
                &message.id,
                message.attempt_count,
                new_attempts,
                now + delay,
                detail,
            )
            .await?;
        if updated {
            debug!(
                message_id = %message.id,
                attempt = new_attempts,
                delay_ms = delay,
                "message retry scheduled"
            );
        } else {
            debug!(message_id = %message.id, "retry reschedule lost a race, skipping");
        }
        Ok(())
    }

    /// Rate limit: throttle the platform, push the message past the throttle
    /// window; the circuit failure counter is untouched
    async fn handle_rate_limited(
        &self,
        message: &QueuedMessage,
        retry_after_ms: Option<i64>,
    ) -> Result<()> {
        self.health
            .record_failure(message.platform, FailureKind::RateLimited { retry_after_ms });

        let now = self.time_provider.now_millis();
        let new_attempts = message.attempt_count + 1;

        if new_attempts >= message.max_attempts {
            if self.repo.mark_failed(&message.id, now, "rate limited").await? {
                self.notify_failed(message, "rate limited").await;
            }
            return Ok(());
        }

        let backoff = self.backoff.delay_for_attempt(&message.id, new_attempts);
        let throttle = retry_after_ms.unwrap_or(0);
        let delay = backoff.max(throttle);
        self.repo
            .reschedule(
                &message.id,
                message.attempt_count,
                new_attempts,
                now + delay,
                "rate limited",
            )
            .await?;
        debug!(
            message_id = %message.id,
            delay_ms = delay,
            "message deferred past throttle window"
        );
        Ok(())
    }

    /// Auth failure: leave the message pending and untouched, suspend the
    /// (tenant, platform) pair, and route the failure to the token manager
    async fn handle_auth_failure(&self, message: &QueuedMessage, detail: &str) -> Result<()> {
        let key = (message.tenant_id.clone(), message.platform);
        self.suspended.lock().unwrap().insert(key);
        info!(
            tenant_id = %message.tenant_id,
            platform = %message.platform,
            "sends suspended pending credential recovery"
        );

        self.tokens
            .report_auth_failure(&message.tenant_id, message.platform)
            .await?;
        Ok(())
    }

    /// Whether the pair is suspended; lifts the suspension as soon as the
    /// token manager reports the credential usable again
    async fn is_suspended(&self, tenant_id: &str, platform: Platform) -> Result<bool> {
        let key = (tenant_id.to_string(), platform);
        if !self.suspended.lock().unwrap().contains(&key) {
            return Ok(false);
        }

        if self.tokens.credential_usable(tenant_id, platform).await? {
            self.suspended.lock().unwrap().remove(&key);
            info!(
                tenant_id = %tenant_id,
                platform = %platform,
                "credential recovered, sends resumed"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Depth cap: drop the oldest low-priority pending message, or alert when
    /// only higher-priority work would be lost
    async fn enforce_depth_cap(&self, platform: Platform, now: i64) -> Result<()> {
        let depth = self.repo.pending_count(platform).await?;
        if depth < self.config.depth_cap {
            return Ok(());
        }

        match self.repo.oldest_low_priority_pending(platform).await? {
            Some(victim) => {
                if self
                    .repo
                    .cancel(&victim.id, now, "dropped: queue depth cap")
                    .await?
                {
                    warn!(
                        message_id = %victim.id,
                        platform = %platform,
                        depth = depth,
                        "dropped oldest low-priority message at depth cap"
                    );
                    self.notifier
                        .notify(Notification::MessageDropped {
                            message_id: victim.id.clone(),
                            tenant_id: victim.tenant_id.clone(),
                            platform,
                            reason: "queue depth cap".to_string(),
                        })
                        .await;
                }
            }
            None => {
                warn!(
                    platform = %platform,
                    depth = depth,
                    cap = self.config.depth_cap,
                    "queue depth cap exceeded with no low-priority candidate"
                );
                self.notifier
                    .notify(Notification::QueueCapExceeded {
                        platform,
                        depth,
                        cap: self.config.depth_cap,
                    })
                    .await;
            }
        }
        Ok(())
    }

    async fn notify_failed(&self, message: &QueuedMessage, error: &str) {
        self.notifier
            .notify(Notification::MessageFailed {
                message_id: message.id.clone(),
                tenant_id: message.tenant_id.clone(),
                platform: message.platform,
                error: error.to_string(),
            })
            .await;
    }

    /// Cancel a pending message before it is picked for dispatch
    pub async fn cancel(&self, id: &MessageId) -> Result<bool> {
        let now = self.time_provider.now_millis();
        self.repo.cancel(id, now, "cancelled by caller").await
    }

    /// Look up one message
    pub async fn message(&self, id: &MessageId) -> Result<QueuedMessage> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))
    }
}
