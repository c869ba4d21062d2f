// Notification Sink Port
// Forwards operator-relevant events (dropped messages, token alerts, stalled
// loops) to whatever surface the host system wires in.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{AlertCondition, AlertSeverity, Platform, TenantId};

/// Operator-facing events emitted by the resilience layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A low-priority message was dropped to keep a platform queue bounded
    MessageDropped {
        message_id: String,
        tenant_id: TenantId,
        platform: Platform,
        reason: String,
    },
    /// A message exhausted its retry budget or failed permanently
    MessageFailed {
        message_id: String,
        tenant_id: TenantId,
        platform: Platform,
        error: String,
    },
    /// A platform queue exceeded its depth cap with no low-priority victim
    QueueCapExceeded {
        platform: Platform,
        depth: i64,
        cap: i64,
    },
    /// A token alert was created
    TokenAlertRaised {
        alert_id: String,
        tenant_id: TenantId,
        platform: Platform,
        condition: AlertCondition,
        severity: AlertSeverity,
        message: String,
    },
    /// A control loop exhausted its store-error budget and stopped
    LoopStalled { loop_name: String, error: String },
}

/// Notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: Notification);
}

/// Default sink: structured log lines (the operator dashboard tails these)
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: Notification) {
        match &event {
            Notification::LoopStalled { loop_name, error } => {
                tracing::error!(loop_name = %loop_name, error = %error, "operational alert");
            }
            other => {
                tracing::warn!(event = ?other, "operator notification");
            }
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every event for assertions
    pub struct RecordingNotifier {
        events: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn events(&self) -> Vec<Notification> {
            self.events.lock().unwrap().clone()
        }

        pub fn dropped_count(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, Notification::MessageDropped { .. }))
                .count()
        }

        pub fn alert_count(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, Notification::TokenAlertRaised { .. }))
                .count()
        }
    }

    impl Default for RecordingNotifier {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: Notification) {
            self.events.lock().unwrap().push(event);
        }
    }
}
