// Queued Message Domain Model
//
// Outbound messages are persisted rows; the outbox never holds authoritative
// state in memory only.

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::platform::Platform;
use crate::domain::TenantId;

/// Message ID (UUID v4)
pub type MessageId = String;

/// Longest text accepted for any outbound payload (platform chat limits)
pub const MAX_TEXT_LEN: usize = 500;

/// Outbound message payload, keyed by an explicit type discriminator.
///
/// Free-form maps are rejected at the boundary; every variant is validated
/// before it reaches the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Chat {
        channel: String,
        text: String,
    },
    Reply {
        channel: String,
        reply_to: String,
        text: String,
    },
    Whisper {
        recipient: String,
        text: String,
    },
    Announcement {
        channel: String,
        text: String,
    },
}

impl MessagePayload {
    /// Stable discriminator, persisted as the `message_type` column
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Chat { .. } => "chat",
            MessagePayload::Reply { .. } => "reply",
            MessagePayload::Whisper { .. } => "whisper",
            MessagePayload::Announcement { .. } => "announcement",
        }
    }

    /// Boundary validation: every target non-empty, text within platform limits
    pub fn validate(&self) -> Result<()> {
        let (target, text) = match self {
            MessagePayload::Chat { channel, text } => (channel, text),
            MessagePayload::Reply {
                channel,
                reply_to,
                text,
            } => {
                if reply_to.is_empty() {
                    return Err(DomainError::ValidationError(
                        "reply_to must not be empty".to_string(),
                    ));
                }
                (channel, text)
            }
            MessagePayload::Whisper { recipient, text } => (recipient, text),
            MessagePayload::Announcement { channel, text } => (channel, text),
        };

        if target.is_empty() {
            return Err(DomainError::ValidationError(
                "message target must not be empty".to_string(),
            ));
        }
        if text.is_empty() {
            return Err(DomainError::ValidationError(
                "message text must not be empty".to_string(),
            ));
        }
        if text.chars().count() > MAX_TEXT_LEN {
            return Err(DomainError::ValidationError(format!(
                "message text exceeds {} characters",
                MAX_TEXT_LEN
            )));
        }
        Ok(())
    }
}

/// Dispatch priority (urgent > high > normal > low)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl MessagePriority {
    /// Numeric rank persisted for ORDER BY (higher dispatches first)
    pub fn rank(&self) -> i32 {
        match self {
            MessagePriority::Urgent => 3,
            MessagePriority::High => 2,
            MessagePriority::Normal => 1,
            MessagePriority::Low => 0,
        }
    }

    pub fn from_rank(rank: i32) -> Result<Self> {
        match rank {
            3 => Ok(MessagePriority::Urgent),
            2 => Ok(MessagePriority::High),
            1 => Ok(MessagePriority::Normal),
            0 => Ok(MessagePriority::Low),
            other => Err(DomainError::ValidationError(format!(
                "invalid priority rank: {}",
                other
            ))),
        }
    }
}

/// Message lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "PENDING"),
            MessageStatus::Sent => write!(f, "SENT"),
            MessageStatus::Failed => write!(f, "FAILED"),
            MessageStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MessageStatus::Pending),
            "SENT" => Ok(MessageStatus::Sent),
            "FAILED" => Ok(MessageStatus::Failed),
            "CANCELLED" => Ok(MessageStatus::Cancelled),
            other => Err(DomainError::ValidationError(format!(
                "invalid message status: {}",
                other
            ))),
        }
    }
}

/// Queued outbound message entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub payload: MessagePayload,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    /// Earliest dispatch time (epoch ms); pushed forward on retry backoff
    pub scheduled_for: i64,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: i64,
    /// Terminal timestamp (sent / failed / cancelled)
    pub finished_at: Option<i64>,
    /// Monotone enqueue sequence; assigned by the store, used for stable
    /// intra-priority ordering
    pub seq: i64,
}

impl QueuedMessage {
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        tenant_id: impl Into<String>,
        platform: Platform,
        payload: MessagePayload,
        priority: MessagePriority,
        scheduled_for: i64,
        max_attempts: i32,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            platform,
            payload,
            priority,
            status: MessageStatus::Pending,
            scheduled_for,
            attempt_count: 0,
            max_attempts,
            last_error: None,
            created_at,
            finished_at: None,
            seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, MessageStatus::Pending)
    }

    /// Due for dispatch at `now` (status and schedule only; platform health is
    /// the outbox's concern)
    pub fn is_due(&self, now: i64) -> bool {
        self.status == MessageStatus::Pending && self.scheduled_for <= now
    }
}

/// Per-platform pending depth, part of queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformDepth {
    pub platform: Platform,
    pub pending: i64,
}

/// Queue statistics, optionally scoped to one tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub by_platform: Vec<PlatformDepth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind_discriminators() {
        let chat = MessagePayload::Chat {
            channel: "c".into(),
            text: "hi".into(),
        };
        let whisper = MessagePayload::Whisper {
            recipient: "u".into(),
            text: "hi".into(),
        };
        assert_eq!(chat.kind(), "chat");
        assert_eq!(whisper.kind(), "whisper");
    }

    #[test]
    fn test_payload_validation() {
        let ok = MessagePayload::Chat {
            channel: "main".into(),
            text: "hello".into(),
        };
        assert!(ok.validate().is_ok());

        let empty_text = MessagePayload::Chat {
            channel: "main".into(),
            text: String::new(),
        };
        assert!(empty_text.validate().is_err());

        let empty_target = MessagePayload::Whisper {
            recipient: String::new(),
            text: "hi".into(),
        };
        assert!(empty_target.validate().is_err());

        let oversized = MessagePayload::Chat {
            channel: "main".into(),
            text: "x".repeat(MAX_TEXT_LEN + 1),
        };
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_payload_tagged_serialization() {
        let payload = MessagePayload::Reply {
            channel: "main".into(),
            reply_to: "msg-1".into(),
            text: "sure".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "reply");

        let back: MessagePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(MessagePriority::Urgent.rank() > MessagePriority::High.rank());
        assert!(MessagePriority::High.rank() > MessagePriority::Normal.rank());
        assert!(MessagePriority::Normal.rank() > MessagePriority::Low.rank());
        assert_eq!(
            MessagePriority::from_rank(MessagePriority::High.rank()).unwrap(),
            MessagePriority::High
        );
        assert!(MessagePriority::from_rank(7).is_err());
    }

    #[test]
    fn test_message_due() {
        let msg = QueuedMessage::new(
            "m-1",
            1_000,
            "tenant-a",
            Platform::Twitch,
            MessagePayload::Chat {
                channel: "main".into(),
                text: "hi".into(),
            },
            MessagePriority::Normal,
            2_000,
            5,
        );
        assert!(!msg.is_due(1_500));
        assert!(msg.is_due(2_000));
        assert!(!msg.is_terminal());
    }
}
