//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbox item - one queued side-effect delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    /// Key into the rate limit table (e.g. "slack", "twilio").
    pub integration_id: String,
    /// Provider-specific verb, opaque to the dispatcher.
    pub operation: String,
    /// Serialized JSON passed through to the provider sender untouched.
    pub payload: String,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    /// Admission gate: eligible from queued/failed only once now >= this.
    pub next_attempt_at: DateTime<Utc>,
    /// Throttle gate: eligible to leave throttled only once now >= this.
    pub retry_after_until: Option<DateTime<Utc>>,
    pub retry_after_seconds: Option<i64>,
    pub rate_limited_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whether the most recent failure was server-class (5xx or network).
    pub critical_error: bool,
    /// Dead-letter items with this flag set may be re-queued by backfill.
    pub backfill_eligible: bool,
    /// Provider success payload, set only on sent. JSON.
    pub provider_response_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outbox item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Queued,
    Throttled,
    Failed,
    Sent,
    DeadLetter,
}

impl Default for OutboxStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Throttled => "throttled",
            Self::Failed => "failed",
            Self::Sent => "sent",
            Self::DeadLetter => "dead_letter",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "throttled" => Self::Throttled,
            "failed" => Self::Failed,
            "sent" => Self::Sent,
            "dead_letter" => Self::DeadLetter,
            _ => Self::Queued,
        }
    }
}

/// New outbox item for insertion.
///
/// Items start queued with zero attempts and an immediately-elapsed
/// admission gate; every other column is managed by the dispatcher.
#[derive(Debug, Clone)]
pub struct NewOutboxItem {
    pub id: String,
    pub integration_id: String,
    pub operation: String,
    pub payload: String,
}

/// Per-status item totals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub throttled: i64,
    pub failed: i64,
    pub sent: i64,
    pub dead_letter: i64,
}

impl StatusCounts {
    /// Total items across all statuses.
    pub fn total(&self) -> i64 {
        self.queued + self.throttled + self.failed + self.sent + self.dead_letter
    }
}
