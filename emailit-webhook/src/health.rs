//! Health score and the per-cycle snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;

const MISSING_PENALTY: u32 = 10;
const MISSING_PENALTY_CAP: u32 = 50;
const DELAYED_PENALTY: u32 = 5;
const DELAYED_PENALTY_CAP: u32 = 25;
const ERROR_PENALTY: u32 = 15;
const ERROR_PENALTY_CAP: u32 = 30;

/// Score the webhook pipeline from 0 (broken or disabled) to 100.
///
/// Each class of problem costs a fixed amount per occurrence, capped per
/// class; the result is clamped to `[0, 100]`.
#[must_use]
pub fn health_score(missing: usize, delayed: usize, errors: usize, webhooks_enabled: bool) -> u8 {
    if !webhooks_enabled {
        return 0;
    }

    let penalty = |count: usize, per: u32, cap: u32| {
        u32::try_from(count)
            .unwrap_or(u32::MAX)
            .saturating_mul(per)
            .min(cap)
    };

    let deductions = penalty(missing, MISSING_PENALTY, MISSING_PENALTY_CAP)
        + penalty(delayed, DELAYED_PENALTY, DELAYED_PENALTY_CAP)
        + penalty(errors, ERROR_PENALTY, ERROR_PENALTY_CAP);

    u8::try_from(100u32.saturating_sub(deductions)).unwrap_or(0)
}

/// Coarse reading of the health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Disabled,
}

impl HealthStatus {
    #[must_use]
    pub const fn from_score(score: u8, webhooks_enabled: bool) -> Self {
        if !webhooks_enabled {
            Self::Disabled
        } else if score >= 80 {
            Self::Healthy
        } else if score >= 50 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

/// A sent email still waiting for its first webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingWebhook {
    pub email_id: u64,
    pub message_id: String,
    pub recipient: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

/// A webhook that arrived long after its email was sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelayedWebhook {
    pub webhook_id: u64,
    pub message_id: String,
    pub event_type: String,
    pub sent_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub delay_minutes: i64,
}

/// Result of one monitoring cycle
#[derive(Debug, Clone, Serialize)]
pub struct WebhookHealthSnapshot {
    pub missing_count: usize,
    pub delayed_count: usize,
    pub error_count: usize,
    pub health_score: u8,
    pub status: HealthStatus,
    pub last_webhook_timestamp: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,

    /// Newest first, truncated to the configured report limit
    pub missing: Vec<MissingWebhook>,

    /// Largest delay first, truncated to the configured report limit
    pub delayed: Vec<DelayedWebhook>,
}

impl WebhookHealthSnapshot {
    /// Snapshot for a site with webhooks turned off.
    #[must_use]
    pub const fn disabled(checked_at: DateTime<Utc>) -> Self {
        Self {
            missing_count: 0,
            delayed_count: 0,
            error_count: 0,
            health_score: 0,
            status: HealthStatus::Disabled,
            last_webhook_timestamp: None,
            checked_at,
            missing: Vec::new(),
            delayed: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
