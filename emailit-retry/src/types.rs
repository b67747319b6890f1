//! Retry records and the values passed between scheduler, dispatcher and executor

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Operation, RetryCategory, operation::OperationError};

/// Identifier for a retry record
///
/// ULIDs are lexicographically sortable by creation time, so a listing of
/// record ids is also a listing in scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RetryId {
    id: ulid::Ulid,
}

impl RetryId {
    /// Generate a new unique retry id
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }
}

impl fmt::Display for RetryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retry_{}", self.id)
    }
}

impl FromStr for RetryId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("retry_").unwrap_or(s);
        Ok(Self {
            id: ulid::Ulid::from_string(raw)?,
        })
    }
}

impl Serialize for RetryId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RetryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a retry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    /// Waiting for the dispatcher to fire.
    Pending,
    /// The operation succeeded on this attempt.
    Success,
    /// Retrying was abandoned; `error` holds the last failure.
    Failed,
    /// This attempt failed and a follow-up record (`next_id`) was scheduled.
    Rescheduled,
}

impl RetryStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Rescheduled => "rescheduled",
        })
    }
}

/// Failure details and caller payload carried alongside a retry.
///
/// The hint fields feed the eligibility predicates; `attributes` is opaque to
/// the engine and handed back to the operation handler untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryContext {
    /// HTTP status of the failed response, if one arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    /// The API's `Retry-After` hint (in seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// When the account's sending quota resets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_reset: Option<DateTime<Utc>>,

    /// Last failure message seen for this operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl RetryContext {
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    #[must_use]
    pub const fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    #[must_use]
    pub const fn with_quota_reset(mut self, at: DateTime<Utc>) -> Self {
        self.quota_reset = Some(at);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Fold a newer failure into the context.
    ///
    /// Only the hints the failure actually reports are replaced. A panic or a
    /// bare error leaves the earlier `Retry-After` and quota hints in place.
    pub(crate) fn absorb(&mut self, error: &OperationError) {
        if let Some(status) = error.http_status {
            self.http_status = Some(status);
        }
        if let Some(secs) = error.retry_after_secs {
            self.retry_after_secs = Some(secs);
        }
        if let Some(at) = error.quota_reset {
            self.quota_reset = Some(at);
        }
        self.last_error = Some(error.message.clone());
    }
}

/// A persisted retry attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub id: RetryId,
    pub operation: Operation,
    pub category: RetryCategory,
    pub context: RetryContext,

    /// Number of this attempt; never exceeds the strategy's `max_attempts`.
    pub attempt_count: u32,

    pub status: RetryStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    /// The record whose failure scheduled this one.
    pub previous_id: Option<RetryId>,

    /// The record scheduled when this one failed.
    pub next_id: Option<RetryId>,
}

impl RetryRecord {
    /// The task that runs this record's next attempt.
    #[must_use]
    pub fn task(&self) -> RetryTask {
        RetryTask {
            id: self.id,
            operation: self.operation.clone(),
            context: self.context.clone(),
        }
    }

    pub(crate) fn succeed(&mut self, at: DateTime<Utc>, result: serde_json::Value) {
        self.status = RetryStatus::Success;
        self.completed_at = Some(at);
        self.result = Some(result);
    }

    pub(crate) fn fail(&mut self, at: DateTime<Utc>, error: String) {
        self.status = RetryStatus::Failed;
        self.completed_at = Some(at);
        self.error = Some(error);
    }

    pub(crate) fn reschedule(&mut self, at: DateTime<Utc>, error: String, next: RetryId) {
        self.status = RetryStatus::Rescheduled;
        self.completed_at = Some(at);
        self.error = Some(error);
        self.next_id = Some(next);
    }
}

/// Returned by the scheduler once a retry is persisted and dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub id: RetryId,
    pub scheduled_for: DateTime<Utc>,
    pub delay: Duration,
    pub attempt_count: u32,
}

/// The payload handed to the dispatcher and back to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryTask {
    pub id: RetryId,
    pub operation: Operation,
    pub context: RetryContext,
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
    pub rescheduled: usize,
}

impl RetryStats {
    pub(crate) const fn count(&mut self, status: RetryStatus) {
        self.total += 1;
        match status {
            RetryStatus::Pending => self.pending += 1,
            RetryStatus::Success => self.success += 1,
            RetryStatus::Failed => self.failed += 1,
            RetryStatus::Rescheduled => self.rescheduled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_retry_id_parse() {
        let id = RetryId::generate();
        let printed = id.to_string();
        assert!(printed.starts_with("retry_"));
        assert_eq!(printed.parse::<RetryId>().ok(), Some(id));

        // The bare ULID is accepted too
        assert_eq!(id.ulid().to_string().parse::<RetryId>().ok(), Some(id));

        assert!("retry_not-a-ulid".parse::<RetryId>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!RetryStatus::Pending.is_terminal());
        assert!(RetryStatus::Success.is_terminal());
        assert!(RetryStatus::Failed.is_terminal());
        assert!(RetryStatus::Rescheduled.is_terminal());
    }

    #[test]
    fn test_absorb_replaces_reported_hints() {
        let mut context = RetryContext::default()
            .with_status(429)
            .with_retry_after(30)
            .with_attribute("campaign", serde_json::json!("welcome"));

        let error = OperationError::new("slow down")
            .with_status(503)
            .with_retry_after(90);
        context.absorb(&error);

        assert_eq!(context.http_status, Some(503));
        assert_eq!(context.retry_after_secs, Some(90));
        assert_eq!(context.last_error.as_deref(), Some("slow down"));
        assert_eq!(
            context.attributes.get("campaign"),
            Some(&serde_json::json!("welcome"))
        );
    }

    #[test]
    fn test_absorb_keeps_hints_not_reported() {
        let mut context = RetryContext::default()
            .with_status(429)
            .with_retry_after(120);

        context.absorb(&OperationError::new("handler panicked"));

        assert_eq!(context.http_status, Some(429));
        assert_eq!(context.retry_after_secs, Some(120));
        assert_eq!(context.quota_reset, None);
        assert_eq!(context.last_error.as_deref(), Some("handler panicked"));
    }
}
