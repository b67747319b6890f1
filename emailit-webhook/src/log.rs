//! The two delivery log tables the monitor reads.
//!
//! `email_send_log` holds one row per message handed to Emailit;
//! `webhook_log` holds one row per delivery-status webhook received back.
//! Rows are correlated by the Emailit message id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Send status of an email log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
}

/// A row of `email_send_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSendEntry {
    pub id: u64,
    /// Emailit's id for the message, used to correlate webhooks.
    pub message_id: String,
    pub recipient: String,
    pub subject: String,
    pub status: EmailStatus,
    pub sent_at: DateTime<Utc>,
}

/// Processing status of a webhook log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Processed,
    Failed,
}

/// A row of `webhook_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEntry {
    pub id: u64,
    /// Message the event refers to; absent for account-level events.
    pub message_id: Option<String>,
    pub event_type: String,
    pub status: WebhookStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEntry {
    /// When the event was processed, or received if processing never finished.
    #[must_use]
    pub fn handled_at(&self) -> DateTime<Utc> {
        self.processed_at.unwrap_or(self.received_at)
    }
}

/// Read access to the delivery log tables.
#[async_trait]
pub trait DeliveryLogSource: Send + Sync + std::fmt::Debug {
    /// Emails with `sent_at` in `[from, to)`.
    async fn emails_sent_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EmailSendEntry>>;

    /// Emails with any of the given message ids.
    async fn emails_for_messages(&self, message_ids: &[String]) -> Result<Vec<EmailSendEntry>>;

    /// Webhooks with `received_at >= since`.
    async fn webhooks_received_since(&self, since: DateTime<Utc>) -> Result<Vec<WebhookEntry>>;

    /// The most recent `received_at` across all webhooks.
    async fn last_webhook_at(&self) -> Result<Option<DateTime<Utc>>>;
}

/// In-memory delivery log
#[derive(Debug, Clone, Default)]
pub struct MemoryDeliveryLog {
    emails: Arc<RwLock<Vec<EmailSendEntry>>>,
    webhooks: Arc<RwLock<Vec<WebhookEntry>>>,
}

impl MemoryDeliveryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_email(&self, entry: EmailSendEntry) {
        self.emails.write().push(entry);
    }

    pub fn record_webhook(&self, entry: WebhookEntry) {
        self.webhooks.write().push(entry);
    }
}

#[async_trait]
impl DeliveryLogSource for MemoryDeliveryLog {
    async fn emails_sent_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EmailSendEntry>> {
        Ok(self
            .emails
            .read()
            .iter()
            .filter(|email| email.sent_at >= from && email.sent_at < to)
            .cloned()
            .collect())
    }

    async fn emails_for_messages(&self, message_ids: &[String]) -> Result<Vec<EmailSendEntry>> {
        Ok(self
            .emails
            .read()
            .iter()
            .filter(|email| message_ids.contains(&email.message_id))
            .cloned()
            .collect())
    }

    async fn webhooks_received_since(&self, since: DateTime<Utc>) -> Result<Vec<WebhookEntry>> {
        Ok(self
            .webhooks
            .read()
            .iter()
            .filter(|webhook| webhook.received_at >= since)
            .cloned()
            .collect())
    }

    async fn last_webhook_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .webhooks
            .read()
            .iter()
            .map(|webhook| webhook.received_at)
            .max())
    }
}
