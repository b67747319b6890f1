//! Retryable operations and their handlers.
//!
//! A retry record cannot hold a function pointer, so each retryable action is
//! an [`Operation`] variant carrying its own payload. The executor looks up
//! the [`OperationHandler`] registered for the operation's [`OperationKind`]
//! in an [`OperationRegistry`] and runs it.

use std::{collections::BTreeMap, fmt, sync::Arc};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RetryCategory, types::RetryContext};

/// An outgoing message as handed to the Emailit send endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Something the engine knows how to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A transactional email sent through WordPress mail.
    SendEmail(EmailMessage),

    /// A newsletter message handed over by MailPoet.
    #[serde(rename = "mailpoet_send")]
    MailPoetSend {
        subscriber_id: Option<u64>,
        message: EmailMessage,
    },

    /// Re-run processing of a stored webhook event.
    ProcessWebhook { webhook_id: String },
}

impl Operation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::SendEmail(_) => OperationKind::SendEmail,
            Self::MailPoetSend { .. } => OperationKind::MailPoetSend,
            Self::ProcessWebhook { .. } => OperationKind::ProcessWebhook,
        }
    }
}

/// Discriminant of [`Operation`], used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    SendEmail,
    #[serde(rename = "mailpoet_send")]
    MailPoetSend,
    ProcessWebhook,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SendEmail => "send_email",
            Self::MailPoetSend => "mailpoet_send",
            Self::ProcessWebhook => "process_webhook",
        })
    }
}

/// A failed operation attempt, as reported by its handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,

    /// Category of the failure, if the handler could tell.
    ///
    /// When absent the category is derived from `http_status`, and failing
    /// that the record's previous category is kept.
    pub category: Option<RetryCategory>,

    pub http_status: Option<u16>,
    pub retry_after_secs: Option<u64>,
    pub quota_reset: Option<DateTime<Utc>>,
}

impl OperationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: None,
            http_status: None,
            retry_after_secs: None,
            quota_reset: None,
        }
    }

    #[must_use]
    pub const fn with_category(mut self, category: RetryCategory) -> Self {
        self.category = Some(category);
        self
    }

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

    /// Category to schedule the next attempt under.
    #[must_use]
    pub fn resolve_category(&self, previous: RetryCategory) -> RetryCategory {
        self.category
            .or_else(|| {
                self.http_status
                    .map(|status| RetryCategory::classify(Some(status), None))
            })
            .unwrap_or(previous)
    }
}

/// Performs one attempt of an operation.
///
/// Handlers return the API response (or any JSON summary of the outcome) on
/// success, which is stored on the retry record.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn run(
        &self,
        operation: &Operation,
        context: &RetryContext,
    ) -> Result<serde_json::Value, OperationError>;
}

/// Typed dispatch table from [`OperationKind`] to handler.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    handlers: AHashMap<OperationKind, Arc<dyn OperationHandler>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous handler.
    pub fn register(&mut self, kind: OperationKind, handler: Arc<dyn OperationHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::debug!(%kind, "Replaced operation handler");
        }
    }

    #[must_use]
    pub fn with_handler(mut self, kind: OperationKind, handler: Arc<dyn OperationHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    #[must_use]
    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&kind).cloned()
    }

    #[must_use]
    pub fn contains(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct Echo;

    #[async_trait]
    impl OperationHandler for Echo {
        async fn run(
            &self,
            operation: &Operation,
            _context: &RetryContext,
        ) -> Result<serde_json::Value, OperationError> {
            Ok(serde_json::json!({ "kind": operation.kind().to_string() }))
        }
    }

    #[test]
    fn test_operation_kind() {
        let op = Operation::SendEmail(EmailMessage::default());
        assert_eq!(op.kind(), OperationKind::SendEmail);

        let op = Operation::ProcessWebhook {
            webhook_id: "wh_1".to_string(),
        };
        assert_eq!(op.kind(), OperationKind::ProcessWebhook);
    }

    #[test]
    fn test_operation_serialises_kind_and_payload() {
        let op = Operation::MailPoetSend {
            subscriber_id: Some(42),
            message: EmailMessage {
                from: "news@example.com".to_string(),
                to: vec!["reader@example.org".to_string()],
                subject: "Issue 7".to_string(),
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&op).unwrap_or_default();
        assert_eq!(json["mailpoet_send"]["subscriber_id"], 42);

        let back: Option<Operation> = serde_json::from_value(json).ok();
        assert_eq!(back, Some(op));
    }

    #[test]
    fn test_serialised_tags_match_kind_names() {
        let operations = [
            Operation::SendEmail(EmailMessage::default()),
            Operation::MailPoetSend {
                subscriber_id: None,
                message: EmailMessage::default(),
            },
            Operation::ProcessWebhook {
                webhook_id: "wh_1".to_string(),
            },
        ];

        for op in operations {
            let kind = op.kind();
            let json = serde_json::to_value(&op).unwrap_or_default();
            let tag = json
                .as_object()
                .and_then(|fields| fields.keys().next().cloned());
            assert_eq!(tag, Some(kind.to_string()));
            assert_eq!(
                serde_json::to_value(kind).unwrap_or_default(),
                serde_json::json!(kind.to_string())
            );
        }
    }

    #[test]
    fn test_resolve_category() {
        let error = OperationError::new("boom");
        assert_eq!(
            error.resolve_category(RetryCategory::Timeout),
            RetryCategory::Timeout
        );

        let error = OperationError::new("busy").with_status(503);
        assert_eq!(
            error.resolve_category(RetryCategory::Timeout),
            RetryCategory::ServerError
        );

        let error = OperationError::new("slow down")
            .with_status(503)
            .with_category(RetryCategory::RateLimit);
        assert_eq!(
            error.resolve_category(RetryCategory::Timeout),
            RetryCategory::RateLimit
        );
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = OperationRegistry::new().with_handler(OperationKind::SendEmail, Arc::new(Echo));

        assert!(registry.contains(OperationKind::SendEmail));
        assert!(registry.get(OperationKind::MailPoetSend).is_none());

        let handler = registry.get(OperationKind::SendEmail);
        let op = Operation::SendEmail(EmailMessage::default());
        let result = match handler {
            Some(handler) => handler.run(&op, &RetryContext::default()).await.ok(),
            None => None,
        };
        assert_eq!(result, Some(serde_json::json!({ "kind": "send_email" })));
    }
}
