//! Bounded alert log and its persistence

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    MissingWebhooks,
    WebhookErrors,
}

impl AlertKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingWebhooks => "missing_webhooks",
            Self::WebhookErrors => "webhook_errors",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert, shown to the site administrator until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub dismissed: bool,
}

impl WebhookAlert {
    #[must_use]
    pub fn new(kind: AlertKind, message: impl Into<String>, data: Value, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            data,
            timestamp: now,
            dismissed: false,
        }
    }
}

/// Alerts in the order they were raised, capped at `capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertLog {
    alerts: Vec<WebhookAlert>,
    capacity: usize,
}

impl AlertLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::from_alerts(Vec::new(), capacity)
    }

    /// Wrap previously persisted alerts, dropping the oldest beyond `capacity`.
    #[must_use]
    pub fn from_alerts(mut alerts: Vec<WebhookAlert>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        if alerts.len() > capacity {
            alerts.drain(..alerts.len() - capacity);
        }
        Self { alerts, capacity }
    }

    /// Append an alert, evicting the oldest once full.
    ///
    /// Returns the evicted alert, if any.
    pub fn push(&mut self, alert: WebhookAlert) -> Option<WebhookAlert> {
        let evicted = if self.alerts.len() >= self.capacity {
            Some(self.alerts.remove(0))
        } else {
            None
        };
        self.alerts.push(alert);
        evicted
    }

    /// Mark the alert at `index` dismissed. Returns `false` if out of range.
    pub fn dismiss(&mut self, index: usize) -> bool {
        self.alerts.get_mut(index).is_some_and(|alert| {
            alert.dismissed = true;
            true
        })
    }

    #[must_use]
    pub fn active(&self) -> Vec<WebhookAlert> {
        self.alerts
            .iter()
            .filter(|alert| !alert.dismissed)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[WebhookAlert] {
        &self.alerts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Persists the alert list as a single value.
#[async_trait]
pub trait AlertStore: Send + Sync + fmt::Debug {
    /// Load the stored alerts; an absent value is an empty list.
    async fn load(&self) -> Result<Vec<WebhookAlert>>;

    /// Replace the stored alerts.
    async fn save(&self, alerts: &[WebhookAlert]) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAlertStore {
    alerts: Arc<Mutex<Vec<WebhookAlert>>>,
}

impl MemoryAlertStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn load(&self) -> Result<Vec<WebhookAlert>> {
        Ok(self.alerts.lock().clone())
    }

    async fn save(&self, alerts: &[WebhookAlert]) -> Result<()> {
        *self.alerts.lock() = alerts.to_vec();
        Ok(())
    }
}

/// Stores the alert list as a JSON array in a single file.
#[derive(Debug, Clone)]
pub struct FileAlertStore {
    path: PathBuf,
}

impl FileAlertStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AlertStore for FileAlertStore {
    async fn load(&self) -> Result<Vec<WebhookAlert>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, alerts: &[WebhookAlert]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic replace
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, serde_json::to_vec_pretty(alerts)?).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}
