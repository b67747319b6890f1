//! Webhook delivery health monitoring.
//!
//! Emailit reports delivery status back through webhooks. The
//! [`WebhookMonitor`] periodically compares the email send log against the
//! webhook log to find emails whose webhook never arrived, webhooks that
//! arrived late, and webhooks that failed processing, and keeps a short list
//! of alerts for the site administrator.

pub mod alert;
pub mod config;
pub mod error;
pub mod health;
pub mod log;
pub mod monitor;

pub use alert::{AlertKind, AlertLog, AlertStore, FileAlertStore, MemoryAlertStore, WebhookAlert};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use health::{
    DelayedWebhook, HealthStatus, MissingWebhook, WebhookHealthSnapshot, health_score,
};
pub use log::{
    DeliveryLogSource, EmailSendEntry, EmailStatus, MemoryDeliveryLog, WebhookEntry,
    WebhookStatus,
};
pub use monitor::WebhookMonitor;
