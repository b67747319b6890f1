//! The hourly webhook health check

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use emailit_common::{Clock, Signal, SystemClock, internal, webhook};
use serde_json::json;
use tokio::sync::broadcast;

use crate::{
    alert::{AlertKind, AlertLog, AlertStore, FileAlertStore, MemoryAlertStore, WebhookAlert},
    config::MonitorConfig,
    error::Result,
    health::{
        DelayedWebhook, HealthStatus, MissingWebhook, WebhookHealthSnapshot, health_score,
    },
    log::{DeliveryLogSource, EmailStatus, WebhookEntry, WebhookStatus},
};

/// Compares the email send log against the webhook log and raises alerts
/// when webhooks stop arriving.
#[derive(Debug)]
pub struct WebhookMonitor {
    config: MonitorConfig,
    source: Arc<dyn DeliveryLogSource>,
    alerts: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
}

impl WebhookMonitor {
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn DeliveryLogSource>,
        alerts: Arc<dyn AlertStore>,
    ) -> Self {
        Self::with_clock(config, source, alerts, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        config: MonitorConfig,
        source: Arc<dyn DeliveryLogSource>,
        alerts: Arc<dyn AlertStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            source,
            alerts,
            clock,
        }
    }

    /// Build a monitor whose alerts go to `config.alert_file`, or stay in
    /// memory when no file is configured.
    #[must_use]
    pub fn from_config(config: MonitorConfig, source: Arc<dyn DeliveryLogSource>) -> Self {
        let alerts: Arc<dyn AlertStore> = match &config.alert_file {
            Some(path) => Arc::new(FileAlertStore::new(path.clone())),
            None => Arc::new(MemoryAlertStore::new()),
        };
        Self::new(config, source, alerts)
    }

    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run all three checks, record any alerts, and score the result.
    ///
    /// # Errors
    ///
    /// If the delivery log cannot be read or the alerts cannot be persisted.
    pub async fn check(&self) -> Result<WebhookHealthSnapshot> {
        let now = self.clock.now();

        if !self.config.webhooks_enabled {
            webhook!(level = DEBUG, "Webhooks are disabled, skipping health checks");
            return Ok(WebhookHealthSnapshot::disabled(now));
        }

        let window_start = earlier(now, self.config.window());
        let webhooks = self.source.webhooks_received_since(window_start).await?;

        let (missing_count, missing) = self.missing_webhooks(now, &webhooks).await?;
        let (delayed_count, delayed) = self.delayed_webhooks(&webhooks).await?;
        let error_count = webhooks
            .iter()
            .filter(|webhook| webhook.status == WebhookStatus::Failed)
            .count();

        let mut raised = Vec::new();

        if missing_count > 0 {
            tracing::warn!(
                count = missing_count,
                "Emails sent more than {} minutes ago have no webhook",
                self.config.missing_after_mins
            );
            raised.push(WebhookAlert::new(
                AlertKind::MissingWebhooks,
                format!(
                    "{missing_count} emails have not received a webhook within {} minutes of sending",
                    self.config.missing_after_mins
                ),
                json!({ "count": missing_count, "emails": missing }),
                now,
            ));
        }

        if delayed_count > 0 {
            tracing::warn!(
                count = delayed_count,
                worst_delay_minutes = delayed.first().map_or(0, |row| row.delay_minutes),
                "Webhooks arrived more than {} minutes after sending",
                self.config.delayed_threshold_mins
            );
        }

        if error_count > 0 {
            tracing::warn!(count = error_count, "Webhooks failed processing");
            raised.push(WebhookAlert::new(
                AlertKind::WebhookErrors,
                format!(
                    "{error_count} webhooks failed processing in the last {} hours",
                    self.config.window_hours
                ),
                json!({ "count": error_count }),
                now,
            ));
        }

        if !raised.is_empty() {
            self.record_alerts(raised).await?;
        }

        let health_score = health_score(missing_count, delayed_count, error_count, true);
        let snapshot = WebhookHealthSnapshot {
            missing_count,
            delayed_count,
            error_count,
            health_score,
            status: HealthStatus::from_score(health_score, true),
            last_webhook_timestamp: self.source.last_webhook_at().await?,
            checked_at: now,
            missing,
            delayed,
        };

        tracing::info!(
            score = snapshot.health_score,
            status = ?snapshot.status,
            missing = missing_count,
            delayed = delayed_count,
            errors = error_count,
            "Webhook health check complete"
        );

        Ok(snapshot)
    }

    /// Sent emails older than the grace period with no webhook in the window.
    async fn missing_webhooks(
        &self,
        now: DateTime<Utc>,
        webhooks: &[WebhookEntry],
    ) -> Result<(usize, Vec<MissingWebhook>)> {
        let seen: HashSet<&str> = webhooks
            .iter()
            .filter_map(|webhook| webhook.message_id.as_deref())
            .collect();

        let mut missing: Vec<MissingWebhook> = self
            .source
            .emails_sent_between(
                earlier(now, self.config.window()),
                earlier(now, self.config.missing_after()),
            )
            .await?
            .into_iter()
            .filter(|email| email.status == EmailStatus::Sent)
            .filter(|email| !seen.contains(email.message_id.as_str()))
            .map(|email| MissingWebhook {
                email_id: email.id,
                message_id: email.message_id,
                recipient: email.recipient,
                subject: email.subject,
                sent_at: email.sent_at,
            })
            .collect();

        let count = missing.len();
        missing.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        missing.truncate(self.config.missing_report_limit);

        Ok((count, missing))
    }

    /// Webhooks handled long after their email was sent.
    async fn delayed_webhooks(
        &self,
        webhooks: &[WebhookEntry],
    ) -> Result<(usize, Vec<DelayedWebhook>)> {
        let message_ids: Vec<String> = webhooks
            .iter()
            .filter_map(|webhook| webhook.message_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if message_ids.is_empty() {
            return Ok((0, Vec::new()));
        }

        let sent_at: HashMap<String, DateTime<Utc>> = self
            .source
            .emails_for_messages(&message_ids)
            .await?
            .into_iter()
            .map(|email| (email.message_id, email.sent_at))
            .collect();

        let threshold = self.config.delayed_threshold();
        let mut delayed: Vec<DelayedWebhook> = webhooks
            .iter()
            .filter_map(|webhook| {
                let message_id = webhook.message_id.as_ref()?;
                let sent_at = *sent_at.get(message_id)?;
                let processed_at = webhook.handled_at();
                let delay = processed_at - sent_at;

                (delay > threshold).then(|| DelayedWebhook {
                    webhook_id: webhook.id,
                    message_id: message_id.clone(),
                    event_type: webhook.event_type.clone(),
                    sent_at,
                    processed_at,
                    delay_minutes: delay.num_minutes(),
                })
            })
            .collect();

        let count = delayed.len();
        delayed.sort_by(|a, b| {
            (b.processed_at - b.sent_at).cmp(&(a.processed_at - a.sent_at))
        });
        delayed.truncate(self.config.delayed_report_limit);

        Ok((count, delayed))
    }

    async fn load_alerts(&self) -> Result<AlertLog> {
        Ok(AlertLog::from_alerts(
            self.alerts.load().await?,
            self.config.max_alerts,
        ))
    }

    async fn record_alerts(&self, raised: Vec<WebhookAlert>) -> Result<()> {
        let mut log = self.load_alerts().await?;
        for alert in raised {
            internal!(level = DEBUG, "Recording {} alert", alert.kind);
            if let Some(evicted) = log.push(alert) {
                tracing::debug!(kind = %evicted.kind, "Evicted oldest webhook alert");
            }
        }
        self.alerts.save(log.as_slice()).await
    }

    /// Every stored alert, oldest first.
    ///
    /// # Errors
    ///
    /// If the alert store cannot be read.
    pub async fn alerts(&self) -> Result<Vec<WebhookAlert>> {
        Ok(self.load_alerts().await?.as_slice().to_vec())
    }

    /// Alerts not yet dismissed, oldest first.
    ///
    /// # Errors
    ///
    /// If the alert store cannot be read.
    pub async fn active_alerts(&self) -> Result<Vec<WebhookAlert>> {
        Ok(self.load_alerts().await?.active())
    }

    /// Dismiss the alert at `index` (as returned by [`Self::alerts`]).
    ///
    /// Returns `false` if there is no such alert.
    ///
    /// # Errors
    ///
    /// If the alert store cannot be read or written.
    pub async fn dismiss_alert(&self, index: usize) -> Result<bool> {
        let mut log = self.load_alerts().await?;
        if !log.dismiss(index) {
            return Ok(false);
        }
        self.alerts.save(log.as_slice()).await?;
        Ok(true)
    }

    /// # Errors
    ///
    /// If the alert store cannot be written.
    pub async fn clear_alerts(&self) -> Result<()> {
        self.alerts.save(&[]).await
    }

    /// Run [`Self::check`] every `check_interval_secs` until shutdown.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(level = INFO, "Webhook monitor starting");

        let period = Duration::from_secs(self.config.check_interval_secs.max(1));
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.check().await {
                        Ok(snapshot) if snapshot.is_healthy() => {
                            tracing::debug!(score = snapshot.health_score, "Webhooks healthy");
                        }
                        Ok(snapshot) => {
                            tracing::warn!(
                                score = snapshot.health_score,
                                status = ?snapshot.status,
                                "Webhook delivery is not healthy"
                            );
                        }
                        Err(e) => {
                            tracing::error!("Error checking webhook health: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Webhook monitor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Webhook monitor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Webhook monitor shutdown complete");
    }
}

fn earlier(now: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
