//! Integration tests for the webhook health monitor
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use emailit_common::{ManualClock, Signal};
use emailit_webhook::{
    AlertKind, AlertStore, EmailSendEntry, EmailStatus, FileAlertStore, HealthStatus,
    MemoryAlertStore, MemoryDeliveryLog, MonitorConfig, WebhookEntry, WebhookMonitor,
    WebhookStatus,
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap()
}

fn sent(id: u64, at: DateTime<Utc>) -> EmailSendEntry {
    EmailSendEntry {
        id,
        message_id: format!("em_{id}"),
        recipient: format!("customer{id}@example.com"),
        subject: format!("Order #{id}"),
        status: EmailStatus::Sent,
        sent_at: at,
    }
}

fn webhook(id: u64, message: Option<u64>, status: WebhookStatus, at: DateTime<Utc>) -> WebhookEntry {
    WebhookEntry {
        id,
        message_id: message.map(|m| format!("em_{m}")),
        event_type: "email.delivered".to_string(),
        status,
        received_at: at,
        processed_at: Some(at),
    }
}

struct Harness {
    log: MemoryDeliveryLog,
    clock: Arc<ManualClock>,
    alerts: Arc<dyn AlertStore>,
    monitor: Arc<WebhookMonitor>,
}

fn harness_with(config: MonitorConfig, alerts: Arc<dyn AlertStore>) -> Harness {
    let log = MemoryDeliveryLog::new();
    let clock = Arc::new(ManualClock::new(start()));
    let monitor = Arc::new(WebhookMonitor::with_clock(
        config,
        Arc::new(log.clone()),
        alerts.clone(),
        clock.clone(),
    ));

    Harness {
        log,
        clock,
        alerts,
        monitor,
    }
}

fn harness() -> Harness {
    harness_with(MonitorConfig::default(), Arc::new(MemoryAlertStore::new()))
}

#[tokio::test]
async fn three_unconfirmed_emails_raise_missing_alert() {
    let h = harness();
    for id in 1..=3 {
        h.log.record_email(sent(id, start() - TimeDelta::minutes(45)));
    }

    let snapshot = h.monitor.check().await.unwrap();
    assert_eq!(snapshot.missing_count, 3);
    assert_eq!(snapshot.delayed_count, 0);
    assert_eq!(snapshot.error_count, 0);
    assert_eq!(snapshot.health_score, 70);
    assert_eq!(snapshot.status, HealthStatus::Degraded);

    let alerts = h.monitor.alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::MissingWebhooks);
    assert_eq!(alerts[0].data["count"], 3);
    assert_eq!(alerts[0].data["emails"].as_array().unwrap().len(), 3);
    assert_eq!(alerts[0].timestamp, start());
    assert!(!alerts[0].dismissed);
}

#[tokio::test]
async fn confirmed_emails_are_healthy() {
    let h = harness();
    let sent_at = start() - TimeDelta::minutes(45);
    h.log.record_email(sent(1, sent_at));
    h.log.record_webhook(webhook(
        10,
        Some(1),
        WebhookStatus::Processed,
        sent_at + TimeDelta::seconds(20),
    ));

    let snapshot = h.monitor.check().await.unwrap();
    assert_eq!(snapshot.missing_count, 0);
    assert_eq!(snapshot.health_score, 100);
    assert_eq!(snapshot.status, HealthStatus::Healthy);
    assert_eq!(
        snapshot.last_webhook_timestamp,
        Some(sent_at + TimeDelta::seconds(20))
    );
    assert!(h.monitor.alerts().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_webhooks_raise_error_alert() {
    let h = harness();
    let at = start() - TimeDelta::hours(2);
    h.log.record_webhook(webhook(1, None, WebhookStatus::Failed, at));
    h.log.record_webhook(webhook(2, None, WebhookStatus::Failed, at));
    // Outside the 24 hour window
    h.log.record_webhook(webhook(
        3,
        None,
        WebhookStatus::Failed,
        start() - TimeDelta::hours(30),
    ));

    let snapshot = h.monitor.check().await.unwrap();
    assert_eq!(snapshot.error_count, 2);
    assert_eq!(snapshot.health_score, 70);

    let alerts = h.monitor.alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::WebhookErrors);
    assert_eq!(alerts[0].data["count"], 2);
}

#[tokio::test]
async fn alert_list_keeps_ten_newest() {
    let h = harness();
    h.log.record_webhook(webhook(1, None, WebhookStatus::Failed, start()));

    for _ in 0..12 {
        h.clock.advance(TimeDelta::minutes(1));
        h.monitor.check().await.unwrap();
    }

    let alerts = h.monitor.alerts().await.unwrap();
    assert_eq!(alerts.len(), 10);
    assert_eq!(alerts[0].timestamp, start() + TimeDelta::minutes(3));
    assert_eq!(alerts[9].timestamp, start() + TimeDelta::minutes(12));
}

#[tokio::test]
async fn dismiss_and_clear_alerts() {
    let h = harness();
    h.log.record_webhook(webhook(1, None, WebhookStatus::Failed, start()));
    h.clock.advance(TimeDelta::minutes(1));
    h.monitor.check().await.unwrap();
    h.clock.advance(TimeDelta::minutes(1));
    h.monitor.check().await.unwrap();

    assert!(h.monitor.dismiss_alert(0).await.unwrap());
    assert!(!h.monitor.dismiss_alert(7).await.unwrap());

    let active = h.monitor.active_alerts().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].timestamp, start() + TimeDelta::minutes(2));
    assert_eq!(h.monitor.alerts().await.unwrap().len(), 2);

    h.monitor.clear_alerts().await.unwrap();
    assert!(h.monitor.alerts().await.unwrap().is_empty());
    assert!(h.alerts.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn alerts_survive_in_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webhook_alerts.json");

    let h = harness_with(
        MonitorConfig::default(),
        Arc::new(FileAlertStore::new(&path)),
    );
    h.log.record_email(sent(1, start() - TimeDelta::hours(1)));
    h.monitor.check().await.unwrap();
    h.monitor.dismiss_alert(0).await.unwrap();

    let reopened = FileAlertStore::new(&path);
    let alerts = reopened.load().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::MissingWebhooks);
    assert!(alerts[0].dismissed);
}

#[tokio::test(start_paused = true)]
async fn serve_checks_until_shutdown() {
    let config = MonitorConfig {
        check_interval_secs: 60,
        ..MonitorConfig::default()
    };
    let h = harness_with(config, Arc::new(MemoryAlertStore::new()));
    h.log.record_webhook(webhook(1, None, WebhookStatus::Failed, start()));

    let (tx, rx) = broadcast::channel(1);
    let monitor = h.monitor.clone();
    let handle = tokio::spawn(async move { monitor.serve(rx).await });

    // First tick fires immediately, then once per minute
    tokio::time::sleep(Duration::from_secs(150)).await;
    tx.send(Signal::Shutdown).unwrap();
    handle.await.unwrap();

    assert_eq!(h.monitor.alerts().await.unwrap().len(), 3);
}
