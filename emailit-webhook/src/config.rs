//! Monitor configuration

use std::path::PathBuf;

use chrono::Duration;
use serde::Deserialize;

/// Configuration for the webhook health monitor
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Whether Emailit webhooks are enabled for this site
    ///
    /// When disabled, checks are skipped and the health score is 0.
    #[serde(default = "default_webhooks_enabled")]
    pub webhooks_enabled: bool,

    /// How often the checks run (in seconds)
    ///
    /// Default: 3600 seconds (hourly)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Trailing window the checks look at (in hours)
    ///
    /// Default: 24 hours
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    /// A sent email with no webhook after this long counts as missing (in minutes)
    ///
    /// Default: 30 minutes
    #[serde(default = "default_missing_after")]
    pub missing_after_mins: i64,

    /// A webhook processed this long after its email was sent counts as delayed (in minutes)
    ///
    /// Default: 60 minutes
    #[serde(default = "default_delayed_threshold")]
    pub delayed_threshold_mins: i64,

    /// Number of missing webhooks included in reports and alerts
    #[serde(default = "default_missing_report_limit")]
    pub missing_report_limit: usize,

    /// Number of delayed webhooks included in reports
    #[serde(default = "default_delayed_report_limit")]
    pub delayed_report_limit: usize,

    /// Alerts kept before the oldest are evicted
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// Where alerts are persisted; kept in memory when unset
    #[serde(default)]
    pub alert_file: Option<PathBuf>,
}

const fn default_webhooks_enabled() -> bool {
    true
}

const fn default_check_interval() -> u64 {
    3600
}

const fn default_window_hours() -> i64 {
    24
}

const fn default_missing_after() -> i64 {
    30
}

const fn default_delayed_threshold() -> i64 {
    60
}

const fn default_missing_report_limit() -> usize {
    10
}

const fn default_delayed_report_limit() -> usize {
    5
}

const fn default_max_alerts() -> usize {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            webhooks_enabled: default_webhooks_enabled(),
            check_interval_secs: default_check_interval(),
            window_hours: default_window_hours(),
            missing_after_mins: default_missing_after(),
            delayed_threshold_mins: default_delayed_threshold(),
            missing_report_limit: default_missing_report_limit(),
            delayed_report_limit: default_delayed_report_limit(),
            max_alerts: default_max_alerts(),
            alert_file: None,
        }
    }
}

impl MonitorConfig {
    /// Negative values count as zero; values beyond what a duration can hold
    /// saturate, so the window covers every entry.
    #[must_use]
    pub fn window(&self) -> Duration {
        saturating(Duration::try_hours(self.window_hours.max(0)))
    }

    #[must_use]
    pub fn missing_after(&self) -> Duration {
        saturating(Duration::try_minutes(self.missing_after_mins.max(0)))
    }

    #[must_use]
    pub fn delayed_threshold(&self) -> Duration {
        saturating(Duration::try_minutes(self.delayed_threshold_mins.max(0)))
    }
}

fn saturating(duration: Option<Duration>) -> Duration {
    duration.unwrap_or(Duration::MAX)
}
