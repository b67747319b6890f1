use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::Context;
use emailit_common::{LogConfig, Signal, internal, logging};
use emailit_retry::{
    OperationRegistry, RetryConfig, RetryExecutor, RetryRunner, RetryScheduler, RetryStore,
    StrategyTable, TokioDispatcher,
};
use emailit_webhook::{DeliveryLogSource, MonitorConfig, WebhookMonitor};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top-level configuration, read from `emailit.config.ron`.
#[derive(Debug, Default, Deserialize)]
pub struct Emailit {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(alias = "webhooks", default)]
    pub monitor: MonitorConfig,
}

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "EMAILIT_CONFIG";

/// Where [`Emailit::load`] looks when [`CONFIG_ENV`] is unset, in order.
pub const CONFIG_PATHS: [&str; 2] = ["./emailit.config.ron", "/etc/emailit/emailit.config.ron"];

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| anyhow::anyhow!("Unable to broadcast shutdown: {e}"))?;

    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forcing shutdown");

    Ok(())
}

/// The long-running pieces built from an [`Emailit`] configuration.
#[derive(Debug)]
pub struct Services {
    /// Entry point for scheduling retries of failed operations.
    pub scheduler: Arc<RetryScheduler>,
    pub monitor: Arc<WebhookMonitor>,
    runner: RetryRunner,
    maintenance: Maintenance,
}

impl Services {
    /// Run the retry runner, the webhook monitor and retry record clean-up
    /// until `shutdown` broadcasts.
    ///
    /// Pending records already in the store are dispatched again first.
    pub async fn serve(self, shutdown: &broadcast::Sender<Signal>) {
        match self.scheduler.recover_pending().await {
            Ok(0) => {}
            Ok(recovered) => {
                internal!(level = INFO, "Re-dispatched {recovered} pending retries");
            }
            Err(e) => tracing::error!("Error recovering pending retries: {e}"),
        }

        let monitor = self.monitor.clone();

        tokio::join!(
            self.runner.serve(shutdown.subscribe()),
            monitor.serve(shutdown.subscribe()),
            self.maintenance.serve(shutdown.subscribe()),
        );
    }
}

/// Periodic removal of settled retry records.
#[derive(Debug)]
struct Maintenance {
    scheduler: Arc<RetryScheduler>,
    interval: Duration,
    retention: chrono::Duration,
}

impl Maintenance {
    async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) {
        let mut timer = tokio::time::interval(self.interval);

        // Skip the first tick to avoid immediate execution
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.scheduler.cleanup(self.retention).await {
                        Ok(removed) => {
                            tracing::debug!("Retry clean-up removed {removed} records");
                        }
                        Err(e) => {
                            tracing::error!("Error cleaning up retry records: {e}");
                        }
                    }

                    match self.scheduler.stats().await {
                        Ok(stats) => tracing::info!(
                            pending = stats.pending,
                            success = stats.success,
                            failed = stats.failed,
                            rescheduled = stats.rescheduled,
                            "Retry statistics"
                        ),
                        Err(e) => tracing::error!("Error reading retry statistics: {e}"),
                    }
                }
                _ = shutdown.recv() => {
                    internal!(level = INFO, "Retry maintenance stopping");
                    break;
                }
            }
        }
    }
}

impl Emailit {
    /// # Errors
    ///
    /// If `content` is not a valid configuration.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// # Errors
    ///
    /// If `path` cannot be read or does not hold a valid configuration.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_ron(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Load the configuration named by [`CONFIG_ENV`], or else the first of
    /// [`CONFIG_PATHS`] that exists.
    ///
    /// # Errors
    ///
    /// If no configuration file is found, or the one found is invalid.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => first_existing(CONFIG_PATHS.iter().map(PathBuf::from)).with_context(|| {
                format!(
                    "No configuration file found. Set {CONFIG_ENV} or create one of: {}",
                    CONFIG_PATHS.join(", ")
                )
            })?,
        };

        Self::from_file(&path)
    }

    /// Build the services, without starting them.
    ///
    /// `registry` supplies the handlers that re-run failed operations, and
    /// `store` is where retry records are kept. `source` is where the monitor
    /// reads the email and webhook logs from.
    #[must_use]
    pub fn services(
        &self,
        registry: OperationRegistry,
        store: Arc<dyn RetryStore>,
        source: Arc<dyn DeliveryLogSource>,
    ) -> Services {
        let table = Arc::new(StrategyTable::from_config(&self.retry));
        let (dispatcher, receiver) = TokioDispatcher::channel();
        let scheduler = Arc::new(RetryScheduler::new(table, store, Arc::new(dispatcher)));

        let executor = RetryExecutor::new(scheduler.clone(), Arc::new(registry));
        let retention_days = i64::try_from(self.retry.retention_days).unwrap_or(i64::MAX);

        Services {
            scheduler: scheduler.clone(),
            monitor: Arc::new(WebhookMonitor::from_config(self.monitor.clone(), source)),
            runner: RetryRunner::new(executor, receiver),
            maintenance: Maintenance {
                scheduler,
                interval: Duration::from_secs(self.retry.cleanup_interval_secs.max(1)),
                retention: chrono::Duration::try_days(retention_days)
                    .unwrap_or(chrono::Duration::MAX),
            },
        }
    }

    /// Run everything this configuration describes until a shutdown signal.
    ///
    /// # Errors
    ///
    /// If the signal handlers cannot be installed.
    pub async fn run(
        self,
        registry: OperationRegistry,
        store: Arc<dyn RetryStore>,
        source: Arc<dyn DeliveryLogSource>,
    ) -> anyhow::Result<()> {
        logging::init(&self.log);

        internal!("Controller running");

        if registry.is_empty() {
            tracing::warn!("No operation handlers registered, every retry will fail");
        }

        let services = self.services(registry, store, source);

        let ret = tokio::select! {
            () = services.serve(&SHUTDOWN_BROADCAST) => {
                Ok(())
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_first_existing_skips_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("emailit.config.ron");
        std::fs::write(&present, "Emailit()").unwrap();

        let found = first_existing([
            dir.path().join("missing.ron"),
            dir.path().to_path_buf(),
            present.clone(),
        ]);
        assert_eq!(found, Some(present));

        assert_eq!(first_existing([dir.path().join("missing.ron")]), None);
    }
}
