//! Retry scheduling.
//!
//! [`RetryScheduler::schedule`] decides whether a failed operation gets
//! another attempt and, if so, persists a pending [`RetryRecord`] and hands
//! the task to the dispatcher:
//!
//! ```text
//! strategy = table[category]
//! attempt_count >= max_attempts  → MaxRetriesExceeded
//! !eligible(context, now)        → NotRetryable
//! delay = min(base * mult^attempt_count, max_delay) [* jitter]
//! persist pending record (attempt_count + 1)
//! dispatch(delay, task)
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use emailit_common::{Clock, SystemClock, retry};

use crate::{
    Operation, RetryCategory,
    dispatcher::TaskDispatcher,
    error::RetryError,
    store::RetryStore,
    strategy::{RetryStrategy, StrategyTable},
    types::{RetryContext, RetryId, RetryRecord, RetryStats, RetryStatus, ScheduledRetry},
};

/// Persists retry records and hands them to the dispatcher.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    table: Arc<StrategyTable>,
    store: Arc<dyn RetryStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    clock: Arc<dyn Clock>,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(
        table: Arc<StrategyTable>,
        store: Arc<dyn RetryStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            table,
            store,
            dispatcher,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RetryStore> {
        &self.store
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Schedule a retry of `operation` after a failure in `category`.
    ///
    /// `attempt_count` is the number of retries already made for this
    /// operation (0 for the first failure).
    ///
    /// # Errors
    ///
    /// - [`RetryError::MaxRetriesExceeded`] if no attempts are left
    /// - [`RetryError::NotRetryable`] if the strategy rejects the failure
    /// - [`RetryError::Store`] / [`RetryError::Dispatch`] on infrastructure failure
    pub async fn schedule(
        &self,
        operation: Operation,
        category: RetryCategory,
        context: RetryContext,
        attempt_count: u32,
    ) -> Result<ScheduledRetry, RetryError> {
        self.schedule_after(None, operation, category, context, attempt_count)
            .await
    }

    /// As [`schedule`](Self::schedule), linking the new record to `previous`.
    pub(crate) async fn schedule_after(
        &self,
        previous: Option<RetryId>,
        operation: Operation,
        category: RetryCategory,
        context: RetryContext,
        attempt_count: u32,
    ) -> Result<ScheduledRetry, RetryError> {
        let strategy = self.table.get(category);
        let now = self.clock.now();

        Self::check(strategy, category, &context, attempt_count, now)?;

        let delay_secs = strategy.delay_for(attempt_count);
        let delay = Duration::from_secs(delay_secs);
        let scheduled_for = now
            .checked_add_signed(chrono::Duration::seconds(
                i64::try_from(delay_secs).unwrap_or(i64::MAX),
            ))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let record = RetryRecord {
            id: RetryId::generate(),
            operation,
            category,
            context,
            attempt_count: attempt_count + 1,
            status: RetryStatus::Pending,
            created_at: now,
            scheduled_for,
            completed_at: None,
            result: None,
            error: None,
            previous_id: previous,
            next_id: None,
        };

        self.store.insert(&record).await?;

        if let Err(e) = self.dispatcher.dispatch(delay, record.task()) {
            tracing::error!(
                retry_id = %record.id,
                category = %category,
                error = %e,
                "Failed to dispatch retry"
            );

            let mut record = record;
            record.fail(now, format!("dispatch failed: {e}"));
            self.store.update(&record).await?;

            return Err(e.into());
        }

        tracing::info!(
            retry_id = %record.id,
            operation = %record.operation.kind(),
            category = %category,
            attempt = record.attempt_count,
            remaining = strategy.remaining_attempts(record.attempt_count),
            delay_secs,
            "Retry scheduled"
        );

        Ok(ScheduledRetry {
            id: record.id,
            scheduled_for,
            delay,
            attempt_count: record.attempt_count,
        })
    }

    fn check(
        strategy: &RetryStrategy,
        category: RetryCategory,
        context: &RetryContext,
        attempt_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RetryError> {
        if !strategy.should_retry(attempt_count) {
            tracing::warn!(
                category = %category,
                attempts = attempt_count,
                max_attempts = strategy.max_attempts,
                "Maximum retries exceeded"
            );
            return Err(RetryError::MaxRetriesExceeded {
                category,
                attempts: attempt_count,
                max_attempts: strategy.max_attempts,
            });
        }

        strategy.eligibility.check(context, now).map_err(|reason| {
            tracing::info!(category = %category, reason = %reason, "Failure is not retryable");
            RetryError::NotRetryable { category, reason }
        })
    }

    /// Hand every pending record back to the dispatcher.
    ///
    /// Dispatched delays do not outlive the process, so this runs on start.
    /// Overdue records are dispatched with no delay, the rest keep their
    /// original `scheduled_for`. Returns how many records were dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the dispatcher is
    /// closed. Records not yet dispatched stay pending.
    pub async fn recover_pending(&self) -> Result<usize, RetryError> {
        let now = self.clock.now();
        let mut recovered = 0;

        for record in self.store.list().await? {
            if record.status != RetryStatus::Pending {
                continue;
            }

            let delay = record
                .scheduled_for
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::ZERO);

            self.dispatcher.dispatch(delay, record.task())?;
            retry!(
                "Recovered pending retry {} due in {}s",
                record.id,
                delay.as_secs()
            );
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(recovered, "Recovered pending retries");
        }

        Ok(recovered)
    }

    /// Record counts per status.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn stats(&self) -> Result<RetryStats, RetryError> {
        Ok(self.store.stats().await?)
    }

    /// Delete terminal records completed more than `retention` ago.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    pub async fn cleanup(&self, retention: chrono::Duration) -> Result<usize, RetryError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.delete_completed_before(cutoff).await?;

        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "Cleaned up old retry records");
        } else {
            retry!("No retry records completed before {cutoff}");
        }

        Ok(removed)
    }
}
