//! Retry execution.
//!
//! Invoked when a dispatched [`RetryTask`] becomes due. The executor re-runs
//! the operation through its registered handler and settles the record:
//!
//! - success → `success`, result stored
//! - failure, scheduler accepts another attempt → `rescheduled`, linked to
//!   the new pending record via `next_id`
//! - failure, scheduler refuses → `failed`, last error stored
//! - failure, store unavailable → error returned, record left `pending`
//!
//! A handler panic is caught and treated as a failure. Tasks whose record is
//! missing or already settled are skipped without touching the store, so a
//! duplicate delivery of the same task is harmless.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;

use crate::{
    error::RetryError,
    operation::{OperationError, OperationRegistry},
    scheduler::RetryScheduler,
    types::{RetryRecord, RetryStatus, RetryTask, ScheduledRetry},
};

/// What an execution did to the record it was handed.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The operation succeeded; the record is `success`.
    Succeeded,

    /// The operation failed and another attempt was scheduled.
    Rescheduled(ScheduledRetry),

    /// The operation failed and retrying was abandoned; the record is `failed`.
    Failed(RetryError),

    /// Nothing was run.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The record no longer exists.
    NotFound,

    /// The record had already been settled by an earlier execution.
    AlreadySettled(RetryStatus),
}

/// Runs due retries and settles their records.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    scheduler: Arc<RetryScheduler>,
    registry: Arc<OperationRegistry>,
}

impl RetryExecutor {
    #[must_use]
    pub const fn new(scheduler: Arc<RetryScheduler>, registry: Arc<OperationRegistry>) -> Self {
        Self {
            scheduler,
            registry,
        }
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    /// Execute a due retry.
    ///
    /// # Errors
    ///
    /// Only store failures are returned; operation failures are folded into
    /// the returned [`ExecutionOutcome`]. A record whose next attempt could
    /// not be persisted stays `pending`.
    pub async fn execute(&self, task: RetryTask) -> Result<ExecutionOutcome, RetryError> {
        let store = self.scheduler.store();

        let Some(mut record) = store.get(&task.id).await? else {
            tracing::warn!(
                retry_id = %task.id,
                error = %RetryError::RecordNotFound(task.id),
                "Ignoring retry task"
            );
            return Ok(ExecutionOutcome::Skipped(SkipReason::NotFound));
        };

        if record.status.is_terminal() {
            tracing::debug!(
                retry_id = %record.id,
                status = %record.status,
                "Retry already settled, ignoring duplicate task"
            );
            return Ok(ExecutionOutcome::Skipped(SkipReason::AlreadySettled(
                record.status,
            )));
        }

        let kind = task.operation.kind();
        let Some(handler) = self.registry.get(kind) else {
            let error = RetryError::NoHandler(kind);
            tracing::error!(retry_id = %record.id, error = %error, "Cannot execute retry");
            record.fail(self.scheduler.now(), error.to_string());
            store.update(&record).await?;
            return Ok(ExecutionOutcome::Failed(error));
        };

        tracing::debug!(
            retry_id = %record.id,
            operation = %kind,
            category = %record.category,
            attempt = record.attempt_count,
            "Executing retry"
        );

        let attempt = AssertUnwindSafe(handler.run(&task.operation, &task.context))
            .catch_unwind()
            .await;

        let failure = match attempt {
            Ok(Ok(result)) => {
                record.succeed(self.scheduler.now(), result);
                store.update(&record).await?;
                tracing::info!(
                    retry_id = %record.id,
                    operation = %kind,
                    attempt = record.attempt_count,
                    "Retry succeeded"
                );
                return Ok(ExecutionOutcome::Succeeded);
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    retry_id = %record.id,
                    operation = %kind,
                    category = %record.category,
                    attempt = record.attempt_count,
                    error = %error,
                    "Retry attempt failed"
                );
                error
            }
            Err(panic) => {
                let exception = RetryError::Exception(panic_message(panic.as_ref()));
                tracing::error!(
                    retry_id = %record.id,
                    operation = %kind,
                    category = %record.category,
                    attempt = record.attempt_count,
                    context = ?task.context,
                    error = %exception,
                    "Retry attempt raised an exception"
                );
                OperationError::new(exception.to_string())
            }
        };

        self.settle_failure(record, task, &failure).await
    }

    async fn settle_failure(
        &self,
        mut record: RetryRecord,
        task: RetryTask,
        failure: &OperationError,
    ) -> Result<ExecutionOutcome, RetryError> {
        let store = self.scheduler.store();
        let category = failure.resolve_category(record.category);

        let mut context = task.context;
        context.absorb(failure);

        let next = self
            .scheduler
            .schedule_after(
                Some(record.id),
                task.operation,
                category,
                context,
                record.attempt_count,
            )
            .await;

        let now = self.scheduler.now();
        match next {
            Ok(scheduled) => {
                record.reschedule(now, failure.message.clone(), scheduled.id);
                store.update(&record).await?;
                Ok(ExecutionOutcome::Rescheduled(scheduled))
            }
            Err(error) if error.is_terminal() => {
                tracing::warn!(
                    retry_id = %record.id,
                    category = %category,
                    attempt = record.attempt_count,
                    reason = %error,
                    "Giving up on retry"
                );
                record.fail(now, format!("{}: {error}", failure.message));
                store.update(&record).await?;
                Ok(ExecutionOutcome::Failed(error))
            }
            Err(error) => {
                // Left pending, recovered on the next start
                tracing::error!(
                    retry_id = %record.id,
                    category = %category,
                    error = %error,
                    "Unable to schedule the next attempt"
                );
                Err(error)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
