//! Long-running loop feeding due tasks into the executor

use emailit_common::{Signal, internal};
use tokio::sync::{broadcast, mpsc};

use crate::{
    executor::{ExecutionOutcome, RetryExecutor},
    types::RetryTask,
};

/// Drains the [`TokioDispatcher`](crate::TokioDispatcher) channel, executing
/// one task at a time.
#[derive(Debug)]
pub struct RetryRunner {
    executor: RetryExecutor,
    receiver: mpsc::UnboundedReceiver<RetryTask>,
}

impl RetryRunner {
    #[must_use]
    pub const fn new(executor: RetryExecutor, receiver: mpsc::UnboundedReceiver<RetryTask>) -> Self {
        Self { executor, receiver }
    }

    /// Run until a shutdown signal arrives or every dispatcher is dropped.
    ///
    /// Tasks still sleeping in the dispatcher at shutdown are lost; their
    /// records stay `pending`.
    pub async fn serve(mut self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(level = INFO, "Retry runner starting");

        loop {
            tokio::select! {
                task = self.receiver.recv() => {
                    let Some(task) = task else {
                        internal!(level = INFO, "All retry dispatchers dropped, stopping runner");
                        break;
                    };
                    run_one(&self.executor, task).await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Retry runner received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Retry runner shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Retry runner shutdown complete");
    }
}

/// Execute `tasks` in order, e.g. those returned by
/// [`ManualDispatcher::take_due`](crate::ManualDispatcher::take_due).
pub async fn run_tasks(executor: &RetryExecutor, tasks: Vec<RetryTask>) -> usize {
    let count = tasks.len();
    for task in tasks {
        run_one(executor, task).await;
    }
    count
}

async fn run_one(executor: &RetryExecutor, task: RetryTask) {
    let id = task.id;
    match executor.execute(task).await {
        Ok(ExecutionOutcome::Succeeded) => {}
        Ok(ExecutionOutcome::Rescheduled(next)) => {
            tracing::debug!(retry_id = %id, next_retry_id = %next.id, "Retry rescheduled");
        }
        Ok(ExecutionOutcome::Failed(error)) => {
            tracing::debug!(retry_id = %id, error = %error, "Retry abandoned");
        }
        Ok(ExecutionOutcome::Skipped(reason)) => {
            tracing::debug!(retry_id = %id, ?reason, "Retry skipped");
        }
        Err(e) => {
            tracing::error!(retry_id = %id, error = %e, "Error executing retry");
        }
    }
}
