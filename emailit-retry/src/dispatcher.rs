//! Delayed-task dispatch.
//!
//! The scheduler never runs a retry itself; it hands a [`RetryTask`] to a
//! [`TaskDispatcher`] with a delay, and the dispatcher arranges for the task
//! to reach the executor once the delay has passed.
//!
//! - [`TokioDispatcher`] sleeps on the tokio runtime, then forwards the task
//!   into a channel drained by the [`RetryRunner`](crate::RetryRunner).
//! - [`ManualDispatcher`] only queues tasks with their due time; the host
//!   pulls due tasks itself (e.g. from its own cron tick).

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use emailit_common::Clock;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{error::DispatchError, types::RetryTask};

pub trait TaskDispatcher: Send + Sync + std::fmt::Debug {
    /// Arrange for `task` to be executed after `delay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the task cannot be accepted.
    fn dispatch(&self, delay: Duration, task: RetryTask) -> Result<(), DispatchError>;
}

/// Dispatcher backed by tokio timers.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    sender: mpsc::UnboundedSender<RetryTask>,
}

impl TokioDispatcher {
    /// Create a dispatcher and the receiver its due tasks arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RetryTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskDispatcher for TokioDispatcher {
    fn dispatch(&self, delay: Duration, task: RetryTask) -> Result<(), DispatchError> {
        if self.sender.is_closed() {
            return Err(DispatchError::Closed);
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| DispatchError::NoRuntime(e.to_string()))?;

        let sender = self.sender.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let id = task.id;
            if sender.send(task).is_err() {
                tracing::warn!(retry_id = %id, "Retry runner stopped before task was due");
            }
        });

        Ok(())
    }
}

/// Dispatcher that only records tasks; the host decides when to run them.
#[derive(Debug, Default)]
pub struct ManualDispatcher {
    queued: Mutex<Vec<(DateTime<Utc>, RetryTask)>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ManualDispatcher {
    /// Due times are computed from the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Due times are computed from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            queued: Mutex::default(),
            clock: Some(clock),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.as_ref().map_or_else(Utc::now, |clock| clock.now())
    }

    /// Number of tasks waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.lock().is_empty()
    }

    /// Due times of the waiting tasks, in dispatch order.
    #[must_use]
    pub fn due_times(&self) -> Vec<DateTime<Utc>> {
        self.queued.lock().iter().map(|(due, _)| *due).collect()
    }

    /// Remove and return every task due at or before `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<RetryTask> {
        let mut queued = self.queued.lock();
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            queued.drain(..).partition(|(at, _)| *at <= now);
        *queued = waiting;

        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, task)| task).collect()
    }

    /// Remove and return every task regardless of due time.
    pub fn take_all(&self) -> Vec<RetryTask> {
        self.queued.lock().drain(..).map(|(_, task)| task).collect()
    }
}

impl TaskDispatcher for ManualDispatcher {
    fn dispatch(&self, delay: Duration, task: RetryTask) -> Result<(), DispatchError> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let due = self
            .now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.queued.lock().push((due, task));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        EmailMessage, Operation,
        types::{RetryContext, RetryId},
    };

    fn task() -> RetryTask {
        RetryTask {
            id: RetryId::generate(),
            operation: Operation::SendEmail(EmailMessage::default()),
            context: RetryContext::default(),
        }
    }

    #[test]
    fn test_manual_dispatcher_take_due() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(emailit_common::ManualClock::new(start));
        let dispatcher = ManualDispatcher::with_clock(clock);

        let late = task();
        let early = task();
        dispatcher.dispatch(Duration::from_secs(120), late.clone()).unwrap();
        dispatcher.dispatch(Duration::from_secs(60), early.clone()).unwrap();
        assert_eq!(dispatcher.len(), 2);

        assert!(dispatcher.take_due(start).is_empty());

        let due = dispatcher.take_due(start + chrono::Duration::seconds(60));
        assert_eq!(due, vec![early]);
        assert_eq!(dispatcher.len(), 1);

        let due = dispatcher.take_due(start + chrono::Duration::hours(1));
        assert_eq!(due, vec![late]);
        assert!(dispatcher.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_dispatcher_delivers_after_delay() {
        let (dispatcher, mut receiver) = TokioDispatcher::channel();
        let sent = task();

        dispatcher.dispatch(Duration::from_secs(30), sent.clone()).unwrap();
        assert!(receiver.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(receiver.recv().await, Some(sent));
    }

    #[tokio::test]
    async fn test_tokio_dispatcher_closed() {
        let (dispatcher, receiver) = TokioDispatcher::channel();
        drop(receiver);

        assert!(matches!(
            dispatcher.dispatch(Duration::from_secs(1), task()),
            Err(DispatchError::Closed)
        ));
    }

    #[test]
    fn test_tokio_dispatcher_needs_runtime() {
        let (dispatcher, _receiver) = TokioDispatcher::channel();

        assert!(matches!(
            dispatcher.dispatch(Duration::from_secs(1), task()),
            Err(DispatchError::NoRuntime(_))
        ));
    }
}
