//! Typed error handling for the retry engine.
//!
//! Scheduling decisions come back as [`RetryError`] values so callers can
//! tell a terminal "don't retry" from an infrastructure failure:
//! - Terminal decisions (`MaxRetriesExceeded`, `NotRetryable`, `NoHandler`)
//! - Execution faults (`Exception`), folded back into the retry decision
//! - Infrastructure errors (`Store`, `Dispatch`)
//!
//! A dispatch failure also ends the chain: the record it was meant to run has
//! already been marked failed by the time the error is returned.

use thiserror::Error;

use crate::{OperationKind, RetryCategory, RetryId};

/// Top-level retry engine error type.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt the strategy allows has been used.
    #[error("Maximum retries exceeded for {category}: {attempts}/{max_attempts} attempts used")]
    MaxRetriesExceeded {
        category: RetryCategory,
        attempts: u32,
        max_attempts: u32,
    },

    /// The strategy's eligibility predicate rejected the failure.
    #[error("Not retryable ({category}): {reason}")]
    NotRetryable {
        category: RetryCategory,
        reason: String,
    },

    /// The operation panicked while executing.
    #[error("Operation raised an exception: {0}")]
    Exception(String),

    /// The executor was handed a record that no longer exists.
    #[error("Retry record not found: {0}")]
    RecordNotFound(RetryId),

    /// Nothing is registered to run this kind of operation.
    #[error("No handler registered for operation {0}")]
    NoHandler(OperationKind),

    #[error("Retry store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl RetryError {
    /// Returns `true` if this error ends the retry chain.
    ///
    /// Store errors are not terminal: the record that failed is left pending
    /// and picked up again by [`RetryScheduler::recover_pending`](crate::RetryScheduler::recover_pending).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MaxRetriesExceeded { .. }
                | Self::NotRetryable { .. }
                | Self::NoHandler(_)
                | Self::Dispatch(_)
        )
    }
}

/// Errors raised by a [`RetryStore`](crate::RetryStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(RetryId),

    #[error("Record already exists: {0}")]
    AlreadyExists(RetryId),

    /// Backend-specific failure (connection lost, constraint violation, ...).
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors raised when handing a task to a [`TaskDispatcher`](crate::TaskDispatcher).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The receiving side of the dispatcher has gone away.
    #[error("Dispatcher is closed")]
    Closed,

    /// No async runtime is available to run the delay on.
    #[error("No runtime available: {0}")]
    NoRuntime(String),
}
