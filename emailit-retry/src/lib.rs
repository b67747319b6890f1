//! Retry engine for failed Emailit API operations
//!
//! This crate provides functionality to:
//! - Classify API failures into retry categories
//! - Look up per-category retry strategies (attempts, backoff, eligibility)
//! - Schedule retries as persisted records handed to a delayed-task dispatcher
//! - Execute due retries and settle or re-schedule their records

pub mod backoff;
mod category;
mod dispatcher;
mod error;
mod executor;
mod operation;
mod runner;
mod scheduler;
mod store;
mod strategy;
mod types;

pub use category::RetryCategory;
pub use dispatcher::{ManualDispatcher, TaskDispatcher, TokioDispatcher};
pub use error::{DispatchError, RetryError, StoreError};
pub use executor::{ExecutionOutcome, RetryExecutor, SkipReason};
pub use operation::{
    EmailMessage, Operation, OperationError, OperationHandler, OperationKind, OperationRegistry,
};
pub use runner::{RetryRunner, run_tasks};
pub use scheduler::RetryScheduler;
pub use store::{MemoryRetryStore, RetryStore};
pub use strategy::{
    Eligibility, RetryConfig, RetryStrategy, StrategyOverride, StrategyTable,
    TRANSIENT_STATUS_CODES,
};
pub use types::{
    RetryContext, RetryId, RetryRecord, RetryStats, RetryStatus, RetryTask, ScheduledRetry,
};
