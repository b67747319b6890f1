//! Shared plumbing for the Emailit delivery core.
//!
//! - [`logging`]: subscriber setup and the `internal!`/`retry!`/`webhook!` macros
//! - [`clock`]: an injectable source of "now"

pub mod clock;
pub mod logging;

pub use chrono;
pub use tracing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::LogConfig;

/// Lifecycle signal broadcast to the long-running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
