use std::str::FromStr;

use serde::Deserialize;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Events produced by the retry engine (scheduling, execution, clean-up).
#[macro_export]
macro_rules! retry {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "retry", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::retry!(level = DEBUG, $($msg),*)
    };
}

/// Events produced by the webhook health monitor.
#[macro_export]
macro_rules! webhook {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "webhook", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::webhook!(level = DEBUG, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Level filter (`trace`, `debug`, `info`, `warn`, `error`).
    ///
    /// The `LOG_LEVEL` environment variable takes precedence over this.
    /// Default: TRACE in debug builds, INFO in release builds
    #[serde(default)]
    pub level: Option<String>,

    /// Emit one JSON object per event instead of the compact format.
    #[serde(default)]
    pub json: bool,
}

impl LogConfig {
    fn level_filter(&self) -> LevelFilter {
        let default = if cfg!(debug_assertions) {
            LevelFilter::TRACE
        } else {
            LevelFilter::INFO
        };

        std::env::var("LOG_LEVEL")
            .ok()
            .or_else(|| self.level.clone())
            .map_or(default, |level| {
                LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
                    eprintln!("Invalid log level specified {level}, defaulting to {default}");
                    default
                })
            })
    }
}

/// Only events originating from this workspace's crates are emitted.
fn is_emailit_target(target: &str) -> bool {
    target.starts_with("emailit")
}

pub fn init(config: &LogConfig) {
    let level = config.level_filter();

    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(FilterFn::new(|metadata| is_emailit_target(metadata.target())))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(FilterFn::new(|metadata| is_emailit_target(metadata.target())))
            .boxed()
    };

    tracing_subscriber::Registry::default().with(layer).init();
}
