//! Retry strategy table.
//!
//! Each [`RetryCategory`] has a [`RetryStrategy`] describing how many times a
//! failed operation may be retried, how the delay between attempts grows,
//! and which failures are worth retrying at all. Lookups that miss the table
//! fall back to the default strategy.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RetryCategory, backoff, types::RetryContext};

/// HTTP statuses a network-level failure may carry and still be retried.
pub const TRANSIENT_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// One hour, the longest wait the built-in strategies will accept.
const ONE_HOUR_SECS: u64 = 3600;

/// Predicate deciding whether a failure of a given category is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eligibility {
    /// Every failure is retried.
    Always,

    /// No failure is retried.
    Never,

    /// Retry when the failure carried no HTTP status, or one of `codes`.
    TransientStatus { codes: Vec<u16> },

    /// Retry only when a retry-after hint is present and shorter than `max_secs`.
    RetryAfterWithin { max_secs: u64 },

    /// Retry only when the quota reset time is at most `max_secs` away.
    QuotaResetWithin { max_secs: u64 },
}

impl Eligibility {
    /// Evaluate the predicate.
    ///
    /// # Errors
    ///
    /// Returns the reason the failure is not retryable.
    pub fn check(&self, context: &RetryContext, now: DateTime<Utc>) -> Result<(), String> {
        match self {
            Self::Always => Ok(()),
            Self::Never => Err("category is never retried".to_string()),
            Self::TransientStatus { codes } => match context.http_status {
                None => Ok(()),
                Some(status) if codes.contains(&status) => Ok(()),
                Some(status) => Err(format!("HTTP status {status} is not transient")),
            },
            Self::RetryAfterWithin { max_secs } => match context.retry_after_secs {
                Some(after) if after < *max_secs => Ok(()),
                Some(after) => Err(format!(
                    "retry-after of {after}s is not under {max_secs}s"
                )),
                None => Err("no retry-after hint was provided".to_string()),
            },
            Self::QuotaResetWithin { max_secs } => match context.quota_reset {
                Some(reset) => {
                    let wait = reset.signed_duration_since(now).num_seconds();
                    if wait <= i64::try_from(*max_secs).unwrap_or(i64::MAX) {
                        Ok(())
                    } else {
                        Err(format!("quota resets in {wait}s, beyond {max_secs}s"))
                    }
                }
                None => Err("no quota reset time was provided".to_string()),
            },
        }
    }
}

/// How a category of failure is retried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryStrategy {
    pub category: RetryCategory,

    /// Attempts allowed before the retry is abandoned.
    pub max_attempts: u32,

    /// Delay before the first retry (in seconds).
    pub base_delay_secs: u64,

    /// Upper bound on any single delay (in seconds).
    pub max_delay_secs: u64,

    /// Growth factor applied per attempt: `base * multiplier^attempt`.
    pub backoff_multiplier: f64,

    /// Scale each delay by a random factor in `[0.75, 1.25]`.
    pub jitter: bool,

    pub eligibility: Eligibility,
}

impl RetryStrategy {
    /// The fallback used for categories without an entry.
    #[must_use]
    pub const fn fallback() -> Self {
        Self {
            category: RetryCategory::Unknown,
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 300,
            backoff_multiplier: 2.0,
            jitter: true,
            eligibility: Eligibility::Always,
        }
    }

    /// Whether another attempt is allowed after `attempt_count` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Delay before the next attempt, without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt_count: u32) -> u64 {
        backoff::calculate_delay(
            attempt_count,
            self.base_delay_secs,
            self.max_delay_secs,
            self.backoff_multiplier,
        )
    }

    /// Delay before the next attempt, with jitter applied if enabled.
    #[must_use]
    pub fn delay_for(&self, attempt_count: u32) -> u64 {
        let delay = self.base_delay_for(attempt_count);
        if self.jitter {
            backoff::apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Get the number of remaining retry attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    fn apply(&mut self, overrides: &StrategyOverride) {
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(base) = overrides.base_delay_secs {
            self.base_delay_secs = base;
        }
        if let Some(max) = overrides.max_delay_secs {
            self.max_delay_secs = max;
        }
        if let Some(multiplier) = overrides.backoff_multiplier {
            self.backoff_multiplier = multiplier;
        }
        if let Some(jitter) = overrides.jitter {
            self.jitter = jitter;
        }
        if let Some(eligibility) = &overrides.eligibility {
            self.eligibility = eligibility.clone();
        }
    }
}

/// Partial strategy read from configuration; unset fields keep the built-in value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyOverride {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub jitter: Option<bool>,
    #[serde(default)]
    pub eligibility: Option<Eligibility>,
}

/// Retry engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Overrides applied on top of the fallback strategy.
    #[serde(default)]
    pub default_strategy: Option<StrategyOverride>,

    /// Per-category overrides, keyed by category (`"rate_limit"`, ...).
    #[serde(default)]
    pub strategies: AHashMap<String, StrategyOverride>,

    /// Terminal retry records older than this are removed by clean-up.
    ///
    /// Default: 7 days
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u64,

    /// How often the clean-up runs (in seconds).
    ///
    /// Default: 86400 seconds (daily)
    #[serde(default = "defaults::cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_strategy: None,
            strategies: AHashMap::default(),
            retention_days: defaults::retention_days(),
            cleanup_interval_secs: defaults::cleanup_interval_secs(),
        }
    }
}

mod defaults {
    pub const fn retention_days() -> u64 {
        7
    }

    pub const fn cleanup_interval_secs() -> u64 {
        86400 // daily
    }
}

/// Immutable category → strategy lookup.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: AHashMap<RetryCategory, RetryStrategy>,
    fallback: RetryStrategy,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StrategyTable {
    /// The built-in strategies for Emailit API failures.
    #[must_use]
    pub fn builtin() -> Self {
        let strategies = [
            RetryStrategy {
                category: RetryCategory::Network,
                max_attempts: 3,
                base_delay_secs: 5,
                max_delay_secs: 300,
                backoff_multiplier: 2.0,
                jitter: true,
                eligibility: Eligibility::TransientStatus {
                    codes: TRANSIENT_STATUS_CODES.to_vec(),
                },
            },
            RetryStrategy {
                category: RetryCategory::Timeout,
                max_attempts: 3,
                base_delay_secs: 10,
                max_delay_secs: 300,
                backoff_multiplier: 2.0,
                jitter: true,
                eligibility: Eligibility::Always,
            },
            RetryStrategy {
                category: RetryCategory::RateLimit,
                max_attempts: 2,
                base_delay_secs: 60,
                max_delay_secs: ONE_HOUR_SECS,
                backoff_multiplier: 1.0,
                jitter: false,
                eligibility: Eligibility::RetryAfterWithin {
                    max_secs: ONE_HOUR_SECS,
                },
            },
            RetryStrategy {
                category: RetryCategory::ServerError,
                max_attempts: 3,
                base_delay_secs: 30,
                max_delay_secs: 600,
                backoff_multiplier: 2.0,
                jitter: true,
                eligibility: Eligibility::Always,
            },
            RetryStrategy {
                category: RetryCategory::QuotaExceeded,
                max_attempts: 1,
                base_delay_secs: ONE_HOUR_SECS,
                max_delay_secs: ONE_HOUR_SECS,
                backoff_multiplier: 1.0,
                jitter: false,
                eligibility: Eligibility::QuotaResetWithin {
                    max_secs: ONE_HOUR_SECS,
                },
            },
            RetryStrategy {
                category: RetryCategory::ClientError,
                max_attempts: 1,
                base_delay_secs: 0,
                max_delay_secs: 0,
                backoff_multiplier: 1.0,
                jitter: false,
                eligibility: Eligibility::Never,
            },
        ]
        .into_iter()
        .map(|strategy| (strategy.category, strategy))
        .collect();

        Self {
            strategies,
            fallback: RetryStrategy::fallback(),
        }
    }

    /// Build the table from the built-in strategies plus configured overrides.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        let mut table = Self::builtin();

        if let Some(overrides) = &config.default_strategy {
            table.fallback.apply(overrides);
        }

        for (key, overrides) in &config.strategies {
            let category: RetryCategory = match key.parse() {
                Ok(category) => category,
                Err(never) => match never {},
            };

            if category == RetryCategory::Unknown {
                tracing::warn!(key = %key, "Ignoring retry strategy override for unknown category");
                continue;
            }

            let strategy = table.strategies.entry(category).or_insert_with(|| RetryStrategy {
                category,
                ..table.fallback.clone()
            });
            strategy.apply(overrides);
        }

        table
    }

    /// Look up the strategy for a category, falling back to the default.
    #[must_use]
    pub fn get(&self, category: RetryCategory) -> &RetryStrategy {
        self.strategies.get(&category).unwrap_or(&self.fallback)
    }

    #[must_use]
    pub const fn fallback(&self) -> &RetryStrategy {
        &self.fallback
    }
}
