//! Exponential backoff with jitter

use rand::Rng;

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.75;

/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.25;

/// Calculate the delay before the next attempt
///
/// # Formula
/// `delay = min(base * multiplier^attempt, max_delay)`
///
/// # Arguments
/// * `attempt` - Attempts made so far (0 for the first retry)
/// * `base_delay_secs` - Base delay in seconds
/// * `max_delay_secs` - Maximum delay in seconds
/// * `multiplier` - Growth factor per attempt
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn calculate_delay(attempt: u32, base_delay_secs: u64, max_delay_secs: u64, multiplier: f64) -> u64 {
    // powi takes an i32; anything past that has long since hit max_delay
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay = (base_delay_secs as f64) * multiplier.max(0.0).powi(exponent);

    if !delay.is_finite() || delay >= max_delay_secs as f64 {
        max_delay_secs
    } else {
        delay as u64
    }
}

/// Scale `delay` by a uniformly random factor in `[0.75, 1.25]`.
pub fn apply_jitter(delay: u64) -> u64 {
    let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
    jitter_with_factor(delay, factor)
}

/// Scale `delay` by `factor`, truncating to whole seconds.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn jitter_with_factor(delay: u64, factor: f64) -> u64 {
    ((delay as f64) * factor).max(0.0) as u64
}
