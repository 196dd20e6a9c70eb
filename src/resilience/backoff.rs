//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Delay before retry number `attempt` (1-based; 0 means the first attempt).
///
/// `min(initial_delay * multiplier^(attempt-1), max_delay)`, plus up to
/// `jitter_ratio` of that delay at random. Never exceeds `max_delay`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponent = (attempt - 1) as i32;
    let delay_ms = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped_delay = if delay_ms.is_finite() {
        delay_ms.min(config.max_delay_ms as f64) as u64
    } else {
        config.max_delay_ms
    };

    let jitter_range = (capped_delay as f64 * config.jitter_ratio.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped_delay + jitter).min(config.max_delay_ms))
}
