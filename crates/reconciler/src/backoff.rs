//! Requeue timing.

use std::time::Duration;

/// Multiplier applied to the previous delay on each requeue.
pub const BACKOFF_FACTOR: i64 = 2;

/// Delay for republishing a payload that could not be decoded.
pub const RAW_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// How long a pull waits for a message before reporting none.
pub const PULL_WAIT: Duration = Duration::from_secs(20);

/// Next requeue delay in seconds.
///
/// The first requeue of a notification waits `initial_delay`; every later one
/// multiplies the previous delay by [`BACKOFF_FACTOR`], capped at `max_delay`.
#[must_use]
pub fn set_requeue_delay(last_delay: Option<i64>, initial_delay: i64, max_delay: i64) -> i64 {
    last_delay.map_or(initial_delay, |last| {
        last.saturating_mul(BACKOFF_FACTOR).min(max_delay)
    })
}

/// Convert a delay in seconds to a sleep duration, treating negatives as zero.
#[must_use]
pub fn delay_duration(delay_secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(delay_secs).unwrap_or(0))
}
