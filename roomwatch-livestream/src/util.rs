//! Shared utilities for the livestream crate.

use std::time::Duration;

use rand_distr::{Distribution, Normal};
use tokio_util::sync::CancellationToken;

/// Fixed delay before a worker retries after a failed url fetch or I/O error
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

const JITTER_STD_DEV_SECS: f64 = 3.0;
const MIN_POLL_DELAY: Duration = Duration::from_secs(1);

/// Poll delay for the next watcher tick.
///
/// Adds normally distributed jitter (3s standard deviation) to `base` so
/// many rooms added at once drift apart. Never shorter than one second.
#[must_use]
pub fn jittered_interval(base: Duration) -> Duration {
    let jitter = Normal::new(0.0, JITTER_STD_DEV_SECS)
        .map(|normal| normal.sample(&mut rand::thread_rng()))
        .unwrap_or(0.0);
    let secs = base.as_secs_f64() + jitter;
    if secs.is_finite() && secs > MIN_POLL_DELAY.as_secs_f64() {
        // Bases near Duration::MAX overflow once jitter is added.
        Duration::try_from_secs_f64(secs).unwrap_or(base)
    } else {
        MIN_POLL_DELAY
    }
}

/// Sleep for `delay` unless `stop` fires first. Returns true when stopped.
pub async fn sleep_or_stop(delay: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        () = stop.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jittered_interval_has_floor() {
        for _ in 0..200 {
            assert!(jittered_interval(Duration::ZERO) >= MIN_POLL_DELAY);
        }
    }

    #[test]
    fn test_jittered_interval_huge_base_does_not_overflow() {
        for base in [Duration::from_secs(u64::MAX), Duration::MAX] {
            for _ in 0..50 {
                assert!(jittered_interval(base) >= MIN_POLL_DELAY);
            }
        }
    }

    #[test]
    fn test_jittered_interval_stays_near_base() {
        let base = Duration::from_secs(30);
        let samples: Vec<f64> = (0..500)
            .map(|_| jittered_interval(base).as_secs_f64())
            .collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - 30.0).abs() < 1.5, "mean drifted to {mean}");
        assert!(samples.iter().any(|s| (*s - 30.0).abs() > 0.01));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_stop() {
        let stop = CancellationToken::new();
        assert!(!sleep_or_stop(Duration::from_secs(5), &stop).await);

        stop.cancel();
        assert!(sleep_or_stop(Duration::from_secs(3600), &stop).await);
    }
}
