//! Time source for the scheduler and executor.
//!
//! Every wait in the orchestrator (tick, inter-profile delay, retry backoff)
//! goes through [`Clock::sleep`], so tests can substitute a clock that
//! records the requested delays and returns immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Milliseconds between two clock readings, clamped at zero.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_clock_sleeps_forward() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= before);
    }

    #[test]
    fn elapsed_never_goes_negative() {
        let now = Utc::now();
        assert_eq!(elapsed_ms(now, now - chrono::Duration::seconds(1)), 0);
        assert_eq!(elapsed_ms(now, now + chrono::Duration::milliseconds(250)), 250);
    }
}
