//! Wall-clock timestamps that follow the tokio clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Cap for waits that would overflow the timer.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Produces `DateTime<Utc>` values derived from [`tokio::time::Instant`].
///
/// Scheduled send times and reply deadlines are stored as wall-clock
/// timestamps, while the dispatcher sleeps on the tokio timer. Anchoring one
/// to the other keeps both in step, including under paused test time.
#[derive(Debug, Clone, Copy)]
pub struct QueueClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: Instant,
}

impl QueueClock {
    /// Anchor a clock at the current time.
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor_instant: Instant::now(),
        }
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant);
        self.anchor_utc + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }

    /// Tokio instant corresponding to `at` (never in the past).
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let now = self.now();
        let wait = (at - now).to_std().unwrap_or_default();
        let base = Instant::now();
        base.checked_add(wait).unwrap_or(base + FAR_FUTURE)
    }
}

impl Default for QueueClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_follows_paused_tokio_time() {
        let clock = QueueClock::new();
        let start = clock.now();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!((clock.now() - start).num_seconds(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_at_past_is_now() {
        let clock = QueueClock::new();
        let past = clock.now() - chrono::Duration::seconds(5);
        assert!(clock.instant_at(past) <= Instant::now());
    }
}
