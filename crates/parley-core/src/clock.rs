use chrono::{DateTime, SubsecRound, Utc};
use tokio::time::Instant;

/// Source of wall time for typing timestamps and expiry deadlines.
///
/// `Clock::new()` reads the system clock. `starting_at` anchors wall time to
/// `tokio::time::Instant`, so a paused test runtime moves timestamps and
/// timers together.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor: Option<(DateTime<Utc>, Instant)>,
}

impl Clock {
    pub fn new() -> Self {
        Self { anchor: None }
    }

    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            anchor: Some((wall, Instant::now())),
        }
    }

    /// Current time, truncated to microseconds like stored timestamps.
    pub fn now(&self) -> DateTime<Utc> {
        let now = match self.anchor {
            None => Utc::now(),
            Some((wall, mono)) => {
                let elapsed = Instant::now().saturating_duration_since(mono);
                wall + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
            }
        };
        now.trunc_subsecs(6)
    }

    /// The monotonic instant at which wall time `at` is reached.
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let now_wall = self.now();
        let now_mono = Instant::now();
        match (at - now_wall).to_std() {
            Ok(ahead) => now_mono + ahead,
            // Already in the past.
            Err(_) => now_mono,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn anchored_clock_follows_paused_time() {
        let clock = Clock::starting_at(Utc::now());
        let before = clock.now();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now() - before, chrono::Duration::milliseconds(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn instant_for_past_time_is_now() {
        let clock = Clock::starting_at(Utc::now());
        let past = clock.now() - chrono::Duration::seconds(3);
        assert_eq!(clock.instant_at(past), Instant::now());

        let future = clock.now() + chrono::Duration::seconds(2);
        assert_eq!(clock.instant_at(future), Instant::now() + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_ignores_tokio_time() {
        let clock = Clock::new();
        // Paused tokio time stands in for a host that slept for an hour.
        tokio::time::advance(Duration::from_secs(3600)).await;
        let drift = (clock.now() - Utc::now()).num_milliseconds().abs();
        assert!(drift < 1000, "system clock drifted {}ms", drift);
    }
}
