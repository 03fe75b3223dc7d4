use crate::BackoffConfig;
use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex as SyncMutex;
use std::time::Duration;

/// Paces a retry loop with exponentially growing, jittered pauses.
///
/// The runtime keeps one pacer per loop that talks to the broker: the
/// connector's reconnect loop and each service's receive-retry loop. The
/// contract is two calls: [`pause`](Backoff::pause) before re-attempting
/// after a failure, [`settle`](Backoff::settle) once an attempt succeeds.
///
/// The underlying [`ExponentialBackoff`] schedule sits behind a light lock,
/// so a pacer can be driven through a shared reference.
pub struct Backoff {
    schedule: SyncMutex<ExponentialBackoff>,
    ceiling: Duration,
}

impl Backoff {
    /// Creates a pacer from the given [`BackoffConfig`].
    pub fn new(config: impl AsRef<BackoffConfig>) -> Self {
        let config = config.as_ref();
        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.initial_interval)
            .with_max_interval(config.max_interval)
            .with_randomization_factor(config.randomization_factor)
            .with_multiplier(config.multiplier)
            .with_max_elapsed_time(config.max_elapsed_time)
            .build();

        Self {
            schedule: SyncMutex::new(schedule),
            ceiling: config.max_interval,
        }
    }

    /// Sleeps until the next attempt is due.
    ///
    /// A schedule that has run past its
    /// [`max_elapsed_time`](BackoffConfig::max_elapsed_time) keeps pacing at
    /// the configured ceiling: the loops this pacer serves have nothing
    /// better to do than keep trying, and must not spin.
    pub async fn pause(&self) {
        let delay = self.advance();

        tokio::time::sleep(delay).await;
    }

    /// Drops the pacer back to its initial interval. To be called after a
    /// successful attempt, so the next failure starts a fresh schedule.
    pub fn settle(&self) {
        self.schedule.lock().reset();
    }

    /// Advances the schedule and reports the length of the next pause.
    fn advance(&self) -> Duration {
        self.schedule.lock().next_backoff().unwrap_or(self.ceiling)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A jitter-free config, so the pauses are exact.
    fn flat_config() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
        }
    }

    #[test]
    fn doubles_each_pause() {
        // Given
        let pacer = Backoff::new(flat_config());

        // Then
        assert_eq!(pacer.advance(), Duration::from_millis(100));
        assert_eq!(pacer.advance(), Duration::from_millis(200));
        assert_eq!(pacer.advance(), Duration::from_millis(400));
    }

    #[test]
    fn settles_back_to_the_initial_interval() {
        // Given
        let pacer = Backoff::new(flat_config());
        let _ = pacer.advance();
        let _ = pacer.advance();

        // When
        pacer.settle();

        // Then
        assert_eq!(pacer.advance(), Duration::from_millis(100));
    }

    #[test]
    fn keeps_pacing_at_the_ceiling_once_exhausted() {
        // Given
        let config = BackoffConfig {
            max_elapsed_time: Some(Duration::ZERO),
            ..flat_config()
        };
        let pacer = Backoff::new(config);

        // When: enough wall-clock time passes to exhaust the schedule
        std::thread::sleep(Duration::from_millis(5));

        // Then
        assert_eq!(pacer.advance(), Duration::from_secs(5));
        assert_eq!(pacer.advance(), Duration::from_secs(5));
    }
}
