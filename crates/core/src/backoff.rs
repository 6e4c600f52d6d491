//! Capped exponential backoff for background tasks.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial backoff
    pub init_backoff: Duration,

    /// Maximum backoff
    pub max_backoff: Duration,

    /// Multiplier for each backoff round
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        }
    }
}

/// Consecutive calls to [`Backoff::next`] return growing intervals until the
/// cap is reached; [`Backoff::reset`] restarts the sequence after a success.
#[derive(Debug)]
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();

        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
        }
    }

    pub fn next(&mut self) -> Duration {
        let current = self.next_backoff_secs;
        self.next_backoff_secs = self.max_backoff_secs.min(current * self.base);
        Duration::from_secs_f64(current)
    }

    pub fn reset(&mut self) {
        self.next_backoff_secs = self.init_backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_until_capped() {
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            base: 2.0,
        };

        let mut backoff = Backoff::new(&config);

        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(350));
        assert_eq!(backoff.next(), Duration::from_millis(350));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = Backoff::new(&BackoffConfig::default());

        backoff.next();
        backoff.next();
        backoff.reset();

        assert_eq!(backoff.next(), Duration::from_millis(100));
    }
}
