use super::BackoffPolicy;
use std::time::Duration;

/// 指数退避
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn backoff_duration(&self, attempt: usize) -> Duration {
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1 << attempt.min(10));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(4), Duration::from_secs(16));
        assert_eq!(policy.backoff_duration(5), Duration::from_secs(30));
        assert_eq!(policy.backoff_duration(usize::MAX), Duration::from_secs(30));
    }
}
