use super::BackoffPolicy;
use rand::Rng;
use std::time::Duration;

/// 固定延迟加随机抖动
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
    max_jitter: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration, max_jitter: Duration) -> Self {
        Self { delay, max_jitter }
    }

    /// 保活失败后的重新注册退避：1s 加 0~3ms 抖动
    pub fn reregister() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_millis(3))
    }
}

impl BackoffPolicy for FixedBackoff {
    fn backoff_duration(&self, _attempt: usize) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}
