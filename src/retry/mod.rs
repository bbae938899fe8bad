//! 退避策略模块

pub mod exponential;
pub mod fixed;

pub use exponential::ExponentialBackoff;
pub use fixed::FixedBackoff;

use std::time::Duration;

/// 退避策略 trait
///
/// `attempt` 从 0 开始计数
pub trait BackoffPolicy: Send + Sync {
    fn backoff_duration(&self, attempt: usize) -> Duration;
}
