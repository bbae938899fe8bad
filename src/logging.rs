//! 日志初始化
//!
//! 注册发现内部只使用 `tracing` 宏输出日志；宿主进程若没有安装订阅者，
//! 可以调用 [`init`] 安装一个默认的 fmt 订阅者。

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{RegistryError, Result};

/// 安装全局 tracing 订阅者
///
/// `RUST_LOG` 优先于配置中的级别。重复安装返回配置错误。
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| RegistryError::config(format!("invalid log level {}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| RegistryError::config(format!("failed to install tracing subscriber: {}", e)))
}
