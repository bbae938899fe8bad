//! 注册发现配置
//!
//! 配置通过 TOML 加载，缺省字段使用默认值。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RegistryError, Result};
use crate::registry::StrategyKind;

/// 顶层配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 后端类型：etcd, consul
    pub backend: BackendType,

    /// etcd 后端配置
    pub etcd: EtcdConfig,

    /// Consul 后端配置
    pub consul: ConsulConfig,

    /// 负载均衡策略
    pub load_balance: StrategyKind,

    /// 日志配置
    pub logging: LoggingConfig,
}

/// 后端类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Etcd,
    Consul,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(BackendType::Etcd),
            "consul" => Ok(BackendType::Consul),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

/// etcd 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// 建连超时（秒），同时用于 watch 前的连通性探测
    pub dial_timeout_secs: u64,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 租约 TTL（秒）
    pub lease_ttl_secs: u64,
    /// key 前缀，实例 key 为 `{key_prefix}/{name}/{id}`
    pub key_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            dial_timeout_secs: 5,
            request_timeout_secs: 5,
            lease_ttl_secs: 10,
            key_prefix: "/services".to_string(),
            username: None,
            password: None,
        }
    }
}

impl EtcdConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 续租间隔：TTL 的三分之一，至少 1 秒
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs((self.lease_ttl_secs / 3).max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(RegistryError::config("etcd endpoints not configured"));
        }
        if self.lease_ttl_secs == 0 {
            return Err(RegistryError::config("etcd lease_ttl_secs must be positive"));
        }
        if i64::try_from(self.lease_ttl_secs).is_err() {
            return Err(RegistryError::config(format!(
                "etcd lease_ttl_secs ({}) exceeds {}",
                self.lease_ttl_secs,
                i64::MAX
            )));
        }
        if self.dial_timeout_secs == 0 {
            return Err(RegistryError::config("etcd dial_timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Consul 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// agent 地址，如 `http://127.0.0.1:8500`
    pub address: String,
    /// ACL token
    pub token: Option<String>,
    pub datacenter: Option<String>,
    /// TTL 检查超时（秒）
    pub ttl_secs: u64,
    /// 检查持续 critical 多久后由 Consul 自动注销（秒）
    pub deregister_critical_after_secs: u64,
    /// 心跳间隔（秒），必须小于 TTL
    pub health_check_interval_secs: u64,
    /// 查询等待时间（秒），也是阻塞查询的最长等待
    pub query_wait_secs: u64,
    /// HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 注册时附带的标签
    pub tags: Vec<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            ttl_secs: 20,
            deregister_critical_after_secs: 60,
            health_check_interval_secs: 10,
            query_wait_secs: 3,
            request_timeout_secs: 5,
            tags: Vec::new(),
        }
    }
}

impl ConsulConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn query_wait(&self) -> Duration {
        Duration::from_secs(self.query_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(RegistryError::config("consul address not configured"));
        }
        if self.ttl_secs == 0 || self.health_check_interval_secs == 0 {
            return Err(RegistryError::config(
                "consul ttl_secs and health_check_interval_secs must be positive",
            ));
        }
        if self.health_check_interval_secs >= self.ttl_secs {
            return Err(RegistryError::config(format!(
                "consul health_check_interval_secs ({}) must be less than ttl_secs ({})",
                self.health_check_interval_secs, self.ttl_secs
            )));
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认级别，`RUST_LOG` 优先
    pub level: String,
    /// 是否输出 JSON
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RegistryConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::config(format!("failed to read {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = toml::from_str(content)
            .map_err(|e| RegistryError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 只校验选中的后端
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendType::Etcd => self.etcd.validate(),
            BackendType::Consul => self.consul.validate(),
        }
    }
}
