//! 服务实例定义

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Consul 只持久化元数据，权重通过该保留键随元数据传输
pub const WEIGHT_METADATA_KEY: &str = "_weight";

/// 服务实例
///
/// `(name, ip, port)` 唯一标识一个实例，实例 ID 为 `"{name}-{ip}:{port}"`。
/// 实例注册后不会被原地修改：变更通过注销再注册或新的 watch 快照体现。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Service {
    /// 服务名（同名实例归为一组）
    pub name: String,

    /// 实例 IP
    pub ip: String,

    /// 实例端口
    pub port: u16,

    /// 自定义元数据（`null` 与缺失均视为空）
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: HashMap<String, String>,

    /// 是否健康
    #[serde(default)]
    pub healthy: bool,

    /// 权重（用于负载均衡）
    #[serde(default)]
    pub weight: f64,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<HashMap<String, String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Service {
    /// 创建新的服务实例
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            port,
            metadata: HashMap::new(),
            healthy: true,
            weight: 0.0,
        }
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// 设置健康状态
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// 实例 ID
    pub fn id(&self) -> String {
        crate::codec::service_id(self)
    }

    /// 实例地址，格式 `ip:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 权重写入保留键后的元数据，供只持久化元数据的后端使用
    pub fn metadata_with_weight(&self) -> HashMap<String, String> {
        let mut meta = self.metadata.clone();
        meta.insert(WEIGHT_METADATA_KEY.to_string(), self.weight.to_string());
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_is_healthy_with_zero_weight() {
        let svc = Service::new("echo", "10.0.0.1", 8080);
        assert!(svc.healthy);
        assert_eq!(svc.weight, 0.0);
        assert!(svc.metadata.is_empty());
        assert_eq!(svc.address(), "10.0.0.1:8080");
    }

    #[test]
    fn weight_travels_in_reserved_metadata_key() {
        let svc = Service::new("echo", "10.0.0.1", 8080)
            .with_metadata("zone", "a")
            .with_weight(40.0);
        let meta = svc.metadata_with_weight();
        assert_eq!(meta.get(WEIGHT_METADATA_KEY).map(String::as_str), Some("40"));
        assert_eq!(meta.get("zone").map(String::as_str), Some("a"));
        assert!(!svc.metadata.contains_key(WEIGHT_METADATA_KEY));
    }
}
