//! 注册发现工厂
//!
//! 按配置选择后端，注册器与发现器共享同一个客户端

use std::sync::Arc;
use tracing::info;

use crate::config::{BackendType, RegistryConfig};
use crate::discovery::ServiceDiscovery;
use crate::error::Result;
use crate::registry::{LoadBalancer, ServiceRegistry};

/// 同一后端上的注册器与发现器
pub type Backend = (Arc<dyn ServiceRegistry>, Arc<dyn ServiceDiscovery>);

/// 注册发现工厂
pub struct RegistryFactory;

impl RegistryFactory {
    /// 从配置创建注册器与发现器
    pub async fn create_backend(config: &RegistryConfig) -> Result<Backend> {
        config.validate()?;
        match config.backend {
            BackendType::Etcd => Self::create_etcd(config).await,
            BackendType::Consul => Self::create_consul(config),
        }
    }

    /// 从配置创建负载均衡器，同时返回注册器以便服务自身注册
    pub async fn create_load_balancer(
        config: &RegistryConfig,
    ) -> Result<(Arc<dyn ServiceRegistry>, LoadBalancer)> {
        let (registry, discovery) = Self::create_backend(config).await?;
        Ok((registry, LoadBalancer::with_kind(discovery, config.load_balance)))
    }

    #[cfg(feature = "etcd")]
    async fn create_etcd(config: &RegistryConfig) -> Result<Backend> {
        use crate::discovery::EtcdDiscovery;
        use crate::registry::EtcdRegistry;

        let client = crate::client::connect_etcd(&config.etcd).await?;
        info!(endpoints = ?config.etcd.endpoints, "Connected to etcd");
        Ok((
            Arc::new(EtcdRegistry::new(client.clone(), config.etcd.clone())),
            Arc::new(EtcdDiscovery::new(client, config.etcd.clone())),
        ))
    }

    #[cfg(not(feature = "etcd"))]
    async fn create_etcd(_config: &RegistryConfig) -> Result<Backend> {
        Err(crate::error::RegistryError::config(
            "etcd backend requested but the `etcd` feature is disabled",
        ))
    }

    #[cfg(feature = "consul")]
    fn create_consul(config: &RegistryConfig) -> Result<Backend> {
        use crate::client::ConsulClient;
        use crate::discovery::ConsulDiscovery;
        use crate::registry::ConsulRegistry;

        let client = ConsulClient::new(&config.consul)?;
        info!(address = %client.base_url(), "Consul client created");
        Ok((
            Arc::new(ConsulRegistry::new(client.clone(), config.consul.clone())),
            Arc::new(ConsulDiscovery::new(client, config.consul.clone())),
        ))
    }

    #[cfg(not(feature = "consul"))]
    fn create_consul(_config: &RegistryConfig) -> Result<Backend> {
        Err(crate::error::RegistryError::config(
            "consul backend requested but the `consul` feature is disabled",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let mut config = RegistryConfig::default();
        config.etcd.endpoints.clear();
        let err = RegistryFactory::create_backend(&config).await.err().unwrap();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[cfg(feature = "consul")]
    #[tokio::test]
    async fn consul_backend_is_created_without_io() {
        let config = RegistryConfig {
            backend: BackendType::Consul,
            ..Default::default()
        };
        assert!(RegistryFactory::create_backend(&config).await.is_ok());
    }
}
