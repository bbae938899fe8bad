//! etcd 客户端构建

use etcd_client::{Client, ConnectOptions};
use std::time::Duration;

use crate::config::EtcdConfig;
use crate::error::{Operation, RegistryError, Result};

/// 按配置连接 etcd
///
/// 返回的 `Client` 可以 clone 后分别注入注册器与发现器，共享同一条连接
pub async fn connect(config: &EtcdConfig) -> Result<Client> {
    config.validate()?;

    let mut options = ConnectOptions::new()
        .with_connect_timeout(config.dial_timeout())
        .with_timeout(config.request_timeout());
    if let (Some(user), Some(password)) = (&config.username, &config.password) {
        options = options.with_user(user.clone(), password.clone());
    }

    let target = config.endpoints.join(",");
    match tokio::time::timeout(
        config.dial_timeout(),
        Client::connect(&config.endpoints, Some(options)),
    )
    .await
    {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(e)) => Err(RegistryError::connection(target, e)),
        Err(_) => Err(RegistryError::connection(
            target,
            format!("dial timeout after {:?}", config.dial_timeout()),
        )),
    }
}

/// 有界超时的连通性探测
pub async fn probe(client: &mut Client, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, client.status()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(RegistryError::backend(Operation::Probe, "etcd", e)),
        Err(_) => Err(RegistryError::timeout(Operation::Probe, "etcd", timeout)),
    }
}
