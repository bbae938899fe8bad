//! etcd 服务发现后端

use async_trait::async_trait;
use etcd_client::{Client, GetOptions, WatchOptions, WatchStream, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::watch::{WatchHandle, send_snapshot};
use super::{ServiceDiscovery, SnapshotReceiver};
use crate::codec::parse_service;
use crate::config::EtcdConfig;
use crate::error::{Operation, RegistryError, Result};
use crate::registry::etcd::service_prefix;
use crate::service::Service;

/// etcd 服务发现
///
/// 实例是否存活由 key 是否存在决定（key 绑定在注册方的租约上），
/// 因此查询不做额外的健康过滤
#[derive(Clone)]
pub struct EtcdDiscovery {
    client: Client,
    config: EtcdConfig,
}

impl EtcdDiscovery {
    /// 使用已建立的客户端创建发现器
    pub fn new(client: Client, config: EtcdConfig) -> Self {
        Self { client, config }
    }

    /// 按配置连接 etcd 并创建发现器
    pub async fn connect(config: EtcdConfig) -> Result<Self> {
        let client = crate::client::etcd::connect(&config).await?;
        Ok(Self::new(client, config))
    }
}

#[async_trait]
impl ServiceDiscovery for EtcdDiscovery {
    async fn get_instances(&self, service_name: &str) -> Result<Vec<Service>> {
        let prefix = service_prefix(&self.config.key_prefix, service_name);
        let mut client = self.client.clone();
        let resp = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| RegistryError::backend(Operation::Query, service_name, e))?;

        resp.kvs()
            .iter()
            .map(|kv| {
                let key = String::from_utf8_lossy(kv.key());
                let value = kv
                    .value_str()
                    .map_err(|e| RegistryError::decode(format!("value of key {}", key), e))?;
                parse_service(value)
                    .map_err(|e| RegistryError::decode(format!("value of key {}", key), e))
            })
            .collect()
    }

    async fn watch(&self, service_name: &str) -> Result<(SnapshotReceiver, WatchHandle)> {
        let mut client = self.client.clone();
        crate::client::etcd::probe(&mut client, self.config.dial_timeout()).await?;

        let prefix = service_prefix(&self.config.key_prefix, service_name);
        let opts = WatchOptions::new().with_prefix().with_start_revision(0);
        let (watcher, stream) = client
            .watch(prefix.as_str(), Some(opts))
            .await
            .map_err(|e| RegistryError::backend(Operation::Watch, service_name, e))?;

        let (tx, rx) = mpsc::channel(1);
        let discovery = self.clone();
        let name = service_name.to_string();
        let handle = WatchHandle::spawn(service_name, move |token| {
            watch_loop(discovery, name, watcher, stream, tx, token)
        });
        Ok((rx, handle))
    }
}

async fn watch_loop(
    discovery: EtcdDiscovery,
    service_name: String,
    mut watcher: Watcher,
    mut stream: WatchStream,
    tx: mpsc::Sender<Vec<Service>>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = stream.message() => message,
        };

        match message {
            Ok(Some(resp)) => {
                if resp.canceled() {
                    info!(service = %service_name, "Watch canceled by etcd");
                    return;
                }
                // 创建确认与进度通知不携带事件
                if resp.events().is_empty() {
                    continue;
                }

                let refreshed = tokio::select! {
                    _ = token.cancelled() => break,
                    refreshed = discovery.get_instances(&service_name) => refreshed,
                };
                match refreshed {
                    Ok(instances) => {
                        debug!(service = %service_name, count = instances.len(), "Service instances changed");
                        if !send_snapshot(&tx, &token, instances).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(service = %service_name, error = %e, "Failed to refresh service instances");
                    }
                }
            }
            Ok(None) => {
                info!(service = %service_name, "Watch stream closed");
                return;
            }
            Err(e) => {
                warn!(service = %service_name, error = %e, "Watch stream error");
                return;
            }
        }
    }

    if let Err(e) = watcher.cancel().await {
        debug!(service = %service_name, error = %e, "Failed to cancel etcd watcher");
    }
}
