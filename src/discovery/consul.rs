//! Consul 服务发现后端

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::watch::{WatchHandle, send_snapshot};
use super::{ServiceDiscovery, SnapshotReceiver};
use crate::client::consul::{ConsulClient, HealthEntry};
use crate::codec::split_weight;
use crate::config::ConsulConfig;
use crate::error::{RegistryError, Result};
use crate::retry::{BackoffPolicy, ExponentialBackoff};
use crate::service::Service;

/// Consul 服务发现
///
/// 查询只返回健康检查为 passing 的实例
#[derive(Clone)]
pub struct ConsulDiscovery {
    client: ConsulClient,
    config: ConsulConfig,
}

impl ConsulDiscovery {
    /// 使用已建立的客户端创建发现器
    pub fn new(client: ConsulClient, config: ConsulConfig) -> Self {
        Self { client, config }
    }

    /// 按配置创建客户端与发现器
    pub fn from_config(config: ConsulConfig) -> Result<Self> {
        config.validate()?;
        let client = ConsulClient::new(&config)?;
        Ok(Self::new(client, config))
    }
}

/// 将健康查询记录还原为 Service，权重从元数据保留键中恢复
fn to_service(entry: HealthEntry) -> Result<Service> {
    let svc = entry.Service;
    let ip = if svc.Address.is_empty() {
        entry.Node.Address
    } else {
        svc.Address
    };
    let (metadata, weight) = split_weight(svc.Meta.unwrap_or_default())
        .map_err(|e| RegistryError::decode(format!("consul service {}", svc.ID), e))?;

    Ok(Service {
        name: svc.Service,
        ip,
        port: svc.Port,
        metadata,
        healthy: true,
        weight,
    })
}

#[async_trait]
impl ServiceDiscovery for ConsulDiscovery {
    async fn get_instances(&self, service_name: &str) -> Result<Vec<Service>> {
        let resp = self
            .client
            .health_service(service_name, true, None, self.config.query_wait())
            .await?;
        resp.entries.into_iter().map(to_service).collect()
    }

    async fn watch(&self, service_name: &str) -> Result<(SnapshotReceiver, WatchHandle)> {
        let (tx, rx) = mpsc::channel(1);
        let discovery = self.clone();
        let name = service_name.to_string();
        let handle = WatchHandle::spawn(service_name, move |token| {
            watch_plan(discovery, name, tx, token)
        });
        Ok((rx, handle))
    }
}

/// 基于阻塞查询的 watch plan
///
/// 首次结果与每次 `X-Consul-Index` 变化都会触发一次完整刷新
async fn watch_plan(
    discovery: ConsulDiscovery,
    service_name: String,
    tx: mpsc::Sender<Vec<Service>>,
    token: CancellationToken,
) {
    let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
    let wait = discovery.config.query_wait();
    let mut last_index = 0u64;
    let mut failures = 0usize;

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = discovery.client.health_service(&service_name, true, Some(last_index), wait) => result,
        };

        let index = match result {
            Ok(resp) => {
                failures = 0;
                // 缺失或为 0 的索引按 1 处理，否则 index=0 的查询不会阻塞
                resp.index.max(1)
            }
            Err(e) => {
                let delay = backoff.backoff_duration(failures);
                failures += 1;
                warn!(service = %service_name, error = %e, retry_in = ?delay, "Consul watch query failed");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };

        if index == last_index {
            continue;
        }
        // 索引回退（如 agent 重启）时从头开始
        last_index = if index < last_index { 0 } else { index };

        let refreshed = tokio::select! {
            _ = token.cancelled() => break,
            refreshed = discovery.get_instances(&service_name) => refreshed,
        };
        match refreshed {
            Ok(instances) => {
                debug!(service = %service_name, index, count = instances.len(), "Service instances changed");
                if !send_snapshot(&tx, &token, instances).await {
                    break;
                }
            }
            Err(e) => {
                warn!(service = %service_name, error = %e, "Failed to refresh service instances");
            }
        }
    }

    info!(service = %service_name, "Consul watch plan stopped");
}
