//! Consul 服务注册实现
//!
//! 注册 agent 服务并附带 TTL 检查，注册后立即 pass 一次；
//! 保活任务按心跳间隔持续 pass，失败时带退避地重新注册。

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keepalive::{KeepAlive, KeepAliveTable, retry_until_registered};
use super::trait_def::ServiceRegistry;
use crate::client::consul::{ConsulCheck, ConsulClient, ConsulService};
use crate::codec::check_weight;
use crate::config::ConsulConfig;
use crate::error::Result;
use crate::service::Service;

/// TTL 检查 ID
pub(crate) fn check_id(instance_id: &str) -> String {
    format!("service:{}", instance_id)
}

/// 注册服务并让 TTL 检查立即进入 passing
async fn register_and_pass(client: &ConsulClient, payload: &ConsulService) -> Result<()> {
    client.register_service(payload).await?;
    client.pass_ttl(&payload.Check.CheckID).await
}

/// 心跳主循环
async fn heartbeat_loop(
    client: ConsulClient,
    payload: ConsulService,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let passed = tokio::select! {
            _ = token.cancelled() => return,
            passed = client.pass_ttl(&payload.Check.CheckID) => passed,
        };

        match passed {
            Ok(()) => debug!(instance_id = %payload.ID, "TTL check passed"),
            Err(e) => {
                warn!(instance_id = %payload.ID, error = %e, "TTL heartbeat failed, re-registering");
                let renewed = retry_until_registered(&token, &payload.ID, || {
                    let client = client.clone();
                    let payload = payload.clone();
                    async move { register_and_pass(&client, &payload).await }
                })
                .await;
                if renewed.is_none() {
                    return;
                }
                ticker.reset();
            }
        }
    }
}

/// Consul 服务注册
pub struct ConsulRegistry {
    client: ConsulClient,
    config: ConsulConfig,
    keep_alives: KeepAliveTable<()>,
}

impl ConsulRegistry {
    /// 使用已建立的客户端创建注册器
    pub fn new(client: ConsulClient, config: ConsulConfig) -> Self {
        Self {
            client,
            config,
            keep_alives: KeepAliveTable::new(),
        }
    }

    /// 按配置创建客户端与注册器
    pub fn from_config(config: ConsulConfig) -> Result<Self> {
        config.validate()?;
        let client = ConsulClient::new(&config)?;
        Ok(Self::new(client, config))
    }

    fn payload(&self, instance: &Service) -> ConsulService {
        let instance_id = instance.id();
        ConsulService {
            Check: ConsulCheck {
                CheckID: check_id(&instance_id),
                TTL: format!("{}s", self.config.ttl_secs),
                DeregisterCriticalServiceAfter: format!(
                    "{}s",
                    self.config.deregister_critical_after_secs
                ),
            },
            ID: instance_id,
            Name: instance.name.clone(),
            Tags: self.config.tags.clone(),
            Address: instance.ip.clone(),
            Port: instance.port,
            Meta: instance.metadata_with_weight(),
        }
    }

    async fn remove_record(&self, instance: &Service) -> Result<()> {
        self.client.deregister_service(&instance.id()).await?;
        info!(
            "Service deregistered from Consul: {} at {}:{}",
            instance.name, instance.ip, instance.port
        );
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(&self, instance: &Service) -> Result<()> {
        check_weight(instance)?;
        let payload = self.payload(instance);

        if let Some(task) = self.keep_alives.remove(&payload.ID).await {
            task.stop().await;
        }

        register_and_pass(&self.client, &payload).await?;

        let instance_id = payload.ID.clone();
        let token = self.keep_alives.child_token();
        let handle = tokio::spawn(heartbeat_loop(
            self.client.clone(),
            payload,
            self.config.health_check_interval(),
            token.clone(),
        ));
        let task = KeepAlive::new(instance.clone(), (), token, handle);
        if let Some(raced) = self.keep_alives.insert(instance_id, task).await {
            raced.stop().await;
        }

        info!(
            "Service registered with Consul: {} at {}:{}",
            instance.name, instance.ip, instance.port
        );
        Ok(())
    }

    async fn deregister(&self, instance: &Service) -> Result<()> {
        if let Some(task) = self.keep_alives.remove(&instance.id()).await {
            task.stop().await;
        }
        self.remove_record(instance).await
    }

    async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for task in self.keep_alives.drain().await {
            let (service, ()) = task.stop().await;
            if let Err(e) = self.remove_record(&service).await {
                warn!(error = %e, "Failed to deregister service during shutdown");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
