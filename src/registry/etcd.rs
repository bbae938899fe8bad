//! etcd 服务注册实现
//!
//! 实例以 `{key_prefix}/{name}/{id}` 为 key、编码后的 Service 为 value 写入，
//! 并绑定一个租约。保活任务持续续租；续租流关闭后在任务内部带退避地重新注册。

use async_trait::async_trait;
use etcd_client::{Client, PutOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keepalive::{KeepAlive, KeepAliveTable, retry_until_registered};
use super::trait_def::ServiceRegistry;
use crate::codec::encode_service;
use crate::config::EtcdConfig;
use crate::error::{Operation, RegistryError, Result};
use crate::service::Service;

/// 实例 key
pub(crate) fn service_key(key_prefix: &str, service_name: &str, instance_id: &str) -> String {
    format!(
        "{}/{}/{}",
        key_prefix.trim_end_matches('/'),
        service_name,
        instance_id
    )
}

/// 服务名前缀，带结尾分隔符以免 `user` 匹配到 `user-api`
pub(crate) fn service_prefix(key_prefix: &str, service_name: &str) -> String {
    format!("{}/{}/", key_prefix.trim_end_matches('/'), service_name)
}

/// 一次注册所需的全部数据，重新注册时复用
#[derive(Clone)]
struct Registration {
    instance_id: String,
    key: String,
    value: String,
    ttl: i64,
}

/// 申请租约并写入 key
async fn put_with_lease(client: &mut Client, reg: &Registration) -> Result<i64> {
    let lease = client
        .lease_grant(reg.ttl, None)
        .await
        .map_err(|e| RegistryError::backend(Operation::Register, &reg.instance_id, e))?;
    let lease_id = lease.id();

    let opts = PutOptions::new().with_lease(lease_id);
    if let Err(e) = client.put(reg.key.as_str(), reg.value.as_str(), Some(opts)).await {
        // 写入失败，回收刚申请的租约
        if let Err(revoke_err) = client.lease_revoke(lease_id).await {
            debug!(lease_id, error = %revoke_err, "Failed to revoke unused lease");
        }
        return Err(RegistryError::backend(Operation::Register, &reg.instance_id, e));
    }

    Ok(lease_id)
}

/// 对单个租约持续续租，返回续租流关闭的原因
async fn keep_lease_alive(client: &mut Client, lease_id: i64, interval: Duration) -> String {
    let (mut keeper, mut stream) = match client.lease_keep_alive(lease_id).await {
        Ok(pair) => pair,
        Err(e) => return format!("failed to open keep-alive stream: {}", e),
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = keeper.keep_alive().await {
            return format!("keep-alive request failed: {}", e);
        }
        match stream.message().await {
            Ok(Some(resp)) if resp.ttl() > 0 => {
                debug!(lease_id, ttl = resp.ttl(), "Lease keep-alive successful");
            }
            Ok(Some(_)) => return "lease expired".to_string(),
            Ok(None) => return "keep-alive stream closed".to_string(),
            Err(e) => return format!("keep-alive stream error: {}", e),
        }
    }
}

/// 保活任务主循环
async fn keep_alive_loop(
    mut client: Client,
    reg: Registration,
    lease: Arc<AtomicI64>,
    interval: Duration,
    token: CancellationToken,
) {
    loop {
        let lease_id = lease.load(Ordering::SeqCst);
        let reason = tokio::select! {
            _ = token.cancelled() => return,
            reason = keep_lease_alive(&mut client, lease_id, interval) => reason,
        };
        warn!(
            instance_id = %reg.instance_id,
            lease_id,
            reason = %reason,
            "Lease keep-alive stopped, re-registering"
        );

        let renewed = retry_until_registered(&token, &reg.instance_id, || {
            let mut client = client.clone();
            let reg = reg.clone();
            async move { put_with_lease(&mut client, &reg).await }
        })
        .await;

        match renewed {
            Some(new_lease) => lease.store(new_lease, Ordering::SeqCst),
            None => return,
        }
    }
}

/// etcd 服务注册
pub struct EtcdRegistry {
    client: Client,
    config: EtcdConfig,
    keep_alives: KeepAliveTable<Arc<AtomicI64>>,
}

impl EtcdRegistry {
    /// 使用已建立的客户端创建注册器
    pub fn new(client: Client, config: EtcdConfig) -> Self {
        Self {
            client,
            config,
            keep_alives: KeepAliveTable::new(),
        }
    }

    /// 按配置连接 etcd 并创建注册器
    pub async fn connect(config: EtcdConfig) -> Result<Self> {
        let client = crate::client::etcd::connect(&config).await?;
        Ok(Self::new(client, config))
    }

    fn registration(&self, instance: &Service) -> Result<Registration> {
        let instance_id = instance.id();
        Ok(Registration {
            key: service_key(&self.config.key_prefix, &instance.name, &instance_id),
            value: encode_service(instance)?,
            ttl: i64::try_from(self.config.lease_ttl_secs).map_err(|_| {
                RegistryError::config(format!(
                    "etcd lease_ttl_secs ({}) out of range",
                    self.config.lease_ttl_secs
                ))
            })?,
            instance_id,
        })
    }

    /// 先删除 key，再尽力回收租约
    async fn remove_record(&self, instance: &Service, lease_id: Option<i64>) -> Result<()> {
        let instance_id = instance.id();
        let key = service_key(&self.config.key_prefix, &instance.name, &instance_id);
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| RegistryError::backend(Operation::Deregister, &instance_id, e))?;

        if let Some(lease_id) = lease_id {
            if let Err(e) = client.lease_revoke(lease_id).await {
                warn!(instance_id = %instance_id, lease_id, error = %e, "Failed to revoke lease");
            }
        }

        info!(
            "Service deregistered: {} at {}:{}",
            instance.name, instance.ip, instance.port
        );
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for EtcdRegistry {
    async fn register(&self, instance: &Service) -> Result<()> {
        let reg = self.registration(instance)?;

        // 重复注册：先停掉旧任务，避免两个任务同时为同一 key 续租
        let previous_lease = match self.keep_alives.remove(&reg.instance_id).await {
            Some(task) => Some(task.stop().await.1.load(Ordering::SeqCst)),
            None => None,
        };

        let mut client = self.client.clone();
        let lease_id = put_with_lease(&mut client, &reg).await?;

        if let Some(old) = previous_lease.filter(|old| *old != lease_id) {
            if let Err(e) = client.lease_revoke(old).await {
                debug!(lease_id = old, error = %e, "Failed to revoke replaced lease");
            }
        }

        let lease = Arc::new(AtomicI64::new(lease_id));
        let token = self.keep_alives.child_token();
        let handle = tokio::spawn(keep_alive_loop(
            client,
            reg.clone(),
            lease.clone(),
            self.config.keep_alive_interval(),
            token.clone(),
        ));
        let task = KeepAlive::new(instance.clone(), lease, token, handle);
        if let Some(raced) = self.keep_alives.insert(reg.instance_id.clone(), task).await {
            raced.stop().await;
        }

        info!(
            lease_id,
            "Service registered: {} at {}:{}", instance.name, instance.ip, instance.port
        );
        Ok(())
    }

    async fn deregister(&self, instance: &Service) -> Result<()> {
        let lease_id = match self.keep_alives.remove(&instance.id()).await {
            Some(task) => Some(task.stop().await.1.load(Ordering::SeqCst)),
            None => None,
        };
        self.remove_record(instance, lease_id).await
    }

    async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for task in self.keep_alives.drain().await {
            let (service, lease) = task.stop().await;
            let lease_id = lease.load(Ordering::SeqCst);
            if let Err(e) = self.remove_record(&service, Some(lease_id)).await {
                warn!(error = %e, "Failed to deregister service during shutdown");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
