//! 服务发现模块
//!
//! 提供快照查询与变更订阅，后端支持 Consul 和 etcd

#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod watch;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::service::Service;

#[cfg(feature = "consul")]
pub use consul::ConsulDiscovery;
#[cfg(feature = "etcd")]
pub use etcd::EtcdDiscovery;
pub use watch::WatchHandle;

/// 快照通道接收端，每条消息都是完整实例列表
pub type SnapshotReceiver = mpsc::Receiver<Vec<Service>>;

/// 服务发现 Trait
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// 查询服务当前实例
    ///
    /// 没有实例时返回空列表；任意一条记录解码失败则整个调用失败
    async fn get_instances(&self, service_name: &str) -> Result<Vec<Service>>;

    /// 订阅服务实例变化
    ///
    /// 每次后端变更通知都会重新完整查询一次并推送全部实例。
    /// 通道容量为 1，消费过慢会阻塞后台任务。
    async fn watch(&self, service_name: &str) -> Result<(SnapshotReceiver, WatchHandle)>;
}
