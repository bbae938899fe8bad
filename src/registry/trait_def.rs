//! 服务注册 Trait 定义

use async_trait::async_trait;

use crate::error::Result;
use crate::service::Service;

/// 服务注册 Trait
///
/// Consul 与 etcd 各自实现，注册器拥有其注册实例的保活任务
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 注册服务
    ///
    /// 以实例 ID 幂等：重复注册会替换之前的注册与保活任务。
    /// 后端确认写入后才返回；写入失败时不会启动保活任务。
    async fn register(&self, instance: &Service) -> Result<()>;

    /// 注销服务，并停止该实例的保活任务
    async fn deregister(&self, instance: &Service) -> Result<()>;

    /// 注销本注册器仍持有的全部实例
    ///
    /// 尽力而为：逐个注销，返回遇到的第一个错误
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
