//! 保活任务表
//!
//! 每个注册实例对应一个保活任务，任务独占其租约 / TTL 检查

use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::retry::{BackoffPolicy, FixedBackoff};
use crate::service::Service;

/// 反复重试注册直到成功
///
/// 在保活任务内部同步执行，没有外部驱动会替它重试。任务被取消时返回 `None`。
pub(crate) async fn retry_until_registered<T, F, Fut>(
    token: &CancellationToken,
    instance_id: &str,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = FixedBackoff::reregister();
    let mut attempts: usize = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(backoff.backoff_duration(attempts)) => {}
        }
        attempts += 1;
        let outcome = tokio::select! {
            _ = token.cancelled() => return None,
            outcome = attempt() => outcome,
        };
        match outcome {
            Ok(value) => {
                info!(instance_id, attempts, "Service re-registered");
                return Some(value);
            }
            Err(e) => {
                error!(instance_id, attempts, error = %e, "Service re-registration failed, retrying");
            }
        }
    }
}

/// 单个实例的保活任务
pub(crate) struct KeepAlive<T> {
    pub service: Service,
    pub state: T,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl<T> KeepAlive<T> {
    pub fn new(service: Service, state: T, token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            service,
            state,
            token,
            handle,
        }
    }

    /// 取消任务并等待其退出
    pub async fn stop(self) -> (Service, T) {
        self.token.cancel();
        // 任务 panic 时同样视为已停止
        let _ = self.handle.await;
        (self.service, self.state)
    }
}

/// 注册器持有的保活任务表
///
/// 所有任务的取消令牌都派生自同一个根令牌，注册器被 drop 时全部停止
pub(crate) struct KeepAliveTable<T> {
    root: CancellationToken,
    tasks: Mutex<HashMap<String, KeepAlive<T>>>,
}

impl<T> KeepAliveTable<T> {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 插入任务，返回被替换的旧任务（调用方负责停止）
    pub async fn insert(&self, instance_id: String, task: KeepAlive<T>) -> Option<KeepAlive<T>> {
        self.tasks.lock().await.insert(instance_id, task)
    }

    pub async fn remove(&self, instance_id: &str) -> Option<KeepAlive<T>> {
        self.tasks.lock().await.remove(instance_id)
    }

    pub async fn drain(&self) -> Vec<KeepAlive<T>> {
        self.tasks.lock().await.drain().map(|(_, task)| task).collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl<T> Drop for KeepAliveTable<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
