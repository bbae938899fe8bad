//! watch 订阅句柄

use std::future::Future;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{RegistryError, Result};
use crate::service::Service;

/// 一次 watch 订阅
///
/// 持有后台任务及其取消令牌。`stop` 幂等，可以在任意任务中调用；
/// 句柄被 drop 时同样会取消后台任务。任务退出后快照通道随之关闭。
pub struct WatchHandle {
    service_name: String,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WatchHandle {
    /// 启动 watch 任务
    ///
    /// `run` 收到取消令牌，令牌触发后应尽快返回
    pub fn spawn<F, Fut>(service_name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(token.clone()));
        Self {
            service_name: service_name.into(),
            token,
            task: Mutex::new(Some(handle)),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 是否已经停止（或正在停止）
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 取消 watch 并等待后台任务退出
    pub async fn stop(&self) -> Result<()> {
        self.token.cancel();
        let task = self.task.lock().await.take();
        match task {
            Some(handle) => handle.await.map_err(|e| RegistryError::WatchTask {
                target: self.service_name.clone(),
                reason: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("service_name", &self.service_name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// 发送快照，与取消竞争
///
/// 返回 `false` 表示 watch 已取消或消费者已离开，调用方应退出循环
pub(crate) async fn send_snapshot(
    tx: &mpsc::Sender<Vec<Service>>,
    token: &CancellationToken,
    snapshot: Vec<Service>,
) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = tx.send(snapshot) => sent.is_ok(),
    }
}
