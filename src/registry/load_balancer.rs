//! 负载均衡模块
//!
//! 提供多种负载均衡策略，用于从多个服务实例中选择一个；
//! `LoadBalancer` 在服务发现之上组合策略，并可选地用 watch 维护实例缓存

use futures::future::join_all;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::{ServiceDiscovery, WatchHandle};
use crate::error::{RegistryError, Result};
use crate::service::Service;

/// 负载均衡策略
pub trait LoadBalanceStrategy: Send + Sync {
    /// 从实例列表中选择一个，列表为空时返回 `NoInstanceAvailable`
    fn select(&self, instances: &[Service]) -> Result<Service>;
}

fn service_name_of(instances: &[Service]) -> &str {
    instances.first().map(|s| s.name.as_str()).unwrap_or_default()
}

/// 轮询（Round Robin）
#[derive(Debug, Default)]
pub struct RoundRobin {
    index: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalanceStrategy for RoundRobin {
    fn select(&self, instances: &[Service]) -> Result<Service> {
        if instances.is_empty() {
            return Err(RegistryError::no_instance(service_name_of(instances)));
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        Ok(instances[index % instances.len()].clone())
    }
}

/// 随机（Random）
#[derive(Debug, Default, Clone, Copy)]
pub struct Random;

impl LoadBalanceStrategy for Random {
    fn select(&self, instances: &[Service]) -> Result<Service> {
        instances
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| RegistryError::no_instance(service_name_of(instances)))
    }
}

/// 加权随机（Weighted Random）
///
/// 按 `weight` 成比例选择，非正权重的实例不参与；全部非正时退化为均匀随机
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandom;

impl LoadBalanceStrategy for WeightedRandom {
    fn select(&self, instances: &[Service]) -> Result<Service> {
        let total: f64 = instances
            .iter()
            .map(|s| s.weight)
            .filter(|w| w.is_finite() && *w > 0.0)
            .sum();
        if total <= 0.0 {
            return Random.select(instances);
        }

        let mut point = rand::thread_rng().gen_range(0.0..total);
        let mut chosen = None;
        for instance in instances {
            if !(instance.weight.is_finite() && instance.weight > 0.0) {
                continue;
            }
            chosen = Some(instance);
            if point < instance.weight {
                break;
            }
            point -= instance.weight;
        }
        // 浮点误差时落到最后一个正权重实例
        chosen
            .cloned()
            .ok_or_else(|| RegistryError::no_instance(service_name_of(instances)))
    }
}

/// 配置中的策略名
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Random,
    WeightedRandom,
}

impl StrategyKind {
    /// 构建对应的策略实例
    pub fn build(self) -> Box<dyn LoadBalanceStrategy> {
        match self {
            StrategyKind::RoundRobin => Box::new(RoundRobin::new()),
            StrategyKind::Random => Box::new(Random),
            StrategyKind::WeightedRandom => Box::new(WeightedRandom),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(StrategyKind::RoundRobin),
            "random" => Ok(StrategyKind::Random),
            "weighted_random" => Ok(StrategyKind::WeightedRandom),
            _ => Err(format!("Unknown load balance strategy: {}", s)),
        }
    }
}

type InstanceCache = Arc<RwLock<HashMap<String, Vec<Service>>>>;

struct CacheWatch {
    handle: WatchHandle,
    consumer: JoinHandle<()>,
}

/// 负载均衡器
///
/// 默认每次选择都向服务发现做一次完整查询；对某个服务调用
/// `watch_service` 后改为使用由 watch 维护的缓存快照
pub struct LoadBalancer {
    discovery: Arc<dyn ServiceDiscovery>,
    strategy: Box<dyn LoadBalanceStrategy>,
    cache: InstanceCache,
    watches: Mutex<HashMap<String, CacheWatch>>,
}

impl LoadBalancer {
    /// 创建新的负载均衡器
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, strategy: Box<dyn LoadBalanceStrategy>) -> Self {
        Self {
            discovery,
            strategy,
            cache: Arc::new(RwLock::new(HashMap::new())),
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// 按配置的策略名创建
    pub fn with_kind(discovery: Arc<dyn ServiceDiscovery>, kind: StrategyKind) -> Self {
        Self::new(discovery, kind.build())
    }

    /// 选择一个服务实例
    pub async fn get_instance(&self, service_name: &str) -> Result<Service> {
        let cached = self.cache.read().await.get(service_name).cloned();
        let instances = match cached {
            Some(instances) => instances,
            None => self.discovery.get_instances(service_name).await?,
        };

        self.strategy.select(&instances).map_err(|e| match e {
            RegistryError::NoInstanceAvailable { .. } => RegistryError::no_instance(service_name),
            other => other,
        })
    }

    /// 订阅服务变化并维护本地缓存，重复调用无副作用
    pub async fn watch_service(&self, service_name: &str) -> Result<()> {
        let mut watches = self.watches.lock().await;
        if let Some(existing) = watches.get(service_name) {
            if !existing.consumer.is_finished() {
                return Ok(());
            }
        }

        let (mut rx, handle) = self.discovery.watch(service_name).await?;

        let cache = self.cache.clone();
        let name = service_name.to_string();
        let ended = Arc::new(AtomicBool::new(false));
        let consumer_ended = ended.clone();
        let consumer = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                debug!(service = %name, count = snapshot.len(), "Instance cache updated");
                cache.write().await.insert(name.clone(), snapshot);
            }
            // watch 结束后缓存不再可信，回退到实时查询；
            // 结束标记与移除在同一把写锁下完成
            let mut guard = cache.write().await;
            consumer_ended.store(true, Ordering::SeqCst);
            guard.remove(&name);
            drop(guard);
            debug!(service = %name, "Instance cache watch ended");
        });

        // 预热缓存；watch 已经推送过快照时不覆盖
        match self.discovery.get_instances(service_name).await {
            Ok(instances) => {
                let mut cache = self.cache.write().await;
                if !ended.load(Ordering::SeqCst) {
                    cache.entry(service_name.to_string()).or_insert(instances);
                }
            }
            Err(e) => {
                warn!(service = %service_name, error = %e, "Failed to prime instance cache");
            }
        }

        if let Some(replaced) = watches.insert(service_name.to_string(), CacheWatch { handle, consumer }) {
            replaced.handle.stop().await?;
        }
        info!(service = %service_name, "Watching service for load balancing");
        Ok(())
    }

    /// 停止所有缓存 watch 并清空缓存
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<CacheWatch> = self.watches.lock().await.drain().map(|(_, w)| w).collect();

        let results = join_all(drained.into_iter().map(|watch| async move {
            let stopped = watch.handle.stop().await;
            if let Err(e) = watch.consumer.await {
                debug!(error = %e, "Instance cache consumer ended abnormally");
            }
            stopped
        }))
        .await;

        self.cache.write().await.clear();
        results.into_iter().collect()
    }
}
