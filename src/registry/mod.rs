//! 服务注册模块
//!
//! 支持 Consul 和 etcd 两种注册后端，以及基于服务发现的负载均衡

#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "etcd")]
pub mod etcd;
mod keepalive;
pub mod load_balancer;
pub mod trait_def;

#[cfg(feature = "consul")]
pub use consul::ConsulRegistry;
#[cfg(feature = "etcd")]
pub use etcd::EtcdRegistry;
pub use load_balancer::{
    LoadBalanceStrategy, LoadBalancer, Random, RoundRobin, StrategyKind, WeightedRandom,
};
pub use trait_def::ServiceRegistry;
