//! Flare Registry Library
//!
//! Service registration and discovery over Consul and etcd: instance codec,
//! registries with liveness keep-alive, snapshot queries and watch streams,
//! and a pluggable load balancer on top.

pub mod client;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod logging;
pub mod registry;
pub mod retry;
pub mod service;

// Re-exports
pub use codec::{encode_service, parse_service, service_id};
pub use config::{BackendType, ConsulConfig, EtcdConfig, LoggingConfig, RegistryConfig};
pub use discovery::{ServiceDiscovery, SnapshotReceiver, WatchHandle};
pub use error::{ErrorCategory, ErrorCode, Operation, RegistryError, Result};
pub use factory::{Backend, RegistryFactory};
pub use registry::{
    LoadBalanceStrategy, LoadBalancer, Random, RoundRobin, ServiceRegistry, StrategyKind,
    WeightedRandom,
};
pub use service::Service;

#[cfg(feature = "consul")]
pub use discovery::ConsulDiscovery;
#[cfg(feature = "consul")]
pub use registry::ConsulRegistry;
#[cfg(feature = "etcd")]
pub use discovery::EtcdDiscovery;
#[cfg(feature = "etcd")]
pub use registry::EtcdRegistry;
