//! 后端客户端
//!
//! 客户端由调用方构建一次，之后以共享句柄注入各注册器与发现器

#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "etcd")]
pub mod etcd;

#[cfg(feature = "consul")]
pub use consul::ConsulClient;
#[cfg(feature = "etcd")]
pub use etcd::connect as connect_etcd;
