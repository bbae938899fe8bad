//! 错误处理模块
//!
//! 区分配置、连接、后端 I/O、编解码与负载均衡错误，并提供错误代码分类

pub mod code;
pub mod registry_error;

pub use code::{ErrorCategory, ErrorCode};
pub use registry_error::{BoxError, Operation, RegistryError, Result};
