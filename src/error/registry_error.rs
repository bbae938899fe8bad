//! 注册发现统一错误类型

use super::code::ErrorCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 装箱的底层错误（etcd / HTTP / 编解码）
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 出错时正在执行的后端操作，用于错误上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Deregister,
    Heartbeat,
    Query,
    Watch,
    Probe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Register => "register",
            Operation::Deregister => "deregister",
            Operation::Heartbeat => "heartbeat",
            Operation::Query => "query",
            Operation::Watch => "watch",
            Operation::Probe => "probe",
        };
        f.write_str(name)
    }
}

/// 注册发现统一错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    /// 配置错误
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 客户端创建或连通性探测失败
    #[error("failed to connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: BoxError,
    },

    /// 后端 RPC / HTTP 调用失败
    #[error("{op} failed for {target}: {source}")]
    Backend {
        op: Operation,
        target: String,
        #[source]
        source: BoxError,
    },

    /// 有界操作超时
    #[error("{op} timed out for {target} after {after:?}")]
    Timeout {
        op: Operation,
        target: String,
        after: Duration,
    },

    /// 服务编码失败
    #[error("failed to encode service {target}: {source}")]
    Encode {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    /// 存储值解码失败
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: BoxError,
    },

    /// 负载均衡没有可选实例
    #[error("no instance available for service {service}")]
    NoInstanceAvailable { service: String },

    /// watch 任务异常退出
    #[error("watch task for {target} ended abnormally: {reason}")]
    WatchTask { target: String, reason: String },
}

impl RegistryError {
    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        RegistryError::Config(msg.into())
    }

    /// 创建连接错误
    pub fn connection(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RegistryError::Connection {
            target: target.into(),
            source: source.into(),
        }
    }

    /// 创建后端调用错误
    pub fn backend(op: Operation, target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RegistryError::Backend {
            op,
            target: target.into(),
            source: source.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(op: Operation, target: impl Into<String>, after: Duration) -> Self {
        RegistryError::Timeout {
            op,
            target: target.into(),
            after,
        }
    }

    /// 创建解码错误
    pub fn decode(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RegistryError::Decode {
            context: context.into(),
            source: source.into(),
        }
    }

    /// 创建无可用实例错误
    pub fn no_instance(service: impl Into<String>) -> Self {
        RegistryError::NoInstanceAvailable {
            service: service.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::Config(_) => ErrorCode::ConfigurationError,
            RegistryError::Connection { .. } => ErrorCode::ConnectionFailed,
            RegistryError::Backend { op, .. } => match op {
                Operation::Register | Operation::Heartbeat => ErrorCode::RegisterFailed,
                Operation::Deregister => ErrorCode::DeregisterFailed,
                Operation::Query => ErrorCode::QueryFailed,
                Operation::Watch => ErrorCode::WatchFailed,
                Operation::Probe => ErrorCode::ConnectionFailed,
            },
            RegistryError::Timeout { op, .. } => match op {
                Operation::Probe => ErrorCode::ConnectionTimeout,
                _ => ErrorCode::OperationTimeout,
            },
            RegistryError::Encode { .. } => ErrorCode::SerializationError,
            RegistryError::Decode { .. } => ErrorCode::DeserializationError,
            RegistryError::NoInstanceAvailable { .. } => ErrorCode::NoInstanceAvailable,
            RegistryError::WatchTask { .. } => ErrorCode::InternalError,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_carry_operation_and_target() {
        let err = RegistryError::backend(Operation::Register, "echo-10.0.0.1:80", "connection reset");
        assert_eq!(
            err.to_string(),
            "register failed for echo-10.0.0.1:80: connection reset"
        );
        assert_eq!(err.code(), ErrorCode::RegisterFailed);
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_and_config_errors_are_final() {
        let err = RegistryError::decode("key /services/echo/x", "invalid base64");
        assert_eq!(err.code(), ErrorCode::DeserializationError);
        assert!(!err.is_retryable());
        assert!(!RegistryError::config("empty endpoints").is_retryable());
    }

    #[test]
    fn probe_timeout_is_a_connection_timeout() {
        let err = RegistryError::timeout(Operation::Probe, "etcd", Duration::from_secs(5));
        assert_eq!(err.code(), ErrorCode::ConnectionTimeout);
    }
}
