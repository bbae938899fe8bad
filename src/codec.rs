//! 服务编解码
//!
//! 存储值格式为 base64(JSON(Service))，实例 ID 由 `(name, ip, port)` 推导。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;

use crate::error::{RegistryError, Result};
use crate::service::{Service, WEIGHT_METADATA_KEY};

/// 实例 ID：`"{name}-{ip}:{port}"`
pub fn service_id(service: &Service) -> String {
    format!("{}-{}:{}", service.name, service.ip, service.port)
}

/// 权重必须是有限值，否则 JSON 中会变成 `null` 而无法解码
pub(crate) fn check_weight(service: &Service) -> Result<()> {
    if service.weight.is_finite() {
        return Ok(());
    }
    Err(RegistryError::Encode {
        target: service_id(service),
        source: serde::ser::Error::custom(format!("weight must be finite, got {}", service.weight)),
    })
}

/// 编码服务实例为不透明字符串
pub fn encode_service(service: &Service) -> Result<String> {
    check_weight(service)?;
    let json = serde_json::to_vec(service).map_err(|source| RegistryError::Encode {
        target: service_id(service),
        source,
    })?;
    Ok(STANDARD.encode(json))
}

/// 解析 `encode_service` 产生的字符串
pub fn parse_service(value: &str) -> Result<Service> {
    let json = STANDARD
        .decode(value.trim())
        .map_err(|e| RegistryError::decode("service value (base64)", e))?;
    serde_json::from_slice(&json).map_err(|e| RegistryError::decode("service value (json)", e))
}

/// 从元数据中取出保留的权重键
///
/// 缺失时权重为 0；值无法解析为浮点数时返回解码错误
pub(crate) fn split_weight(
    mut metadata: HashMap<String, String>,
) -> Result<(HashMap<String, String>, f64)> {
    let weight = match metadata.remove(WEIGHT_METADATA_KEY) {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|e| RegistryError::decode(format!("metadata {WEIGHT_METADATA_KEY}={raw}"), e))?,
        None => 0.0,
    };
    Ok((metadata, weight))
}
