//! Consul HTTP API 客户端
//!
//! 只覆盖注册发现用到的 agent / health / status 接口

use reqwest::{Client as HttpClient, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::ConsulConfig;
use crate::error::{Operation, RegistryError, Result};

/// 服务注册请求体
#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulService {
    pub ID: String,
    pub Name: String,
    pub Tags: Vec<String>,
    pub Address: String,
    pub Port: u16,
    pub Meta: HashMap<String, String>,
    pub Check: ConsulCheck,
}

/// TTL 健康检查
#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulCheck {
    pub CheckID: String,
    pub TTL: String,
    pub DeregisterCriticalServiceAfter: String,
}

/// `/v1/health/service/:name` 返回的单条记录
#[allow(non_snake_case)]
#[derive(Debug, Clone, Deserialize)]
pub struct HealthEntry {
    #[serde(default)]
    pub Node: HealthNode,
    pub Service: HealthService,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthNode {
    #[serde(default)]
    pub Address: String,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, Deserialize)]
pub struct HealthService {
    pub ID: String,
    pub Service: String,
    #[serde(default)]
    pub Address: String,
    pub Port: u16,
    #[serde(default)]
    pub Meta: Option<HashMap<String, String>>,
}

/// 健康查询结果及其 `X-Consul-Index`
#[derive(Debug, Clone)]
pub struct HealthResponse {
    pub entries: Vec<HealthEntry>,
    pub index: u64,
}

/// Consul agent 客户端
///
/// 内部的 `reqwest::Client` 自带连接池，clone 只复制句柄
#[derive(Clone)]
pub struct ConsulClient {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
}

impl ConsulClient {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| RegistryError::connection(config.address.clone(), e))?;

        Ok(Self {
            http_client,
            base_url: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            datacenter: config.datacenter.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_auth(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        request
    }

    async fn put_agent(&self, op: Operation, target: &str, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        self.with_auth(self.http_client.put(&url))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RegistryError::backend(op, target, e))?;
        Ok(())
    }

    /// 注册服务（相同 ID 重复注册会覆盖）
    pub async fn register_service(&self, service: &ConsulService) -> Result<()> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        self.with_auth(self.http_client.put(&url))
            .json(service)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RegistryError::backend(Operation::Register, &service.ID, e))?;
        Ok(())
    }

    pub async fn deregister_service(&self, service_id: &str) -> Result<()> {
        self.put_agent(
            Operation::Deregister,
            service_id,
            &format!("/v1/agent/service/deregister/{}", service_id),
        )
        .await
    }

    /// 将 TTL 检查置为 passing
    pub async fn pass_ttl(&self, check_id: &str) -> Result<()> {
        self.put_agent(
            Operation::Heartbeat,
            check_id,
            &format!("/v1/agent/check/pass/{}", check_id),
        )
        .await
    }

    /// 查询服务健康实例
    ///
    /// `index` 为 `Some` 时发起阻塞查询，最多等待 `wait` 直到索引变化
    pub async fn health_service(
        &self,
        service_name: &str,
        passing_only: bool,
        index: Option<u64>,
        wait: Duration,
    ) -> Result<HealthResponse> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service_name);
        let mut query: Vec<(&str, String)> = Vec::new();
        if passing_only {
            query.push(("passing", "true".to_string()));
        }
        if let Some(dc) = &self.datacenter {
            query.push(("dc", dc.clone()));
        }
        query.push(("wait", format!("{}ms", wait.as_millis())));

        let mut request = self.http_client.get(&url);
        if let Some(index) = index {
            query.push(("index", index.to_string()));
            // Consul 会在 wait 上叠加最多 wait/16 的抖动
            request = request.timeout(wait + wait / 16 + Duration::from_secs(5));
        }

        let op = if index.is_some() {
            Operation::Watch
        } else {
            Operation::Query
        };
        let resp = self
            .with_auth(request.query(&query))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RegistryError::backend(op, service_name, e))?;

        let index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let entries = resp
            .json::<Vec<HealthEntry>>()
            .await
            .map_err(|e| RegistryError::decode(format!("consul health response for {}", service_name), e))?;

        Ok(HealthResponse { entries, index })
    }

    /// 连通性探测
    pub async fn leader(&self) -> Result<String> {
        let url = format!("{}/v1/status/leader", self.base_url);
        self.with_auth(self.http_client.get(&url))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| RegistryError::backend(Operation::Probe, &self.base_url, e))?
            .json::<String>()
            .await
            .map_err(|e| RegistryError::backend(Operation::Probe, &self.base_url, e))
    }
}
