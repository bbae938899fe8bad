//! 进程内的 Consul agent 模拟
//!
//! 只实现注册发现用到的接口：服务注册/注销、TTL 检查 pass、
//! 健康查询（含 `index` + `wait` 阻塞查询）以及 leader 探测。
//! TTL 不会自动过期，检查状态只由 pass 和注册驱动。

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct AgentService {
    id: String,
    name: String,
    address: String,
    port: u16,
    meta: Value,
    check_id: String,
    passing: bool,
}

struct Inner {
    services: Mutex<HashMap<String, AgentService>>,
    index: watch::Sender<u64>,
    pass_count: Mutex<HashMap<String, usize>>,
    health_requests: AtomicUsize,
    omit_index: AtomicBool,
}

/// 模拟 agent 的句柄
#[derive(Clone)]
pub struct FakeConsul {
    inner: Arc<Inner>,
}

impl FakeConsul {
    /// 在随机端口上启动，返回句柄与 base url
    pub async fn start() -> (Self, String) {
        let (index, _) = watch::channel(1u64);
        let agent = FakeConsul {
            inner: Arc::new(Inner {
                services: Mutex::new(HashMap::new()),
                index,
                pass_count: Mutex::new(HashMap::new()),
                health_requests: AtomicUsize::new(0),
                omit_index: AtomicBool::new(false),
            }),
        };

        let app = Router::new()
            .route("/v1/agent/service/register", put(register))
            .route("/v1/agent/service/deregister/{id}", put(deregister))
            .route("/v1/agent/check/pass/{check_id}", put(pass))
            .route("/v1/health/service/{name}", get(health))
            .route("/v1/status/leader", get(leader))
            .with_state(agent.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (agent, format!("http://{}", addr))
    }

    fn bump(&self) {
        self.inner.index.send_modify(|i| *i += 1);
    }

    /// 模拟 agent 丢失服务（例如 agent 重启）
    pub fn drop_service(&self, id: &str) {
        if self.inner.services.lock().unwrap().remove(id).is_some() {
            self.bump();
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.services.lock().unwrap().contains_key(id)
    }

    pub fn is_passing(&self, id: &str) -> bool {
        self.inner
            .services
            .lock()
            .unwrap()
            .get(id)
            .map(|s| s.passing)
            .unwrap_or(false)
    }

    pub fn registered_count(&self) -> usize {
        self.inner.services.lock().unwrap().len()
    }

    /// 健康查询不再返回 `X-Consul-Index`（部分代理会丢弃该头）
    pub fn omit_index_header(&self) {
        self.inner.omit_index.store(true, Ordering::SeqCst);
    }

    /// 收到的健康查询次数
    pub fn health_requests(&self) -> usize {
        self.inner.health_requests.load(Ordering::SeqCst)
    }

    /// 某个检查收到的 pass 次数
    pub fn pass_count(&self, check_id: &str) -> usize {
        self.inner
            .pass_count
            .lock()
            .unwrap()
            .get(check_id)
            .copied()
            .unwrap_or(0)
    }
}

async fn register(State(agent): State<FakeConsul>, Json(body): Json<Value>) -> StatusCode {
    let (Some(id), Some(name)) = (body["ID"].as_str(), body["Name"].as_str()) else {
        return StatusCode::BAD_REQUEST;
    };
    let service = AgentService {
        id: id.to_string(),
        name: name.to_string(),
        address: body["Address"].as_str().unwrap_or_default().to_string(),
        port: body["Port"].as_u64().unwrap_or_default() as u16,
        meta: body["Meta"].clone(),
        check_id: body["Check"]["CheckID"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("service:{}", id)),
        // TTL 检查注册后初始为 critical
        passing: false,
    };
    agent
        .inner
        .services
        .lock()
        .unwrap()
        .insert(service.id.clone(), service);
    agent.bump();
    StatusCode::OK
}

async fn deregister(State(agent): State<FakeConsul>, Path(id): Path<String>) -> StatusCode {
    agent.drop_service(&id);
    StatusCode::OK
}

async fn pass(State(agent): State<FakeConsul>, Path(check_id): Path<String>) -> StatusCode {
    *agent
        .inner
        .pass_count
        .lock()
        .unwrap()
        .entry(check_id.clone())
        .or_insert(0) += 1;

    let changed = {
        let mut services = agent.inner.services.lock().unwrap();
        match services.values_mut().find(|s| s.check_id == check_id) {
            Some(service) => {
                let changed = !service.passing;
                service.passing = true;
                changed
            }
            None => return StatusCode::NOT_FOUND,
        }
    };
    if changed {
        agent.bump();
    }
    StatusCode::OK
}

fn parse_wait(raw: Option<&String>) -> Duration {
    let Some(raw) = raw else {
        return Duration::from_secs(300);
    };
    if let Some(ms) = raw.strip_suffix("ms") {
        return Duration::from_millis(ms.parse().unwrap_or(0));
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return Duration::from_secs(secs.parse().unwrap_or(0));
    }
    Duration::from_secs(300)
}

async fn health(
    State(agent): State<FakeConsul>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    agent.inner.health_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(requested) = params.get("index").and_then(|i| i.parse::<u64>().ok()) {
        let mut rx = agent.inner.index.subscribe();
        let deadline = tokio::time::sleep(parse_wait(params.get("wait")));
        tokio::pin!(deadline);
        loop {
            let current = *rx.borrow_and_update();
            if current > requested {
                break;
            }
            tokio::select! {
                _ = &mut deadline => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    let passing_only = params.get("passing").map(|p| p == "true").unwrap_or(false);
    let index = *agent.inner.index.borrow();
    let entries: Vec<Value> = agent
        .inner
        .services
        .lock()
        .unwrap()
        .values()
        .filter(|s| s.name == name && (!passing_only || s.passing))
        .map(|s| {
            json!({
                "Node": { "Node": "fake", "Address": "127.0.0.1" },
                "Service": {
                    "ID": s.id,
                    "Service": s.name,
                    "Address": s.address,
                    "Port": s.port,
                    "Meta": s.meta,
                },
                "Checks": [],
            })
        })
        .collect();

    if agent.inner.omit_index.load(Ordering::SeqCst) {
        return Json(entries).into_response();
    }
    ([("X-Consul-Index", index.to_string())], Json(entries)).into_response()
}

async fn leader() -> Json<String> {
    Json("127.0.0.1:8300".to_string())
}
