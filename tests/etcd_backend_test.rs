//! etcd 后端集成测试
//!
//! 这些测试需要运行中的 etcd 服务器实例。
//! 默认情况下，测试会被忽略，需要使用 `cargo test --test etcd_backend_test -- --ignored` 运行。
//!
//! 启动 etcd 服务器：
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 -p 2380:2380 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```

#![cfg(feature = "etcd")]

use flare_registry::{
    BackendType, EtcdConfig, RegistryConfig, RegistryFactory, Service, SnapshotReceiver,
};
use tokio::time::{Duration, sleep, timeout};

/// etcd 服务器地址
/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖，默认为 http://127.0.0.1:2379
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

/// 测试 key 前缀，与其他数据隔离
const TEST_PREFIX: &str = "/flare-test/services";

/// 创建测试用的 etcd 配置
fn create_test_config() -> RegistryConfig {
    RegistryConfig {
        backend: BackendType::Etcd,
        etcd: EtcdConfig {
            endpoints: etcd_endpoints(),
            lease_ttl_secs: 5,
            key_prefix: TEST_PREFIX.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// 创建测试用的服务实例
fn create_test_instance(service_name: &str, port: u16) -> Service {
    Service::new(service_name, "127.0.0.1", port)
        .with_metadata("env", "test")
        .with_metadata("region", "us-east-1")
        .with_weight(40.0)
}

async fn next_matching<F>(rx: &mut SnapshotReceiver, mut matches: F) -> Vec<Service>
where
    F: FnMut(&[Service]) -> bool,
{
    timeout(Duration::from_secs(3), async {
        loop {
            let snapshot = rx.recv().await.expect("watch channel closed");
            if matches(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("no matching snapshot within 3s")
}

/// 测试：重复注册不产生重复实例
#[tokio::test]
#[ignore]
async fn test_etcd_register() {
    let (registry, discovery) = RegistryFactory::create_backend(&create_test_config())
        .await
        .expect("Failed to create etcd backend");

    let instance = create_test_instance("test-register", 8080);
    registry
        .register(&instance)
        .await
        .expect("Failed to register service");
    registry
        .register(&instance)
        .await
        .expect("Failed to re-register service");

    let instances = discovery
        .get_instances("test-register")
        .await
        .expect("Failed to discover services");
    assert_eq!(
        instances.iter().filter(|i| i.id() == instance.id()).count(),
        1,
        "Expected exactly one registration"
    );

    registry.shutdown().await.expect("Failed to shut down registry");
}

/// 测试：服务注销
#[tokio::test]
#[ignore]
async fn test_etcd_deregister() {
    let (registry, discovery) = RegistryFactory::create_backend(&create_test_config())
        .await
        .expect("Failed to create etcd backend");

    let instance = create_test_instance("test-deregister", 8081);
    registry.register(&instance).await.expect("Failed to register service");
    registry
        .deregister(&instance)
        .await
        .expect("Failed to deregister service");

    let instances = discovery
        .get_instances("test-deregister")
        .await
        .expect("Failed to discover services");
    assert!(
        !instances.iter().any(|i| i.id() == instance.id()),
        "Service instance still exists after deregistration"
    );
}

/// 测试：权重随 value 一起保存
#[tokio::test]
#[ignore]
async fn test_etcd_weights() {
    let (registry, discovery) = RegistryFactory::create_backend(&create_test_config())
        .await
        .expect("Failed to create etcd backend");

    let s1 = Service::new("test-weights", "10.0.0.1", 9000).with_weight(40.0);
    let s2 = Service::new("test-weights", "10.0.0.2", 9000).with_weight(40.0);
    let (r1, r2) = tokio::join!(registry.register(&s1), registry.register(&s2));
    r1.expect("Failed to register s1");
    r2.expect("Failed to register s2");

    let instances = discovery
        .get_instances("test-weights")
        .await
        .expect("Failed to discover services");
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|i| i.weight == 40.0));

    registry.shutdown().await.expect("Failed to shut down registry");
}

/// 测试：watch 推送注册与注销
#[tokio::test]
#[ignore]
async fn test_etcd_watch() {
    let (registry, discovery) = RegistryFactory::create_backend(&create_test_config())
        .await
        .expect("Failed to create etcd backend");

    let (mut rx, handle) = discovery
        .watch("test-watch")
        .await
        .expect("Failed to watch service");

    let instance = create_test_instance("test-watch", 8082);
    registry.register(&instance).await.expect("Failed to register service");
    let snapshot = next_matching(&mut rx, |s| s.iter().any(|i| i.id() == instance.id())).await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0], instance);

    registry
        .deregister(&instance)
        .await
        .expect("Failed to deregister service");
    next_matching(&mut rx, |s| s.is_empty()).await;

    handle.stop().await.expect("Failed to stop watch");
    handle.stop().await.expect("Second stop failed");
}

/// 测试：租约在保活下不会过期
#[tokio::test]
#[ignore]
async fn test_etcd_keep_alive() {
    let (registry, discovery) = RegistryFactory::create_backend(&create_test_config())
        .await
        .expect("Failed to create etcd backend");

    let instance = create_test_instance("test-keepalive", 8083);
    registry.register(&instance).await.expect("Failed to register service");

    // 超过租约 TTL
    sleep(Duration::from_secs(8)).await;

    let instances = discovery
        .get_instances("test-keepalive")
        .await
        .expect("Failed to discover services");
    assert!(
        instances.iter().any(|i| i.id() == instance.id()),
        "Instance expired despite keep-alive"
    );

    registry.shutdown().await.expect("Failed to shut down registry");
}

/// 按实例 key 查询当前绑定的租约
async fn lease_of(client: &mut etcd_client::Client, instance: &Service) -> Option<i64> {
    let key = format!("{}/{}/{}", TEST_PREFIX, instance.name, instance.id());
    let resp = client.get(key, None).await.expect("Failed to read instance key");
    resp.kvs().first().map(|kv| kv.lease())
}

/// 测试：租约被外部回收后自动重新注册
#[tokio::test]
#[ignore]
async fn test_etcd_reregister_after_lease_revoked() {
    let (registry, discovery) = RegistryFactory::create_backend(&create_test_config())
        .await
        .expect("Failed to create etcd backend");
    let mut admin = etcd_client::Client::connect(etcd_endpoints(), None)
        .await
        .expect("Failed to connect admin client");

    let instance = create_test_instance("test-relet", 8084);
    registry.register(&instance).await.expect("Failed to register service");

    let old_lease = lease_of(&mut admin, &instance)
        .await
        .expect("Instance key not found after registration");
    admin
        .lease_revoke(old_lease)
        .await
        .expect("Failed to revoke lease");

    // 回收会同时删除 key；保活任务应在约 1 秒退避后重新写入
    timeout(Duration::from_secs(3), async {
        loop {
            let instances = discovery
                .get_instances("test-relet")
                .await
                .expect("Failed to discover services");
            if instances.iter().any(|i| i.id() == instance.id()) {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("Instance was not re-registered within 3s");

    let new_lease = lease_of(&mut admin, &instance)
        .await
        .expect("Instance key missing after re-registration");
    assert_ne!(new_lease, old_lease, "Expected a fresh lease");

    // 新租约同样被续租，超过一个 TTL 后依然存在
    sleep(Duration::from_secs(6)).await;
    let instances = discovery
        .get_instances("test-relet")
        .await
        .expect("Failed to discover services");
    assert!(
        instances.iter().any(|i| i.id() == instance.id()),
        "Re-registered instance expired"
    );

    registry.shutdown().await.expect("Failed to shut down registry");
}
