//! Concurrent access to the host connection pool.

use async_trait::async_trait;
use flotilla_core::runtime::{RuntimeConnector, RuntimeResult, StackRef};
use flotilla_core::{
    ContainerSpec, FleetError, HealthStatus, HostConnectionPool, ResourceLoad, RuntimeClient,
    RuntimeError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockClient {
    endpoint: String,
    up: Arc<AtomicBool>,
}

#[async_trait]
impl RuntimeClient for MockClient {
    async fn ping(&self) -> RuntimeResult<()> {
        tokio::task::yield_now().await;
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Unreachable(self.endpoint.clone()))
        }
    }

    async fn create_and_start(
        &self,
        _stack: StackRef<'_>,
        spec: &ContainerSpec,
        _env: &HashMap<String, String>,
    ) -> RuntimeResult<String> {
        Ok(spec.name.clone())
    }

    async fn stop(&self, _container_id: &str, _timeout: Duration) -> RuntimeResult<()> {
        Ok(())
    }

    async fn remove(&self, _container_id: &str, _remove_volumes: bool) -> RuntimeResult<()> {
        Ok(())
    }

    async fn load(&self) -> RuntimeResult<ResourceLoad> {
        Ok(ResourceLoad::default())
    }
}

/// Every handle shares one liveness switch.
struct MockConnector {
    up: Arc<AtomicBool>,
}

#[async_trait]
impl RuntimeConnector for MockConnector {
    async fn connect(&self, endpoint: &str) -> RuntimeResult<Arc<dyn RuntimeClient>> {
        Ok(Arc::new(MockClient { endpoint: endpoint.to_string(), up: self.up.clone() }))
    }
}

fn pool() -> (HostConnectionPool, Arc<AtomicBool>) {
    let up = Arc::new(AtomicBool::new(true));
    let pool = HostConnectionPool::new(
        Arc::new(MockConnector { up: up.clone() }),
        Duration::from_secs(1),
    );
    (pool, up)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_get_remove() {
    let (pool, _) = pool();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("h{}", i);
            pool.add_host(&id, &format!("tcp://{}:2375", id)).await.unwrap();
            pool.get_client(&id).await.unwrap();
            if i % 2 == 0 {
                pool.remove_host(&id).await.unwrap();
                let err = pool.get_client(&id).await.err().unwrap();
                assert!(matches!(err, FleetError::HostNotFound { .. }));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let hosts = pool.list_hosts().await;
    assert_eq!(hosts.len(), 16);
    assert!(hosts.iter().all(|id| id[1..].parse::<u32>().unwrap() % 2 == 1));
}

#[tokio::test]
async fn test_health_check() {
    let (pool, up) = pool();
    assert_eq!(pool.health_check().await.status, HealthStatus::Unhealthy);

    pool.add_host("h1", "tcp://h1:2375").await.unwrap();
    pool.add_host("h2", "tcp://h2:2375").await.unwrap();
    let health = pool.health_check().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.is_ready());

    up.store(false, Ordering::SeqCst);
    let health = pool.health_check().await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.hosts.len(), 2);
    assert!(health.hosts.iter().all(|h| h.message.is_some()));
}
