//! Host connection pool.
//!
//! Owns one `RuntimeClient` per registered host. The registry is a
//! readers-writer map: lookups and listings share the lock, while
//! registration, removal and close take it exclusively. Connecting and
//! pinging a new host happen before the lock is taken, so a slow or dead
//! endpoint never blocks lookups.

use crate::config::HostEntry;
use crate::error::{FleetError, Result};
use crate::observability::health::{HostHealth, PoolHealth};
use crate::observability::metrics;
use crate::runtime::{with_timeout, RuntimeClient, RuntimeConnector};
use crate::types::ResourceLoad;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Registry of live runtime handles keyed by host ID.
#[derive(Clone)]
pub struct HostConnectionPool {
    clients: Arc<RwLock<HashMap<String, Arc<dyn RuntimeClient>>>>,
    connector: Arc<dyn RuntimeConnector>,
    ping_timeout: Duration,
}

impl HostConnectionPool {
    pub fn new(connector: Arc<dyn RuntimeConnector>, ping_timeout: Duration) -> Self {
        Self { clients: Arc::new(RwLock::new(HashMap::new())), connector, ping_timeout }
    }

    /// Connect to `endpoint`, verify liveness and register the handle.
    ///
    /// On failure nothing is registered. An existing handle for the same ID
    /// is closed and replaced.
    #[instrument(skip(self), fields(host_id = %host_id))]
    pub async fn add_host(&self, host_id: &str, endpoint: &str) -> Result<()> {
        let connection_error = |reason: String| FleetError::Connection {
            host_id: host_id.to_string(),
            reason,
        };

        let client = with_timeout(self.ping_timeout, "connect", self.connector.connect(endpoint))
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        if let Err(e) = with_timeout(self.ping_timeout, "ping", client.ping()).await {
            metrics::record_ping_failure(host_id);
            client.close().await;
            return Err(connection_error(e.to_string()));
        }

        let mut clients = self.clients.write().await;
        if let Some(previous) = clients.remove(host_id) {
            debug!("Closing previous handle");
            previous.close().await;
        }
        clients.insert(host_id.to_string(), client);
        metrics::set_registered_hosts(clients.len());

        info!(endpoint, "Host registered");
        Ok(())
    }

    /// Register every configured host concurrently, returning the failures.
    pub async fn register_all(&self, hosts: &[HostEntry]) -> Vec<FleetError> {
        let results =
            join_all(hosts.iter().map(|h| self.add_host(&h.id, &h.endpoint))).await;

        results
            .into_iter()
            .filter_map(|r| r.err())
            .inspect(|e| warn!(error = %e, "Host registration failed"))
            .collect()
    }

    /// Handle for `host_id`.
    pub async fn get_client(&self, host_id: &str) -> Result<Arc<dyn RuntimeClient>> {
        self.clients
            .read()
            .await
            .get(host_id)
            .cloned()
            .ok_or_else(|| FleetError::HostNotFound { host_id: host_id.to_string() })
    }

    /// Close and evict a host.
    #[instrument(skip(self), fields(host_id = %host_id))]
    pub async fn remove_host(&self, host_id: &str) -> Result<()> {
        let mut clients = self.clients.write().await;
        let client = clients
            .remove(host_id)
            .ok_or_else(|| FleetError::HostNotFound { host_id: host_id.to_string() })?;
        metrics::set_registered_hosts(clients.len());
        client.close().await;

        info!("Host removed");
        Ok(())
    }

    /// Registered host IDs, sorted.
    pub async fn list_hosts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every handle and clear the registry. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        for (_, client) in clients.drain() {
            client.close().await;
        }
        metrics::set_registered_hosts(0);

        if count > 0 {
            info!(count, "Host pool closed");
        }
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn RuntimeClient>)> {
        self.clients.read().await.iter().map(|(id, c)| (id.clone(), c.clone())).collect()
    }

    /// Ping every registered host concurrently.
    pub async fn health_check(&self) -> PoolHealth {
        let checks = self.snapshot().await.into_iter().map(|(host_id, client)| async move {
            let started = Instant::now();
            match with_timeout(self.ping_timeout, "ping", client.ping()).await {
                Ok(()) => HostHealth::reachable(host_id, started.elapsed().as_millis() as u64),
                Err(e) => {
                    metrics::record_ping_failure(&host_id);
                    HostHealth::unreachable(host_id, e.to_string())
                }
            }
        });

        PoolHealth::from_hosts(join_all(checks).await)
    }

    /// Current load on one registered host.
    pub async fn query_load(&self, host_id: &str, timeout: Duration) -> Result<ResourceLoad> {
        let client = self.get_client(host_id).await?;
        with_timeout(timeout, "load query", client.load())
            .await
            .map_err(|source| FleetError::Runtime { host_id: host_id.to_string(), source })
    }

    /// Query current load on each of `host_ids` concurrently.
    ///
    /// Hosts that are unregistered or whose query fails are left out.
    pub async fn live_loads(
        &self,
        host_ids: &[String],
        timeout: Duration,
    ) -> HashMap<String, ResourceLoad> {
        let queries = host_ids.iter().map(|host_id| async move {
            match self.query_load(host_id, timeout).await {
                Ok(load) => Some((host_id.clone(), load)),
                Err(e) => {
                    warn!(host_id = %host_id, error = %e, "Load query failed, excluding host");
                    None
                }
            }
        });

        join_all(queries).await.into_iter().flatten().collect()
    }
}
