//! Host pool health reports.

use serde::{Deserialize, Serialize};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of pinging one registered host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostHealth {
    pub host_id: String,
    pub status: HealthStatus,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
}

impl HostHealth {
    pub fn reachable(host_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            host_id: host_id.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn unreachable(host_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health of the host pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealth {
    pub status: HealthStatus,
    pub hosts: Vec<HostHealth>,
}

impl PoolHealth {
    /// Aggregate per-host results.
    ///
    /// Returns:
    /// - Healthy: every host reachable
    /// - Degraded: some hosts unreachable, at least one reachable
    /// - Unhealthy: no hosts registered, or none reachable
    pub fn from_hosts(mut hosts: Vec<HostHealth>) -> Self {
        hosts.sort_by(|a, b| a.host_id.cmp(&b.host_id));

        let healthy = hosts.iter().filter(|h| h.status == HealthStatus::Healthy).count();
        let status = if hosts.is_empty() || healthy == 0 {
            HealthStatus::Unhealthy
        } else if healthy < hosts.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self { status, hosts }
    }

    pub fn is_ready(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_health_aggregation() {
        let all_up = PoolHealth::from_hosts(vec![
            HostHealth::reachable("h2", 3),
            HostHealth::reachable("h1", 1),
        ]);
        assert_eq!(all_up.status, HealthStatus::Healthy);
        assert!(all_up.is_ready());
        assert_eq!(all_up.hosts[0].host_id, "h1");

        let one_down = PoolHealth::from_hosts(vec![
            HostHealth::reachable("h1", 1),
            HostHealth::unreachable("h2", "connection refused"),
        ]);
        assert_eq!(one_down.status, HealthStatus::Degraded);
        assert!(!one_down.is_ready());

        let all_down = PoolHealth::from_hosts(vec![HostHealth::unreachable("h1", "timeout")]);
        assert_eq!(all_down.status, HealthStatus::Unhealthy);

        assert_eq!(PoolHealth::from_hosts(Vec::new()).status, HealthStatus::Unhealthy);
    }
}
