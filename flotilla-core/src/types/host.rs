//! Host domain types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Compute capacity, either a host's total or a container's request.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    /// CPU units (cores)
    pub cpus: f64,

    /// Memory in bytes
    pub memory_bytes: u64,
}

impl Resources {
    pub fn new(cpus: f64, memory_bytes: u64) -> Self {
        Self { cpus, memory_bytes }
    }
}

/// A container-runtime host as described by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    /// Unique host ID
    pub id: String,

    /// Datacenter label for locality-aware placement
    #[serde(default)]
    pub datacenter: Option<String>,

    /// Total capacity
    pub resources: Resources,

    /// Free-form labels matched by host constraints
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Runtime endpoint (e.g., "unix:///var/run/docker.sock", "tcp://10.0.0.5:2375")
    pub endpoint: String,

    /// Address other hosts use to reach published ports (derived from endpoint if unset)
    #[serde(default)]
    pub address: Option<String>,
}

impl HostInfo {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, resources: Resources) -> Self {
        Self {
            id: id.into(),
            datacenter: None,
            resources,
            labels: HashMap::new(),
            endpoint: endpoint.into(),
            address: None,
        }
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Address at which containers published on this host are reachable.
    ///
    /// Resolution order:
    /// 1. Explicit `address`
    /// 2. Host part of a `tcp://`, `http://` or `https://` endpoint
    /// 3. `127.0.0.1` (local sockets)
    pub fn advertise_address(&self) -> String {
        if let Some(address) = &self.address {
            return address.clone();
        }

        let remote = ["tcp://", "http://", "https://"]
            .iter()
            .find_map(|scheme| self.endpoint.strip_prefix(scheme));

        match remote {
            Some(rest) => {
                let authority = rest.split('/').next().unwrap_or(rest);
                match authority.rsplit_once(':') {
                    // Bracketed IPv6 literal without port, e.g. "[::1]"
                    Some((host, port)) if !port.contains(']') => host.to_string(),
                    _ => authority.to_string(),
                }
            }
            None => "127.0.0.1".to_string(),
        }
    }
}

/// Current consumption on a host.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceLoad {
    /// CPU units in use
    pub cpus_used: f64,

    /// Memory bytes in use
    pub memory_used: u64,

    /// Number of containers running
    pub containers: u32,
}

impl ResourceLoad {
    pub fn new(cpus_used: f64, memory_used: u64, containers: u32) -> Self {
        Self { cpus_used, memory_used, containers }
    }

    /// Capacity still free on a host of the given total size.
    pub fn free(&self, total: &Resources) -> Resources {
        Resources {
            cpus: (total.cpus - self.cpus_used).max(0.0),
            memory_bytes: total.memory_bytes.saturating_sub(self.memory_used),
        }
    }

    /// Account for one more container with an optional resource request.
    pub fn reserve(&mut self, request: Option<&Resources>) {
        self.containers += 1;
        if let Some(request) = request {
            self.cpus_used += request.cpus;
            self.memory_used = self.memory_used.saturating_add(request.memory_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertise_address() {
        let res = Resources::new(4.0, 1 << 30);

        let tcp = HostInfo::new("h1", "tcp://10.0.0.5:2375", res);
        assert_eq!(tcp.advertise_address(), "10.0.0.5");

        let unix = HostInfo::new("h2", "unix:///var/run/docker.sock", res);
        assert_eq!(unix.advertise_address(), "127.0.0.1");

        let explicit = HostInfo::new("h3", "unix:///var/run/docker.sock", res)
            .with_address("192.168.1.20");
        assert_eq!(explicit.advertise_address(), "192.168.1.20");

        let no_port = HostInfo::new("h4", "tcp://runtime.internal", res);
        assert_eq!(no_port.advertise_address(), "runtime.internal");
    }

    #[test]
    fn test_free_and_reserve() {
        let total = Resources::new(8.0, 16 * 1024);
        let mut load = ResourceLoad::new(6.0, 20 * 1024, 3);

        let free = load.free(&total);
        assert_eq!(free.cpus, 2.0);
        assert_eq!(free.memory_bytes, 0);

        load.reserve(Some(&Resources::new(1.5, 512)));
        assert_eq!(load.containers, 4);
        assert_eq!(load.cpus_used, 7.5);

        load.reserve(None);
        assert_eq!(load.containers, 5);
        assert_eq!(load.cpus_used, 7.5);
    }
}
