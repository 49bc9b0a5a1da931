//! Cross-host service discovery.
//!
//! Containers publish ports on their assigned host, so a dependency is
//! reached at `<host address>:<published port>`. The configurator turns a
//! placement list into a `NetworkConfig` and derives the environment entries
//! injected into each dependent container.

use crate::types::{ContainerPlacement, ContainerSpec, Endpoint, NetworkConfig};
use std::collections::HashMap;
use tracing::debug;

pub struct NetworkConfigurator;

impl NetworkConfigurator {
    /// Resolve every placed container's published endpoints.
    pub fn configure(
        placements: &[ContainerPlacement],
        containers: &[ContainerSpec],
    ) -> NetworkConfig {
        let mut network = NetworkConfig::default();

        for placement in placements {
            let Some(spec) = containers.iter().find(|c| c.name == placement.container) else {
                continue;
            };

            let endpoints: Vec<Endpoint> = spec
                .ports
                .iter()
                .map(|port| Endpoint {
                    host: placement.address.clone(),
                    port: port.published_port(),
                    protocol: port.protocol,
                })
                .collect();

            debug!(
                container = %placement.container,
                host_id = %placement.host_id,
                endpoints = endpoints.len(),
                "Resolved container endpoints"
            );
            network.addresses.insert(placement.container.clone(), placement.address.clone());
            network.endpoints.insert(placement.container.clone(), endpoints);
        }

        network
    }

    /// Discovery entries for each dependency of `container`.
    ///
    /// For dependency `db`: `DB_HOST`, and when it publishes ports, `DB_PORT`
    /// and `DB_ADDR` (first port) plus `DB_ADDRS` (all, comma-separated).
    pub fn dependency_env(container: &ContainerSpec, network: &NetworkConfig) -> HashMap<String, String> {
        let mut env = HashMap::new();

        for dep in &container.depends_on {
            let prefix = env_prefix(dep);
            if let Some(address) = network.address_of(dep) {
                env.insert(format!("{}_HOST", prefix), address.to_string());
            }

            let endpoints = network.endpoints_for(dep);
            if let Some(first) = endpoints.first() {
                env.insert(format!("{}_PORT", prefix), first.port.to_string());
                env.insert(format!("{}_ADDR", prefix), first.to_string());
                env.insert(
                    format!("{}_ADDRS", prefix),
                    endpoints.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(","),
                );
            }
        }

        env
    }

    /// Full environment for `container`: discovery entries overlaid by its own `env`.
    pub fn container_env(container: &ContainerSpec, network: &NetworkConfig) -> HashMap<String, String> {
        let mut env = Self::dependency_env(container, network);
        env.extend(container.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// `my-db.v2` -> `MY_DB_V2`
fn env_prefix(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortMapping;

    fn placed(container: &str, host_id: &str, address: &str) -> ContainerPlacement {
        ContainerPlacement {
            container: container.to_string(),
            host_id: host_id.to_string(),
            address: address.to_string(),
        }
    }

    fn stack() -> (Vec<ContainerSpec>, Vec<ContainerPlacement>) {
        let containers = vec![
            ContainerSpec::new("main-db", "postgres:16").with_port("15432:5432".parse().unwrap()),
            ContainerSpec::new("cache", "redis:7"),
            ContainerSpec::new("api", "api:1")
                .depends_on("main-db")
                .depends_on("cache")
                .with_port(PortMapping::tcp(8080))
                .with_port("9090:9000".parse().unwrap()),
        ];
        let placements = vec![
            placed("main-db", "h1", "10.0.0.1"),
            placed("cache", "h2", "10.0.0.2"),
            placed("api", "h2", "10.0.0.2"),
        ];
        (containers, placements)
    }

    #[test]
    fn test_endpoints_use_host_address_and_published_port() {
        let (containers, placements) = stack();
        let network = NetworkConfigurator::configure(&placements, &containers);

        let db = network.endpoints_for("main-db");
        assert_eq!(db.len(), 1);
        assert_eq!(db[0].to_string(), "10.0.0.1:15432");

        let api: Vec<_> = network.endpoints_for("api").iter().map(|e| e.to_string()).collect();
        assert_eq!(api, vec!["10.0.0.2:8080", "10.0.0.2:9090"]);

        assert!(network.endpoints_for("cache").is_empty());
        assert_eq!(network.address_of("cache"), Some("10.0.0.2"));
    }

    #[test]
    fn test_dependency_env() {
        let (containers, placements) = stack();
        let network = NetworkConfigurator::configure(&placements, &containers);

        let env = NetworkConfigurator::dependency_env(&containers[2], &network);
        assert_eq!(env["MAIN_DB_HOST"], "10.0.0.1");
        assert_eq!(env["MAIN_DB_PORT"], "15432");
        assert_eq!(env["MAIN_DB_ADDR"], "10.0.0.1:15432");
        assert_eq!(env["MAIN_DB_ADDRS"], "10.0.0.1:15432");
        assert_eq!(env["CACHE_HOST"], "10.0.0.2");
        assert!(!env.contains_key("CACHE_PORT"));

        assert!(NetworkConfigurator::dependency_env(&containers[0], &network).is_empty());
    }

    #[test]
    fn test_user_env_wins() {
        let (mut containers, placements) = stack();
        containers[2].env.insert("MAIN_DB_HOST".to_string(), "db.internal".to_string());
        containers[2].env.insert("MODE".to_string(), "prod".to_string());
        let network = NetworkConfigurator::configure(&placements, &containers);

        let env = NetworkConfigurator::container_env(&containers[2], &network);
        assert_eq!(env["MAIN_DB_HOST"], "db.internal");
        assert_eq!(env["MAIN_DB_PORT"], "15432");
        assert_eq!(env["MODE"], "prod");
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix("my-db.v2"), "MY_DB_V2");
        assert_eq!(env_prefix("api"), "API");
    }
}
