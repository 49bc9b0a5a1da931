//! Network domain types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Network protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Port published by a container (host:container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PortSpec")]
pub struct PortMapping {
    /// Port inside the container
    pub container_port: u16,

    /// Port on the host (same as container port if unset)
    pub host_port: Option<u16>,

    /// Protocol (tcp, udp)
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(container_port: u16) -> Self {
        Self { container_port, host_port: None, protocol: Protocol::Tcp }
    }

    /// Port reachable on the assigned host.
    pub fn published_port(&self) -> u16 {
        self.host_port.unwrap_or(self.container_port)
    }
}

/// Accepted input forms for a port: `"80"`, `"8080:80"`, `"53:53/udp"` or a struct.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortSpec {
    Short(String),
    Number(u16),
    Long {
        container_port: u16,
        #[serde(default)]
        host_port: Option<u16>,
        #[serde(default)]
        protocol: Protocol,
    },
}

impl TryFrom<PortSpec> for PortMapping {
    type Error = String;

    fn try_from(spec: PortSpec) -> Result<Self, Self::Error> {
        match spec {
            PortSpec::Short(s) => s.parse(),
            PortSpec::Number(port) => Ok(PortMapping::tcp(port)),
            PortSpec::Long { container_port, host_port, protocol } => {
                Ok(PortMapping { container_port, host_port, protocol })
            }
        }
    }
}

impl FromStr for PortMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, proto)) => (ports, proto.parse()?),
            None => (s, Protocol::Tcp),
        };

        let parse_port =
            |p: &str| p.trim().parse::<u16>().map_err(|_| format!("Invalid port '{}' in '{}'", p, s));

        match ports.split_once(':') {
            Some((host, container)) => Ok(PortMapping {
                container_port: parse_port(container)?,
                host_port: Some(parse_port(host)?),
                protocol,
            }),
            None => Ok(PortMapping { container_port: parse_port(ports)?, host_port: None, protocol }),
        }
    }
}

/// Reachable `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-deployment addressing: where each container runs and what it publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Container name -> address of its assigned host
    #[serde(default)]
    pub addresses: BTreeMap<String, String>,

    /// Container name -> published endpoints
    pub endpoints: BTreeMap<String, Vec<Endpoint>>,
}

impl NetworkConfig {
    /// Address of the host a container was placed on.
    pub fn address_of(&self, container: &str) -> Option<&str> {
        self.addresses.get(container).map(String::as_str)
    }

    /// Endpoints published by a container (empty if it publishes none).
    pub fn endpoints_for(&self, container: &str) -> &[Endpoint] {
        self.endpoints.get(container).map(Vec::as_slice).unwrap_or(&[])
    }
}
