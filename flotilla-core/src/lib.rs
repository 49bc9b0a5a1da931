//! Flotilla Core Library
//!
//! Data model, placement engine, host connection pool and the runtime and
//! storage seams shared by the Flotilla stack orchestrator.

pub mod config;
pub mod error;
pub mod graph;
pub mod network;
pub mod observability;
pub mod paths;
pub mod placement;
pub mod pool;
pub mod runtime;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use config::{Config, HostEntry};
pub use error::{FleetError, Result};
pub use graph::DependencyGraph;
pub use network::NetworkConfigurator;
pub use observability::{
    health::{HealthStatus, HostHealth, PoolHealth},
    init as init_observability,
};
pub use placement::PlacementEngine;
pub use pool::HostConnectionPool;
pub use runtime::{RuntimeClient, RuntimeConnector, RuntimeError, StackRef};
pub use state::{MemoryStore, SqliteStore, StackFilter, StackStore};
pub use types::{
    ContainerFailure, ContainerOutcome, ContainerPlacement, ContainerSpec, ContainerState,
    DeploymentConfig, DeploymentMode, HostConstraint, HostInfo, NetworkConfig, PlacementStrategy,
    PortMapping, ResourceLoad, Resources, Stack, StackDefinition, StackDeployment, StackStatus,
};
