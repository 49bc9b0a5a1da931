//! Core domain types for Flotilla.

pub mod deployment;
pub mod host;
pub mod network;
pub mod stack;

// Re-exports
pub use deployment::{
    ContainerFailure, ContainerOutcome, ContainerPlacement, ContainerState, PlacedContainer,
    StackDeployment,
};
pub use host::{HostInfo, ResourceLoad, Resources};
pub use network::{Endpoint, NetworkConfig, PortMapping, Protocol};
pub use stack::{
    ContainerSpec, DeploymentConfig, DeploymentMode, HostConstraint, PlacementStrategy, Stack,
    StackDefinition, StackStatus,
};
