//! Deployment records.

use crate::types::network::NetworkConfig;
use crate::types::stack::StackStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Assignment of one container to one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPlacement {
    /// Container name from the stack definition
    pub container: String,

    /// Assigned host ID
    pub host_id: String,

    /// Address the container is reachable at
    pub address: String,
}

/// Observed state of a placed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Not attempted yet.
    #[default]
    Pending,
    /// Created and started.
    Running,
    /// Creation attempted and failed.
    Failed,
    /// Not attempted (failed dependency, unreachable host or cancellation).
    Skipped,
    Stopped,
    Removed,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Pending => "pending",
            ContainerState::Running => "running",
            ContainerState::Failed => "failed",
            ContainerState::Skipped => "skipped",
            ContainerState::Stopped => "stopped",
            ContainerState::Removed => "removed",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the runtime operations issued for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOutcome {
    pub state: ContainerState,

    /// Runtime container ID, once created
    pub container_id: Option<String>,

    /// Last error reported for this container
    pub error: Option<String>,
}

impl ContainerOutcome {
    pub fn running(container_id: impl Into<String>) -> Self {
        Self { state: ContainerState::Running, container_id: Some(container_id.into()), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { state: ContainerState::Failed, container_id: None, error: Some(error.into()) }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self { state: ContainerState::Skipped, container_id: None, error: Some(reason.into()) }
    }
}

/// A placement together with what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedContainer {
    pub placement: ContainerPlacement,
    pub outcome: ContainerOutcome,
}

/// A per-container failure, named for error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFailure {
    pub container: String,
    pub host_id: String,
    pub error: String,
}

impl ContainerFailure {
    pub fn new(
        container: impl Into<String>,
        host_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self { container: container.into(), host_id: host_id.into(), error: error.into() }
    }
}

impl fmt::Display for ContainerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.container, self.host_id, self.error)
    }
}

/// Runtime record of one attempt to realize a stack's placements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDeployment {
    pub stack_id: String,

    /// Overall status
    pub status: StackStatus,

    /// Placements in stack definition order
    pub containers: Vec<PlacedContainer>,

    /// Resolved endpoints for this attempt
    pub network: NetworkConfig,

    pub started_at: SystemTime,
    pub updated_at: SystemTime,
    pub finished_at: Option<SystemTime>,
}

impl StackDeployment {
    pub fn new(stack_id: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            stack_id: stack_id.into(),
            status: StackStatus::Pending,
            containers: Vec::new(),
            network: NetworkConfig::default(),
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn set_status(&mut self, status: StackStatus) {
        self.status = status;
        self.updated_at = SystemTime::now();
        if matches!(
            status,
            StackStatus::Running
                | StackStatus::PartiallyFailed
                | StackStatus::Failed
                | StackStatus::Stopped
                | StackStatus::Removed
        ) {
            self.finished_at = Some(self.updated_at);
        }
    }

    pub fn container(&self, name: &str) -> Option<&PlacedContainer> {
        self.containers.iter().find(|c| c.placement.container == name)
    }

    pub fn placements(&self) -> impl Iterator<Item = &ContainerPlacement> {
        self.containers.iter().map(|c| &c.placement)
    }

    /// Overall status after a creation pass: all running, none running, or mixed.
    pub fn settled_status(&self) -> StackStatus {
        let running =
            self.containers.iter().filter(|c| c.outcome.state == ContainerState::Running).count();

        if !self.containers.is_empty() && running == self.containers.len() {
            StackStatus::Running
        } else if running == 0 {
            StackStatus::Failed
        } else {
            StackStatus::PartiallyFailed
        }
    }

    /// Containers that carry an error.
    pub fn failures(&self) -> Vec<ContainerFailure> {
        self.containers
            .iter()
            .filter_map(|c| {
                c.outcome.error.as_ref().map(|e| {
                    ContainerFailure::new(&c.placement.container, &c.placement.host_id, e)
                })
            })
            .collect()
    }
}
