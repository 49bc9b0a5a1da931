//! Error types for Flotilla.
//!
//! One `thiserror` enum for the whole library; runtime calls have their own `RuntimeError`.

use crate::runtime::RuntimeError;
use crate::types::deployment::{ContainerFailure, StackDeployment};
use crate::types::StackStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Flotilla operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for Flotilla.
#[derive(Error, Debug)]
pub enum FleetError {
    // Host connectivity errors
    #[error("Cannot reach host {host_id}: {reason}")]
    Connection { host_id: String, reason: String },

    #[error("Host not registered: {host_id}")]
    HostNotFound { host_id: String },

    #[error("Runtime error on host {host_id}: {source}")]
    Runtime {
        host_id: String,
        #[source]
        source: RuntimeError,
    },

    // Record lookup errors
    #[error("Stack not found: {stack_id}")]
    StackNotFound { stack_id: String },

    #[error("No deployment recorded for stack {stack_id}")]
    DeploymentNotFound { stack_id: String },

    // Placement errors
    #[error("No hosts available for placement")]
    NoHosts,

    #[error("Container '{container}' cannot be placed on host '{host}': {requirement}")]
    ConstraintViolation { container: String, host: String, requirement: String },

    #[error("Placement failed: {reason}")]
    Placement { reason: String },

    // Dispatch errors
    #[error(
        "{operation} of stack {stack_id} finished with {} failed container(s): {}",
        .failures.len(),
        summarize(.failures)
    )]
    PartialDeployment {
        stack_id: String,
        operation: &'static str,
        failures: Vec<ContainerFailure>,
        deployment: Box<StackDeployment>,
    },

    #[error("Cannot {operation} stack {stack_id} while it is {status}")]
    InvalidTransition { stack_id: String, operation: &'static str, status: StackStatus },

    // Stack definition errors
    #[error("Invalid stack definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("File read error: {path}: {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// True for the unknown host/stack/deployment family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::HostNotFound { .. } | Self::StackNotFound { .. } | Self::DeploymentNotFound { .. }
        )
    }

    /// The deployment record attached to a partial failure, if any.
    pub fn deployment(&self) -> Option<&StackDeployment> {
        match self {
            Self::PartialDeployment { deployment, .. } => Some(deployment.as_ref()),
            _ => None,
        }
    }

    /// Per-container failures attached to a partial failure.
    pub fn failures(&self) -> &[ContainerFailure] {
        match self {
            Self::PartialDeployment { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[ContainerFailure]) -> String {
    failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}
