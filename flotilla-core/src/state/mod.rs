//! Stack and deployment records.
//!
//! The orchestrator persists through the `StackStore` seam:
//! - `MemoryStore`: process-local maps, for tests and embedded use
//! - `SqliteStore`: SQLite via sqlx with versioned migrations

use crate::error::{FleetError, Result};
use crate::types::{Stack, StackDeployment, StackStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod migrations;
mod sqlite;

pub use sqlite::SqliteStore;

#[cfg(test)]
mod tests;

/// Criteria for `list_stacks`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFilter {
    pub name: Option<String>,
    pub status: Option<StackStatus>,
}

impl StackFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), status: None }
    }

    pub fn by_status(status: StackStatus) -> Self {
        Self { name: None, status: Some(status) }
    }

    pub fn matches(&self, stack: &Stack) -> bool {
        self.name.as_deref().map_or(true, |n| n == stack.name)
            && self.status.map_or(true, |s| s == stack.status)
    }
}

/// Durable record of stacks and their current deployment.
///
/// Lookups of unknown IDs fail with `StackNotFound` / `DeploymentNotFound`;
/// I/O failures surface as `Storage`.
#[async_trait]
pub trait StackStore: Send + Sync {
    /// Insert a new stack. Fails if the ID already exists.
    async fn save_stack(&self, stack: &Stack) -> Result<()>;
    async fn get_stack(&self, id: &str) -> Result<Stack>;
    async fn update_stack(&self, stack: &Stack) -> Result<()>;
    async fn delete_stack(&self, id: &str) -> Result<()>;
    /// Matching stacks, oldest first.
    async fn list_stacks(&self, filter: &StackFilter) -> Result<Vec<Stack>>;

    /// Store the deployment for its stack, replacing any earlier attempt.
    async fn save_deployment(&self, deployment: &StackDeployment) -> Result<()>;
    async fn get_deployment(&self, stack_id: &str) -> Result<StackDeployment>;
    async fn update_deployment(&self, deployment: &StackDeployment) -> Result<()>;
    async fn delete_deployment(&self, stack_id: &str) -> Result<()>;
}

fn stack_not_found(id: &str) -> FleetError {
    FleetError::StackNotFound { stack_id: id.to_string() }
}

fn deployment_not_found(stack_id: &str) -> FleetError {
    FleetError::DeploymentNotFound { stack_id: stack_id.to_string() }
}

/// In-process store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    stacks: Arc<RwLock<HashMap<String, Stack>>>,
    deployments: Arc<RwLock<HashMap<String, StackDeployment>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StackStore for MemoryStore {
    async fn save_stack(&self, stack: &Stack) -> Result<()> {
        let mut stacks = self.stacks.write().await;
        if stacks.contains_key(&stack.id) {
            return Err(FleetError::Storage(format!("Stack {} already exists", stack.id)));
        }
        stacks.insert(stack.id.clone(), stack.clone());
        Ok(())
    }

    async fn get_stack(&self, id: &str) -> Result<Stack> {
        self.stacks.read().await.get(id).cloned().ok_or_else(|| stack_not_found(id))
    }

    async fn update_stack(&self, stack: &Stack) -> Result<()> {
        let mut stacks = self.stacks.write().await;
        let slot = stacks.get_mut(&stack.id).ok_or_else(|| stack_not_found(&stack.id))?;
        *slot = stack.clone();
        Ok(())
    }

    async fn delete_stack(&self, id: &str) -> Result<()> {
        self.stacks.write().await.remove(id).map(|_| ()).ok_or_else(|| stack_not_found(id))
    }

    async fn list_stacks(&self, filter: &StackFilter) -> Result<Vec<Stack>> {
        let mut stacks: Vec<Stack> =
            self.stacks.read().await.values().filter(|s| filter.matches(s)).cloned().collect();
        stacks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(stacks)
    }

    async fn save_deployment(&self, deployment: &StackDeployment) -> Result<()> {
        self.deployments.write().await.insert(deployment.stack_id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, stack_id: &str) -> Result<StackDeployment> {
        self.deployments
            .read()
            .await
            .get(stack_id)
            .cloned()
            .ok_or_else(|| deployment_not_found(stack_id))
    }

    async fn update_deployment(&self, deployment: &StackDeployment) -> Result<()> {
        let mut deployments = self.deployments.write().await;
        let slot = deployments
            .get_mut(&deployment.stack_id)
            .ok_or_else(|| deployment_not_found(&deployment.stack_id))?;
        *slot = deployment.clone();
        Ok(())
    }

    async fn delete_deployment(&self, stack_id: &str) -> Result<()> {
        self.deployments
            .write()
            .await
            .remove(stack_id)
            .map(|_| ())
            .ok_or_else(|| deployment_not_found(stack_id))
    }
}
