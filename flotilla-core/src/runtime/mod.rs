//! Container runtime seam.
//!
//! Each registered host is driven through a `RuntimeClient` handle obtained
//! from a `RuntimeConnector`:
//! - `docker`: Docker Engine API over `unix://` or `tcp://` (bollard)

use crate::types::{ContainerSpec, ResourceLoad};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod docker;

pub use docker::{DockerConnector, DockerRuntime};

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Typed failure of a single runtime call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime unreachable: {0}")]
    Unreachable(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("runtime API error: {0}")]
    Api(String),
}

impl RuntimeError {
    /// True when the host itself could not be reached, as opposed to the
    /// runtime rejecting one request.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// The stack a container is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
}

impl StackRef<'_> {
    /// Prefix for runtime-visible names: the stack name plus the first segment
    /// of its ID, so stacks sharing a name never collide.
    pub fn prefix(&self) -> String {
        let short = self.id.split('-').next().unwrap_or(self.id);
        format!("{}-{}", self.name, short)
    }
}

/// Handle to one host's container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> RuntimeResult<()>;

    /// Create and start one container of `stack`, returning its runtime ID.
    ///
    /// `env` is the complete environment, discovery entries included.
    async fn create_and_start(
        &self,
        stack: StackRef<'_>,
        spec: &ContainerSpec,
        env: &HashMap<String, String>,
    ) -> RuntimeResult<String>;

    /// Stop a container, waiting up to `timeout` before the runtime kills it.
    async fn stop(&self, container_id: &str, timeout: Duration) -> RuntimeResult<()>;

    /// Remove a stopped container.
    async fn remove(&self, container_id: &str, remove_volumes: bool) -> RuntimeResult<()>;

    /// Current consumption on this host.
    async fn load(&self) -> RuntimeResult<ResourceLoad>;

    /// Release the connection. The handle is not used afterwards.
    async fn close(&self) {}
}

/// Opens `RuntimeClient` handles for endpoints.
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> RuntimeResult<Arc<dyn RuntimeClient>>;
}

/// Run `fut` with a deadline, mapping expiry to `RuntimeError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> RuntimeResult<T>
where
    F: Future<Output = RuntimeResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout(format!("{} after {:?}", operation, limit))),
    }
}
