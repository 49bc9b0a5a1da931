//! Stack domain types.

use crate::error::{FleetError, Result};
use crate::types::host::Resources;
use crate::types::network::PortMapping;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{info, instrument};

/// Whether a stack may span several hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    SingleHost,
    #[default]
    MultiHost,
}

/// Algorithm used to assign containers to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStrategy {
    /// Score hosts by free capacity, load and datacenter preference.
    #[default]
    Auto,
    /// Every container names its host explicitly.
    Manual,
    /// Balance container counts across hosts.
    Spread,
    /// Spread within one required datacenter.
    Datacenter,
}

impl PlacementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementStrategy::Auto => "auto",
            PlacementStrategy::Manual => "manual",
            PlacementStrategy::Spread => "spread",
            PlacementStrategy::Datacenter => "datacenter",
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlacementStrategy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(PlacementStrategy::Auto),
            "manual" => Ok(PlacementStrategy::Manual),
            "spread" => Ok(PlacementStrategy::Spread),
            "datacenter" => Ok(PlacementStrategy::Datacenter),
            _ => Err(FleetError::InvalidConfig {
                reason: format!("Unknown placement strategy: {}", s),
            }),
        }
    }
}

/// Desired deployment settings for a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub mode: DeploymentMode,
    pub strategy: PlacementStrategy,

    /// Preferred (auto) or required (datacenter) datacenter
    pub datacenter: Option<String>,

    /// Container name -> host ID, used by the manual strategy
    pub manual_hosts: HashMap<String, String>,
}

impl DeploymentConfig {
    pub fn with_strategy(strategy: PlacementStrategy) -> Self {
        Self { strategy, ..Default::default() }
    }
}

/// Lifecycle status shared by stacks and their deployment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    #[default]
    Pending,
    Deploying,
    Running,
    PartiallyFailed,
    Failed,
    Stopping,
    Stopped,
    Removing,
    Removed,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::Pending => "pending",
            StackStatus::Deploying => "deploying",
            StackStatus::Running => "running",
            StackStatus::PartiallyFailed => "partially_failed",
            StackStatus::Failed => "failed",
            StackStatus::Stopping => "stopping",
            StackStatus::Stopped => "stopped",
            StackStatus::Removing => "removing",
            StackStatus::Removed => "removed",
        }
    }

    /// Stopped or Removed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StackStatus::Stopped | StackStatus::Removed)
    }

    /// A lifecycle operation is currently in flight.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, StackStatus::Deploying | StackStatus::Stopping | StackStatus::Removing)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stack record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    /// Stack ID (UUID)
    pub id: String,

    /// Stack name
    pub name: String,

    /// Desired deployment settings
    pub config: DeploymentConfig,

    /// Current lifecycle status
    pub status: StackStatus,

    /// Creation timestamp
    pub created_at: SystemTime,

    /// Last transition timestamp
    pub updated_at: SystemTime,
}

impl Stack {
    pub fn new(name: impl Into<String>, config: DeploymentConfig) -> Self {
        let now = SystemTime::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            config,
            status: StackStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: StackStatus) {
        self.status = status;
        self.updated_at = SystemTime::now();
    }
}

/// Per-container placement rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConstraint {
    /// Explicit host ID
    pub host_id: Option<String>,

    /// Minimum free CPU units
    pub min_cpus: Option<f64>,

    /// Minimum free memory in bytes
    pub min_memory: Option<u64>,

    /// Required datacenter
    pub datacenter: Option<String>,

    /// Required host labels (all must match)
    pub labels: HashMap<String, String>,
}

impl HostConstraint {
    pub fn on_host(host_id: impl Into<String>) -> Self {
        Self { host_id: Some(host_id.into()), ..Default::default() }
    }
}

/// A container in a stack definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name (unique within the stack)
    pub name: String,

    /// Image reference
    pub image: String,

    /// Containers that must be running before this one is created
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Published ports
    #[serde(default)]
    pub ports: Vec<PortMapping>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Override the image command
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Metadata labels
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Requested capacity
    #[serde(default)]
    pub resources: Option<Resources>,

    /// Placement rule
    #[serde(default)]
    pub constraint: Option<HostConstraint>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            depends_on: Vec::new(),
            ports: Vec::new(),
            env: HashMap::new(),
            command: None,
            labels: HashMap::new(),
            resources: None,
            constraint: None,
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_constraint(mut self, constraint: HostConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

/// A stack definition: the containers deployed as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    pub name: String,
    pub containers: Vec<ContainerSpec>,
}

impl StackDefinition {
    pub fn new(name: impl Into<String>, containers: Vec<ContainerSpec>) -> Self {
        Self { name: name.into(), containers }
    }

    /// Parse and validate a stack definition from YAML.
    #[instrument(skip(content))]
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: StackDefinition = serde_yaml::from_str(content)
            .map_err(|e| FleetError::InvalidDefinition { reason: e.to_string() })?;

        definition.validate()?;
        info!(stack = %definition.name, containers = definition.containers.len(), "Parsed stack definition");
        Ok(definition)
    }

    /// Parse and validate a stack definition file.
    #[instrument]
    pub fn parse_file<P: AsRef<Path> + fmt::Debug>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| FleetError::FileReadError {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        Self::from_yaml(&content)
    }

    /// Check names, images and dependency references.
    pub fn validate(&self) -> Result<()> {
        if self.containers.is_empty() {
            return Err(FleetError::InvalidDefinition {
                reason: format!("Stack '{}' defines no containers", self.name),
            });
        }

        let mut names = HashSet::new();
        for container in &self.containers {
            if container.name.is_empty() {
                return Err(FleetError::InvalidDefinition {
                    reason: "Container with empty name".to_string(),
                });
            }
            if !names.insert(container.name.as_str()) {
                return Err(FleetError::InvalidDefinition {
                    reason: format!("Duplicate container name '{}'", container.name),
                });
            }
            if container.image.is_empty() {
                return Err(FleetError::InvalidDefinition {
                    reason: format!("Container '{}' missing image", container.name),
                });
            }

            let cpus = container.resources.map(|r| ("resources.cpus", r.cpus));
            let min_cpus = container
                .constraint
                .as_ref()
                .and_then(|c| c.min_cpus)
                .map(|v| ("constraint.min_cpus", v));
            for (field, value) in cpus.into_iter().chain(min_cpus) {
                if !value.is_finite() || value < 0.0 {
                    return Err(FleetError::InvalidDefinition {
                        reason: format!(
                            "Container '{}' has invalid {}: {}",
                            container.name, field, value
                        ),
                    });
                }
            }
        }

        for container in &self.containers {
            for dep in &container.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(FleetError::InvalidDefinition {
                        reason: format!(
                            "Container '{}' depends on '{}' which does not exist",
                            container.name, dep
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = r#"
name: shop
containers:
  - name: db
    image: postgres:16
    ports: ["5432"]
    resources:
      cpus: 2.0
      memory_bytes: 2147483648
    constraint:
      datacenter: eu-west
  - name: web
    image: shop/web:1.4
    depends_on: [db]
    ports: ["8080:80"]
    env:
      RUST_LOG: info
"#;

    #[test]
    fn test_parse_definition() {
        let def = StackDefinition::from_yaml(SHOP).unwrap();
        assert_eq!(def.name, "shop");
        assert_eq!(def.containers.len(), 2);

        let db = def.container("db").unwrap();
        assert_eq!(db.resources.unwrap().cpus, 2.0);
        assert_eq!(db.constraint.as_ref().unwrap().datacenter.as_deref(), Some("eu-west"));

        let web = def.container("web").unwrap();
        assert_eq!(web.depends_on, vec!["db".to_string()]);
        assert_eq!(web.ports[0].published_port(), 8080);
    }

    #[test]
    fn test_validate_rejects_missing_dependency() {
        let def = StackDefinition::new(
            "s",
            vec![ContainerSpec::new("web", "nginx").depends_on("nonexistent")],
        );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let empty = StackDefinition::new("s", vec![]);
        assert!(empty.validate().is_err());

        let dup = StackDefinition::new(
            "s",
            vec![ContainerSpec::new("a", "img"), ContainerSpec::new("a", "img")],
        );
        assert!(dup.validate().unwrap_err().to_string().contains("Duplicate"));

        let no_image = StackDefinition::new("s", vec![ContainerSpec::new("a", "")]);
        assert!(no_image.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cpu_values() {
        let negative = StackDefinition::new(
            "s",
            vec![ContainerSpec::new("a", "img").with_resources(Resources::new(-2.0, 0))],
        );
        let err = negative.validate().unwrap_err();
        assert!(matches!(err, FleetError::InvalidDefinition { .. }));
        assert!(err.to_string().contains("resources.cpus"));

        let nan = StackDefinition::new(
            "s",
            vec![ContainerSpec::new("a", "img").with_constraint(HostConstraint {
                min_cpus: Some(f64::NAN),
                ..Default::default()
            })],
        );
        assert!(nan.validate().unwrap_err().to_string().contains("constraint.min_cpus"));

        let ok = StackDefinition::new(
            "s",
            vec![ContainerSpec::new("a", "img").with_resources(Resources::new(0.0, 0))],
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Spread".parse::<PlacementStrategy>().unwrap(), PlacementStrategy::Spread);
        assert!("random".parse::<PlacementStrategy>().is_err());
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(StackStatus::PartiallyFailed.as_str(), "partially_failed");
        assert!(StackStatus::Removing.is_in_progress());
        assert!(!StackStatus::Removing.is_terminal());
        assert!(StackStatus::Stopped.is_terminal());
        assert!(!StackStatus::Failed.is_terminal());
    }
}
