//! Container dependency graph.
//!
//! Containers are stored by index in definition order; each node holds the
//! indices of the containers it depends on. Ordering uses Kahn's algorithm,
//! always releasing the lowest ready index first so the result is stable.

use crate::error::{FleetError, Result};
use crate::types::ContainerSpec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Declared `depends_on` edges of one stack.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    /// index -> indices it depends on
    dependencies: Vec<Vec<usize>>,
    /// index -> indices that depend on it
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph. Fails with `InvalidDefinition` on an unknown dependency name.
    pub fn from_containers(containers: &[ContainerSpec]) -> Result<Self> {
        let index: HashMap<&str, usize> =
            containers.iter().enumerate().map(|(i, c)| (c.name.as_str(), i)).collect();

        let mut dependencies = vec![Vec::new(); containers.len()];
        let mut dependents = vec![Vec::new(); containers.len()];

        for (i, container) in containers.iter().enumerate() {
            for dep in &container.depends_on {
                let &j = index.get(dep.as_str()).ok_or_else(|| FleetError::InvalidDefinition {
                    reason: format!(
                        "Container '{}' depends on unknown container '{}'",
                        container.name, dep
                    ),
                })?;
                if !dependencies[i].contains(&j) {
                    dependencies[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        Ok(Self {
            names: containers.iter().map(|c| c.name.clone()).collect(),
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// Indices such that every container follows all of its dependencies.
    ///
    /// A cycle is reported as `FleetError::Placement` naming its members.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..self.len()).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &self.dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != self.len() {
            let stuck: Vec<&str> = (0..self.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.names[i].as_str())
                .collect();
            return Err(FleetError::Placement {
                reason: format!("Dependency cycle among containers: {}", stuck.join(", ")),
            });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, deps: &[&str]) -> ContainerSpec {
        deps.iter().fold(ContainerSpec::new(name, "img"), |c, d| c.depends_on(*d))
    }

    #[test]
    fn test_dependencies_come_first() {
        let containers = vec![
            spec("web", &["api"]),
            spec("api", &["db", "cache"]),
            spec("db", &[]),
            spec("cache", &[]),
            spec("worker", &["db"]),
        ];
        let graph = DependencyGraph::from_containers(&containers).unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), 5);

        let position = |name: &str| order.iter().position(|&i| graph.name(i) == name).unwrap();
        assert!(position("db") < position("api"));
        assert!(position("cache") < position("api"));
        assert!(position("api") < position("web"));
        assert!(position("db") < position("worker"));
    }

    #[test]
    fn test_order_is_stable() {
        let containers = vec![spec("c", &[]), spec("b", &[]), spec("a", &["c"])];
        let graph = DependencyGraph::from_containers(&containers).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.dependencies(2), &[0]);
    }

    #[test]
    fn test_cycle_is_placement_error() {
        let containers = vec![spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"]), spec("d", &[])];
        let graph = DependencyGraph::from_containers(&containers).unwrap();
        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, FleetError::Placement { .. }));
        let msg = err.to_string();
        assert!(msg.contains("a, b, c"), "{}", msg);
        assert!(!msg.contains(", d"), "{}", msg);
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let graph = DependencyGraph::from_containers(&[spec("loop", &["loop"])]).unwrap();
        assert!(matches!(graph.topological_order(), Err(FleetError::Placement { .. })));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DependencyGraph::from_containers(&[spec("web", &["ghost"])]).unwrap_err();
        assert!(matches!(err, FleetError::InvalidDefinition { .. }));
    }
}
