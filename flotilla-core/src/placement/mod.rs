//! Placement engine.
//!
//! Pure functions from (container specs, host metadata, loads, deployment config)
//! to one `ContainerPlacement` per container. No I/O, and caller state is never
//! mutated: loads are copied into per-call `HostSlot`s which absorb each
//! container's resource request as it is placed.
//!
//! Strategies:
//! - `auto`: score every viable host, highest wins
//! - `manual`: every container names its host
//! - `spread`: least-loaded viable host
//! - `datacenter`: spread within one datacenter

mod auto;
mod manual;
mod spread;

pub use auto::score;

use crate::error::{FleetError, Result};
use crate::observability::metrics;
use crate::types::{
    ContainerPlacement, ContainerSpec, DeploymentConfig, DeploymentMode, HostConstraint, HostInfo,
    PlacementStrategy, ResourceLoad,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument, warn};

/// A host plus its working load for the duration of one `place` call.
#[derive(Debug, Clone)]
pub(crate) struct HostSlot<'a> {
    pub info: &'a HostInfo,
    pub load: ResourceLoad,
}

impl HostSlot<'_> {
    fn id(&self) -> &str {
        &self.info.id
    }
}

/// One implementation per `PlacementStrategy` variant.
pub(crate) trait Strategy {
    /// Narrow the host set before any container is placed.
    fn candidates<'a>(
        &self,
        slots: Vec<HostSlot<'a>>,
        _config: &DeploymentConfig,
    ) -> Result<Vec<HostSlot<'a>>> {
        Ok(slots)
    }

    /// Pick the slot index for one container. Slots are sorted by host ID.
    fn select(
        &self,
        container: &ContainerSpec,
        slots: &[HostSlot<'_>],
        config: &DeploymentConfig,
    ) -> Result<usize>;
}

fn strategy_for(kind: PlacementStrategy) -> &'static dyn Strategy {
    match kind {
        PlacementStrategy::Auto => &auto::AutoStrategy,
        PlacementStrategy::Manual => &manual::ManualStrategy,
        PlacementStrategy::Spread => &spread::SpreadStrategy,
        PlacementStrategy::Datacenter => &spread::DatacenterStrategy,
    }
}

/// Placement engine entry point.
pub struct PlacementEngine;

impl PlacementEngine {
    /// Assign every container to a host.
    ///
    /// Either every container is placed or an error is returned; placements
    /// come back in container order. Hosts without an entry in `loads` are
    /// treated as idle.
    #[instrument(skip_all, fields(strategy = %config.strategy, containers = containers.len(), hosts = hosts.len()))]
    pub fn place(
        containers: &[ContainerSpec],
        hosts: &[HostInfo],
        loads: &HashMap<String, ResourceLoad>,
        config: &DeploymentConfig,
    ) -> Result<Vec<ContainerPlacement>> {
        let result = Self::place_inner(containers, hosts, loads, config);
        match &result {
            Ok(placements) => metrics::record_placements(config.strategy.as_str(), placements.len()),
            Err(e) => {
                warn!(error = %e, "Placement failed");
                metrics::record_placement_failure(config.strategy.as_str());
            }
        }
        result
    }

    fn place_inner(
        containers: &[ContainerSpec],
        hosts: &[HostInfo],
        loads: &HashMap<String, ResourceLoad>,
        config: &DeploymentConfig,
    ) -> Result<Vec<ContainerPlacement>> {
        if hosts.is_empty() {
            return Err(FleetError::NoHosts);
        }

        let mut seen = HashSet::new();
        for host in hosts {
            if !seen.insert(host.id.as_str()) {
                return Err(FleetError::Placement {
                    reason: format!("Duplicate host ID '{}'", host.id),
                });
            }
        }

        let mut slots: Vec<HostSlot<'_>> = hosts
            .iter()
            .map(|info| HostSlot { info, load: loads.get(&info.id).copied().unwrap_or_default() })
            .collect();
        slots.sort_by(|a, b| a.info.id.cmp(&b.info.id));

        let strategy = strategy_for(config.strategy);
        let mut slots = strategy.candidates(slots, config)?;

        if config.mode == DeploymentMode::SingleHost {
            let idx = Self::select_single_host(containers, &slots, config)?;
            let address = slots[idx].info.advertise_address();
            return Ok(containers
                .iter()
                .map(|c| ContainerPlacement {
                    container: c.name.clone(),
                    host_id: slots[idx].info.id.clone(),
                    address: address.clone(),
                })
                .collect());
        }

        let mut placements = Vec::with_capacity(containers.len());
        for container in containers {
            let idx = strategy.select(container, &slots, config)?;
            let slot = &mut slots[idx];
            slot.load.reserve(container.resources.as_ref());

            debug!(container = %container.name, host_id = %slot.info.id, "Placed container");
            placements.push(ContainerPlacement {
                container: container.name.clone(),
                host_id: slot.info.id.clone(),
                address: slot.info.advertise_address(),
            });
        }

        Ok(placements)
    }

    /// Single-host mode: one host must satisfy every container.
    fn select_single_host(
        containers: &[ContainerSpec],
        slots: &[HostSlot<'_>],
        config: &DeploymentConfig,
    ) -> Result<usize> {
        if config.strategy == PlacementStrategy::Manual {
            let mut named: Option<&str> = None;
            for container in containers {
                let host = manual::explicit_host(container, config)?;
                match named {
                    Some(prev) if prev != host => {
                        return Err(FleetError::Placement {
                            reason: format!(
                                "Single-host mode requires one host, but containers name both '{}' and '{}'",
                                prev, host
                            ),
                        });
                    }
                    _ => named = Some(host),
                }
            }
            let Some(host) = named else {
                return Err(FleetError::Placement { reason: "Stack has no containers".to_string() });
            };
            let idx = slots.iter().position(|s| s.id() == host).ok_or_else(|| {
                FleetError::ConstraintViolation {
                    container: containers[0].name.clone(),
                    host: host.to_string(),
                    requirement: "host is not registered".to_string(),
                }
            })?;
            if let Some((container, requirement)) = unmet_for_all(containers, &slots[idx]) {
                return Err(FleetError::ConstraintViolation {
                    container: container.name.clone(),
                    host: host.to_string(),
                    requirement,
                });
            }
            return Ok(idx);
        }

        let average = average_containers(slots);
        let mut best: Option<(usize, f64)> = None;
        for (idx, slot) in slots.iter().enumerate() {
            if let Some((container, requirement)) = unmet_for_all(containers, slot) {
                debug!(host_id = %slot.info.id, container = %container.name, %requirement, "Host cannot take the whole stack");
                continue;
            }
            let s = score(slot.info, &slot.load, average, config.datacenter.as_deref());
            if best.map_or(true, |(_, best_score)| s > best_score) {
                best = Some((idx, s));
            }
        }

        best.map(|(idx, _)| idx).ok_or_else(|| FleetError::Placement {
            reason: "No single host satisfies every container in the stack".to_string(),
        })
    }
}

/// First container that no longer fits once every earlier one has been
/// reserved on a working copy of `slot`.
fn unmet_for_all<'c>(
    containers: &'c [ContainerSpec],
    slot: &HostSlot<'_>,
) -> Option<(&'c ContainerSpec, String)> {
    let mut working = slot.clone();
    for container in containers {
        if let Some(requirement) = unmet_requirement(container, &working) {
            return Some((container, requirement));
        }
        working.load.reserve(container.resources.as_ref());
    }
    None
}

/// Mean container count across slots.
pub(crate) fn average_containers(slots: &[HostSlot<'_>]) -> f64 {
    if slots.is_empty() {
        return 0.0;
    }
    slots.iter().map(|s| s.load.containers as f64).sum::<f64>() / slots.len() as f64
}

/// Why `slot` cannot host `container`, or `None` if it can.
pub(crate) fn unmet_requirement(container: &ContainerSpec, slot: &HostSlot<'_>) -> Option<String> {
    let free = slot.load.free(&slot.info.resources);

    if let Some(request) = &container.resources {
        if request.cpus > free.cpus {
            return Some(format!(
                "requests {} CPUs, host has {} free",
                request.cpus, free.cpus
            ));
        }
        if request.memory_bytes > free.memory_bytes {
            return Some(format!(
                "requests {} bytes of memory, host has {} free",
                request.memory_bytes, free.memory_bytes
            ));
        }
    }

    container.constraint.as_ref().and_then(|c| unmet_constraint(c, slot))
}

fn unmet_constraint(constraint: &HostConstraint, slot: &HostSlot<'_>) -> Option<String> {
    let host = slot.info;
    let free = slot.load.free(&host.resources);

    if let Some(pinned) = &constraint.host_id {
        if pinned != &host.id {
            return Some(format!("pinned to host '{}'", pinned));
        }
    }

    if let Some(dc) = &constraint.datacenter {
        if host.datacenter.as_deref() != Some(dc.as_str()) {
            return Some(format!(
                "requires datacenter '{}', host is in '{}'",
                dc,
                host.datacenter.as_deref().unwrap_or("none")
            ));
        }
    }

    if let Some(min) = constraint.min_cpus {
        if free.cpus < min {
            return Some(format!("requires {} free CPUs, host has {}", min, free.cpus));
        }
    }

    if let Some(min) = constraint.min_memory {
        if free.memory_bytes < min {
            return Some(format!(
                "requires {} bytes of free memory, host has {}",
                min, free.memory_bytes
            ));
        }
    }

    let mut required: Vec<_> = constraint.labels.iter().collect();
    required.sort();
    for (key, value) in required {
        if host.labels.get(key) != Some(value) {
            return Some(format!("requires label {}={}", key, value));
        }
    }

    None
}

/// Placement error naming the container and why each host was rejected.
pub(crate) fn no_viable_host(container: &ContainerSpec, slots: &[HostSlot<'_>]) -> FleetError {
    let reasons = slots
        .iter()
        .filter_map(|s| unmet_requirement(container, s).map(|r| format!("{}: {}", s.id(), r)))
        .collect::<Vec<_>>();

    let reason = if reasons.is_empty() {
        format!("No viable host for container '{}'", container.name)
    } else {
        format!("No viable host for container '{}' ({})", container.name, reasons.join("; "))
    };
    FleetError::Placement { reason }
}
