//! Score-based placement.

use super::{average_containers, no_viable_host, unmet_requirement, HostSlot, Strategy};
use crate::error::Result;
use crate::types::{ContainerSpec, DeploymentConfig, HostInfo, ResourceLoad};

const BASE_SCORE: f64 = 100.0;
const MAX_CPU_SCORE: f64 = 30.0;
const MAX_MEMORY_SCORE: f64 = 30.0;
const MAX_LOAD_BONUS: f64 = 10.0;
const DATACENTER_BONUS: f64 = 20.0;

/// Score a host for the auto strategy.
///
/// `100 + cpu + memory + load + datacenter`, where cpu and memory each scale
/// linearly from 0 (nothing free) to 30 (fully free), load ranges over
/// [-10, 10] relative to `average_containers`, and datacenter is +20 on a
/// preference match, -20 on a mismatch and 0 without a preference.
pub fn score(
    host: &HostInfo,
    load: &ResourceLoad,
    average_containers: f64,
    preferred_datacenter: Option<&str>,
) -> f64 {
    let total = &host.resources;
    let free = load.free(total);

    let cpu_score = if total.cpus > 0.0 {
        (MAX_CPU_SCORE * free.cpus / total.cpus).clamp(0.0, MAX_CPU_SCORE)
    } else {
        0.0
    };

    let memory_score = if total.memory_bytes > 0 {
        (MAX_MEMORY_SCORE * free.memory_bytes as f64 / total.memory_bytes as f64)
            .clamp(0.0, MAX_MEMORY_SCORE)
    } else {
        0.0
    };

    let load_bonus = if average_containers > 0.0 {
        (MAX_LOAD_BONUS * (average_containers - load.containers as f64) / average_containers)
            .clamp(-MAX_LOAD_BONUS, MAX_LOAD_BONUS)
    } else {
        0.0
    };

    let datacenter_bonus = match preferred_datacenter {
        Some(dc) if host.datacenter.as_deref() == Some(dc) => DATACENTER_BONUS,
        Some(_) => -DATACENTER_BONUS,
        None => 0.0,
    };

    BASE_SCORE + cpu_score + memory_score + load_bonus + datacenter_bonus
}

pub(crate) struct AutoStrategy;

impl Strategy for AutoStrategy {
    fn select(
        &self,
        container: &ContainerSpec,
        slots: &[HostSlot<'_>],
        config: &DeploymentConfig,
    ) -> Result<usize> {
        let average = average_containers(slots);
        let mut best: Option<(usize, f64)> = None;

        // Slots are sorted by host ID, so a strict comparison keeps the lowest ID on ties.
        for (idx, slot) in slots.iter().enumerate() {
            if unmet_requirement(container, slot).is_some() {
                continue;
            }
            let s = score(slot.info, &slot.load, average, config.datacenter.as_deref());
            if best.map_or(true, |(_, best_score)| s > best_score) {
                best = Some((idx, s));
            }
        }

        best.map(|(idx, _)| idx).ok_or_else(|| no_viable_host(container, slots))
    }
}
