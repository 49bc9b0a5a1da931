//! Count-balancing placement, optionally confined to one datacenter.

use super::{no_viable_host, unmet_requirement, HostSlot, Strategy};
use crate::error::{FleetError, Result};
use crate::types::{ContainerSpec, DeploymentConfig};

pub(crate) struct SpreadStrategy;

impl Strategy for SpreadStrategy {
    fn select(
        &self,
        container: &ContainerSpec,
        slots: &[HostSlot<'_>],
        _config: &DeploymentConfig,
    ) -> Result<usize> {
        // min_by_key returns the first minimum, which is the lowest host ID.
        slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| unmet_requirement(container, slot).is_none())
            .min_by_key(|(_, slot)| slot.load.containers)
            .map(|(idx, _)| idx)
            .ok_or_else(|| no_viable_host(container, slots))
    }
}

pub(crate) struct DatacenterStrategy;

impl Strategy for DatacenterStrategy {
    fn candidates<'a>(
        &self,
        slots: Vec<HostSlot<'a>>,
        config: &DeploymentConfig,
    ) -> Result<Vec<HostSlot<'a>>> {
        let Some(datacenter) = config.datacenter.as_deref() else {
            return Err(FleetError::Placement {
                reason: "Datacenter strategy requires a datacenter".to_string(),
            });
        };

        let filtered: Vec<_> = slots
            .into_iter()
            .filter(|s| s.info.datacenter.as_deref() == Some(datacenter))
            .collect();

        if filtered.is_empty() {
            return Err(FleetError::Placement {
                reason: format!("No hosts in datacenter '{}'", datacenter),
            });
        }
        Ok(filtered)
    }

    fn select(
        &self,
        container: &ContainerSpec,
        slots: &[HostSlot<'_>],
        config: &DeploymentConfig,
    ) -> Result<usize> {
        SpreadStrategy.select(container, slots, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::tests::host;
    use crate::placement::PlacementEngine;
    use crate::types::{HostConstraint, PlacementStrategy, ResourceLoad};
    use std::collections::HashMap;

    fn spread() -> DeploymentConfig {
        DeploymentConfig::with_strategy(PlacementStrategy::Spread)
    }

    fn containers(n: usize) -> Vec<ContainerSpec> {
        (0..n).map(|i| ContainerSpec::new(format!("c{}", i), "img")).collect()
    }

    #[test]
    fn test_spread_round_robin() {
        let hosts = vec![host("hB", 4.0), host("hA", 4.0)];
        let placements =
            PlacementEngine::place(&containers(4), &hosts, &HashMap::new(), &spread()).unwrap();
        let assigned: Vec<_> = placements.iter().map(|p| p.host_id.as_str()).collect();
        assert_eq!(assigned, vec!["hA", "hB", "hA", "hB"]);
    }

    #[test]
    fn test_spread_balance_within_one() {
        for m in 1..=6 {
            let hosts: Vec<_> = (0..m).map(|i| host(&format!("h{:02}", i), 4.0)).collect();
            for n in m..=(m * 5 + 3) {
                let placements =
                    PlacementEngine::place(&containers(n), &hosts, &HashMap::new(), &spread())
                        .unwrap();
                let mut counts: HashMap<&str, usize> =
                    hosts.iter().map(|h| (h.id.as_str(), 0)).collect();
                for p in &placements {
                    *counts.get_mut(p.host_id.as_str()).unwrap() += 1;
                }
                let max = counts.values().max().copied().unwrap();
                let min = counts.values().min().copied().unwrap();
                assert!(max - min <= 1, "m={} n={} counts={:?}", m, n, counts);
            }
        }
    }

    #[test]
    fn test_spread_fills_least_loaded_first() {
        let hosts = vec![host("h1", 4.0), host("h2", 4.0)];
        let mut loads = HashMap::new();
        loads.insert("h1".to_string(), ResourceLoad::new(0.0, 0, 3));

        let placements =
            PlacementEngine::place(&containers(4), &hosts, &loads, &spread()).unwrap();
        let on_h2 = placements.iter().filter(|p| p.host_id == "h2").count();
        assert_eq!(on_h2, 3);
    }

    #[test]
    fn test_spread_respects_constraints() {
        let hosts = vec![host("h1", 4.0), host("h2", 4.0)];
        let specs = vec![
            ContainerSpec::new("a", "img").with_constraint(HostConstraint::on_host("h2")),
            ContainerSpec::new("b", "img").with_constraint(HostConstraint::on_host("h2")),
        ];
        let placements = PlacementEngine::place(&specs, &hosts, &HashMap::new(), &spread()).unwrap();
        assert!(placements.iter().all(|p| p.host_id == "h2"));
    }

    #[test]
    fn test_datacenter_filters_then_spreads() {
        let hosts = vec![
            host("h1", 4.0).with_datacenter("eu-west"),
            host("h2", 4.0).with_datacenter("us-east"),
            host("h3", 4.0).with_datacenter("eu-west"),
        ];
        let config = DeploymentConfig {
            strategy: PlacementStrategy::Datacenter,
            datacenter: Some("eu-west".to_string()),
            ..Default::default()
        };
        let placements =
            PlacementEngine::place(&containers(4), &hosts, &HashMap::new(), &config).unwrap();
        let assigned: Vec<_> = placements.iter().map(|p| p.host_id.as_str()).collect();
        assert_eq!(assigned, vec!["h1", "h3", "h1", "h3"]);
    }

    #[test]
    fn test_datacenter_empty_or_missing() {
        let hosts = vec![host("h1", 4.0).with_datacenter("us-east")];

        let config = DeploymentConfig {
            strategy: PlacementStrategy::Datacenter,
            datacenter: Some("eu-west".to_string()),
            ..Default::default()
        };
        let err =
            PlacementEngine::place(&containers(1), &hosts, &HashMap::new(), &config).unwrap_err();
        assert!(matches!(err, FleetError::Placement { .. }));
        assert!(err.to_string().contains("eu-west"));

        let unset = DeploymentConfig::with_strategy(PlacementStrategy::Datacenter);
        let err =
            PlacementEngine::place(&containers(1), &hosts, &HashMap::new(), &unset).unwrap_err();
        assert!(matches!(err, FleetError::Placement { .. }));
    }
}
