//! Explicit host assignment.

use super::{unmet_requirement, HostSlot, Strategy};
use crate::error::{FleetError, Result};
use crate::types::{ContainerSpec, DeploymentConfig};

pub(crate) struct ManualStrategy;

/// Host named for `container`: its constraint first, then the config's host map.
pub(crate) fn explicit_host<'a>(
    container: &'a ContainerSpec,
    config: &'a DeploymentConfig,
) -> Result<&'a str> {
    container
        .constraint
        .as_ref()
        .and_then(|c| c.host_id.as_deref())
        .or_else(|| config.manual_hosts.get(&container.name).map(String::as_str))
        .ok_or_else(|| FleetError::ConstraintViolation {
            container: container.name.clone(),
            host: "<none>".to_string(),
            requirement: "manual placement requires an explicit host".to_string(),
        })
}

/// Validate that `slot` meets every requirement of `container`.
fn check_host(container: &ContainerSpec, slot: &HostSlot<'_>) -> Result<()> {
    match unmet_requirement(container, slot) {
        Some(requirement) => Err(FleetError::ConstraintViolation {
            container: container.name.clone(),
            host: slot.info.id.clone(),
            requirement,
        }),
        None => Ok(()),
    }
}

impl Strategy for ManualStrategy {
    fn select(
        &self,
        container: &ContainerSpec,
        slots: &[HostSlot<'_>],
        config: &DeploymentConfig,
    ) -> Result<usize> {
        let host = explicit_host(container, config)?;

        let idx = slots.iter().position(|s| s.info.id == host).ok_or_else(|| {
            FleetError::ConstraintViolation {
                container: container.name.clone(),
                host: host.to_string(),
                requirement: "host is not registered".to_string(),
            }
        })?;

        check_host(container, &slots[idx])?;
        Ok(idx)
    }
}
