//! Stack lifecycle orchestration.
//!
//! Drives a stack through
//! `Pending -> Deploying -> {Running | PartiallyFailed | Failed} -> Stopping
//! -> Stopped -> Removing -> Removed`, placing containers, dispatching them
//! host by host through the connection pool and persisting the resulting
//! deployment record.

use super::dispatch::{self, DeployPlan, Teardown, TeardownTarget};
use flotilla_core::observability::metrics;
use flotilla_core::runtime::RuntimeClient;
use flotilla_core::types::PlacedContainer;
use flotilla_core::{
    Config, ContainerFailure, ContainerPlacement, ContainerState, DependencyGraph,
    DeploymentConfig, FleetError, HostConnectionPool, HostInfo, NetworkConfigurator,
    PlacementEngine, PlacementStrategy, ResourceLoad, Result, Stack, StackDefinition,
    StackDeployment, StackFilter, StackStatus, StackStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Deadlines applied to runtime calls, plus submission defaults.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Per create/stop/remove call
    pub operation_timeout: Duration,
    /// Grace period passed to the runtime before it kills a container
    pub stop_timeout: Duration,
    /// Per live load query
    pub load_timeout: Duration,
    /// Strategy for stacks submitted without a deployment config
    pub default_strategy: PlacementStrategy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            stop_timeout: config.stop_timeout(),
            load_timeout: config.ping_timeout(),
            default_strategy: config.default_strategy,
        }
    }
}

/// Stack orchestrator for multi-host deployments.
pub struct StackOrchestrator {
    pool: HostConnectionPool,
    store: Arc<dyn StackStore>,
    settings: OrchestratorSettings,
    /// Stacks with a lifecycle operation in flight
    busy: Mutex<HashSet<String>>,
}

/// Marks a stack busy until dropped.
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    stack_id: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.stack_id);
    }
}

impl StackOrchestrator {
    pub fn new(
        pool: HostConnectionPool,
        store: Arc<dyn StackStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { pool, store, settings, busy: Mutex::new(HashSet::new()) }
    }

    pub fn pool(&self) -> &HostConnectionPool {
        &self.pool
    }

    /// Create a `Pending` stack record.
    #[instrument(skip(self, config))]
    pub async fn submit_stack(&self, name: &str, config: DeploymentConfig) -> Result<Stack> {
        let stack = Stack::new(name, config);
        self.store.save_stack(&stack).await?;
        info!(stack_id = %stack.id, "Stack submitted");
        Ok(stack)
    }

    /// Create a `Pending` stack using the configured default strategy.
    pub async fn submit_stack_with_defaults(&self, name: &str) -> Result<Stack> {
        self.submit_stack(name, DeploymentConfig::with_strategy(self.settings.default_strategy))
            .await
    }

    pub async fn get_stack(&self, stack_id: &str) -> Result<Stack> {
        self.store.get_stack(stack_id).await
    }

    pub async fn list_stacks(&self, filter: &StackFilter) -> Result<Vec<Stack>> {
        self.store.list_stacks(filter).await
    }

    pub async fn get_deployment(&self, stack_id: &str) -> Result<StackDeployment> {
        self.store.get_deployment(stack_id).await
    }

    /// Deploy a stack. See `deploy_stack_with_cancel`.
    pub async fn deploy_stack(
        &self,
        stack_id: &str,
        definition: &StackDefinition,
        hosts: &[HostInfo],
        loads: &HashMap<String, ResourceLoad>,
    ) -> Result<StackDeployment> {
        self.deploy_stack_with_cancel(stack_id, definition, hosts, loads, CancellationToken::new())
            .await
    }

    /// Place and start every container of `definition` on `hosts`.
    ///
    /// Hosts missing from `loads` have their load queried live; a host whose
    /// query fails is not considered. Placement, dependency-cycle and
    /// registration errors fail the deployment before any container is
    /// created. Otherwise every container is attempted (or skipped when a
    /// dependency is not running) and a `PartialDeployment` error carrying the
    /// record is returned if any container did not start.
    ///
    /// Once `cancel` fires no further container is created; unattempted
    /// containers are recorded as skipped.
    ///
    /// If anything fails once the stack is `Deploying`, the stack is settled
    /// (to `Failed` unless some containers already run) before the error is
    /// returned, so it never stays `Deploying`.
    #[instrument(skip_all, fields(stack_id = %stack_id, containers = definition.containers.len()))]
    pub async fn deploy_stack_with_cancel(
        &self,
        stack_id: &str,
        definition: &StackDefinition,
        hosts: &[HostInfo],
        loads: &HashMap<String, ResourceLoad>,
        cancel: CancellationToken,
    ) -> Result<StackDeployment> {
        let _guard = self.claim(stack_id, "deploy").await?;
        let mut stack = self.store.get_stack(stack_id).await?;
        if !matches!(stack.status, StackStatus::Pending | StackStatus::Failed) {
            return Err(invalid_transition(&stack, "deploy"));
        }

        let started = Instant::now();
        info!(strategy = %stack.config.strategy, hosts = hosts.len(), "Deploying stack");

        stack.set_status(StackStatus::Deploying);
        self.store.update_stack(&stack).await?;

        let mut deployment = StackDeployment::new(stack_id);
        deployment.set_status(StackStatus::Deploying);

        if let Err(e) =
            self.run_deploy(&mut stack, &mut deployment, definition, hosts, loads, cancel).await
        {
            warn!(error = %e, "Deployment failed");
            if deployment.status.is_in_progress() {
                let status = deployment.settled_status();
                deployment.set_status(status);
            }
            if let Err(settle_err) = self.settle(&mut stack, &deployment).await {
                error!(error = %settle_err, "Could not record failed deployment");
            }
            metrics::record_deploy_duration(started.elapsed().as_secs_f64(), "failed");
            return Err(e);
        }

        let status = deployment.status;
        metrics::record_deploy_duration(started.elapsed().as_secs_f64(), status.as_str());

        let failures = deployment.failures();
        if failures.is_empty() {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Stack running");
            Ok(deployment)
        } else {
            warn!(%status, failed = failures.len(), "Stack deployed with failures");
            Err(FleetError::PartialDeployment {
                stack_id: stack_id.to_string(),
                operation: "deploy",
                failures,
                deployment: Box::new(deployment),
            })
        }
    }

    /// Plan, dispatch and settle one attempt. On error `deployment` holds
    /// whatever was recorded so far.
    async fn run_deploy(
        &self,
        stack: &mut Stack,
        deployment: &mut StackDeployment,
        definition: &StackDefinition,
        hosts: &[HostInfo],
        loads: &HashMap<String, ResourceLoad>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.store.save_deployment(deployment).await?;
        let (plan, clients) = self.plan(stack, definition, hosts, loads).await?;

        deployment.network = plan.network.clone();
        deployment.containers = plan
            .containers
            .iter()
            .enumerate()
            .map(|(idx, spec)| PlacedContainer {
                placement: ContainerPlacement {
                    container: spec.name.clone(),
                    host_id: plan.hosts[idx].clone(),
                    address: plan.network.address_of(&spec.name).unwrap_or_default().to_string(),
                },
                outcome: Default::default(),
            })
            .collect();
        self.store.update_deployment(deployment).await?;

        let outcomes =
            dispatch::deploy(Arc::new(plan), clients, self.settings.operation_timeout, cancel).await;
        for (container, outcome) in deployment.containers.iter_mut().zip(outcomes) {
            container.outcome = outcome;
        }

        let status = deployment.settled_status();
        deployment.set_status(status);
        self.settle(stack, deployment).await
    }

    /// Dependency order, placement, network and runtime handles for one attempt.
    async fn plan(
        &self,
        stack: &Stack,
        definition: &StackDefinition,
        hosts: &[HostInfo],
        loads: &HashMap<String, ResourceLoad>,
    ) -> Result<(DeployPlan, HashMap<String, Arc<dyn RuntimeClient>>)> {
        definition.validate()?;
        let graph = DependencyGraph::from_containers(&definition.containers)?;
        let order = graph.topological_order()?;

        let (candidates, loads) = self.resolve_loads(hosts, loads).await;
        if candidates.is_empty() && !hosts.is_empty() {
            warn!("No host answered its load query");
        }

        let placements =
            PlacementEngine::place(&definition.containers, &candidates, &loads, &stack.config)?;

        let mut clients = HashMap::new();
        for placement in &placements {
            if !clients.contains_key(&placement.host_id) {
                let client = self.pool.get_client(&placement.host_id).await?;
                clients.insert(placement.host_id.clone(), client);
            }
        }

        let network = NetworkConfigurator::configure(&placements, &definition.containers);
        let plan = DeployPlan {
            stack_id: stack.id.clone(),
            stack_name: stack.name.clone(),
            containers: definition.containers.clone(),
            graph,
            order,
            hosts: placements.into_iter().map(|p| p.host_id).collect(),
            network,
        };
        Ok((plan, clients))
    }

    /// Fill in live loads for hosts the caller gave none for.
    async fn resolve_loads(
        &self,
        hosts: &[HostInfo],
        supplied: &HashMap<String, ResourceLoad>,
    ) -> (Vec<HostInfo>, HashMap<String, ResourceLoad>) {
        let missing: Vec<String> =
            hosts.iter().filter(|h| !supplied.contains_key(&h.id)).map(|h| h.id.clone()).collect();

        let mut loads = supplied.clone();
        if !missing.is_empty() {
            debug!(hosts = missing.len(), "Querying live loads");
            loads.extend(self.pool.live_loads(&missing, self.settings.load_timeout).await);
        }

        let candidates = hosts.iter().filter(|h| loads.contains_key(&h.id)).cloned().collect();
        (candidates, loads)
    }

    /// Stop every created container. Stopping a stopped or removed stack is a no-op.
    ///
    /// Every container is attempted; the stack ends `Stopped` regardless, with
    /// any per-container failures returned as `PartialDeployment`. A stack
    /// left in an in-progress status by an interrupted operation is stopped too.
    #[instrument(skip(self))]
    pub async fn stop_stack(&self, stack_id: &str) -> Result<StackDeployment> {
        let _guard = self.claim(stack_id, "stop").await?;
        let Some(mut stack) = self.live_stack(stack_id).await? else {
            return self.store.get_deployment(stack_id).await;
        };
        if stack.status.is_terminal() {
            return self.store.get_deployment(stack_id).await;
        }
        if stack.status.is_in_progress() {
            warn!(status = %stack.status, "Stopping stack left mid-operation");
        } else if !matches!(
            stack.status,
            StackStatus::Running | StackStatus::PartiallyFailed | StackStatus::Failed
        ) {
            return Err(invalid_transition(&stack, "stop"));
        }

        let timeout = self.settings.stop_timeout;
        self.teardown(&mut stack, Teardown::Stop { timeout }, StackStatus::Stopping, StackStatus::Stopped)
            .await
    }

    /// Remove every created container and delete the stack record.
    ///
    /// The `Removed` deployment record is kept, so repeating the call is a
    /// no-op. Failures are reported as with `stop_stack`. Any status is
    /// accepted once no other operation holds the stack, which recovers stacks
    /// stuck in progress.
    #[instrument(skip(self))]
    pub async fn remove_stack(&self, stack_id: &str, remove_volumes: bool) -> Result<StackDeployment> {
        let _guard = self.claim(stack_id, "remove").await?;
        let Some(mut stack) = self.live_stack(stack_id).await? else {
            return self.store.get_deployment(stack_id).await;
        };
        if stack.status.is_in_progress() {
            warn!(status = %stack.status, "Removing stack left mid-operation");
        }

        let result = self
            .teardown(
                &mut stack,
                Teardown::Remove { remove_volumes },
                StackStatus::Removing,
                StackStatus::Removed,
            )
            .await;

        if matches!(&result, Ok(_) | Err(FleetError::PartialDeployment { .. })) {
            self.store.delete_stack(stack_id).await?;
            info!("Stack removed");
        }
        result
    }

    /// The stack record, or `None` if only a `Removed` tombstone remains.
    async fn live_stack(&self, stack_id: &str) -> Result<Option<Stack>> {
        match self.store.get_stack(stack_id).await {
            Ok(stack) => Ok(Some(stack)),
            Err(FleetError::StackNotFound { .. }) => match self.store.get_deployment(stack_id).await {
                Ok(d) if d.status == StackStatus::Removed => {
                    debug!("Stack already removed");
                    Ok(None)
                }
                _ => Err(FleetError::StackNotFound { stack_id: stack_id.to_string() }),
            },
            Err(e) => Err(e),
        }
    }

    async fn teardown(
        &self,
        stack: &mut Stack,
        op: Teardown,
        during: StackStatus,
        done: StackStatus,
    ) -> Result<StackDeployment> {
        let mut deployment = match self.store.get_deployment(&stack.id).await {
            Ok(deployment) => deployment,
            Err(FleetError::DeploymentNotFound { .. }) => {
                let deployment = StackDeployment::new(&stack.id);
                self.store.save_deployment(&deployment).await?;
                deployment
            }
            Err(e) => return Err(e),
        };

        info!(op = op.name(), "Tearing down stack");
        stack.set_status(during);
        self.store.update_stack(stack).await?;
        deployment.set_status(during);
        self.store.update_deployment(&deployment).await?;

        // Dependents first.
        let targets: Vec<TeardownTarget> = deployment
            .containers
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(index, c)| {
                c.outcome.container_id.as_ref().map(|id| TeardownTarget {
                    index,
                    host_id: c.placement.host_id.clone(),
                    container_id: id.clone(),
                })
            })
            .filter(|t| deployment.containers[t.index].outcome.state != ContainerState::Removed)
            .collect();

        let clients = self.clients_for(targets.iter().map(|t| t.host_id.as_str())).await;
        let results = dispatch::teardown(targets, clients, op, self.settings.operation_timeout).await;

        let settled_state = match op {
            Teardown::Stop { .. } => ContainerState::Stopped,
            Teardown::Remove { .. } => ContainerState::Removed,
        };
        let mut failures = Vec::new();
        for (index, error) in results {
            let container = &mut deployment.containers[index];
            match error {
                None => {
                    container.outcome.state = settled_state;
                    container.outcome.error = None;
                }
                Some(e) => {
                    failures.push(ContainerFailure::new(
                        &container.placement.container,
                        &container.placement.host_id,
                        &e,
                    ));
                    container.outcome.error = Some(e);
                }
            }
        }

        deployment.set_status(done);
        self.settle(stack, &deployment).await?;

        if failures.is_empty() {
            Ok(deployment)
        } else {
            warn!(op = op.name(), failed = failures.len(), "Teardown finished with failures");
            Err(FleetError::PartialDeployment {
                stack_id: stack.id.clone(),
                operation: op.name(),
                failures,
                deployment: Box::new(deployment),
            })
        }
    }

    /// Handles for the distinct hosts named; unregistered hosts are left out.
    async fn clients_for<'a>(
        &self,
        host_ids: impl Iterator<Item = &'a str>,
    ) -> HashMap<String, Arc<dyn RuntimeClient>> {
        let mut clients = HashMap::new();
        for host_id in host_ids {
            if clients.contains_key(host_id) {
                continue;
            }
            match self.pool.get_client(host_id).await {
                Ok(client) => {
                    clients.insert(host_id.to_string(), client);
                }
                Err(e) => warn!(host_id, error = %e, "No handle for host"),
            }
        }
        clients
    }

    /// Persist the deployment and mirror its status onto the stack.
    async fn settle(&self, stack: &mut Stack, deployment: &StackDeployment) -> Result<()> {
        self.store.update_deployment(deployment).await?;
        stack.set_status(deployment.status);
        if let Err(e) = self.store.update_stack(stack).await {
            error!(error = %e, "Failed to persist stack status");
            return Err(e);
        }
        Ok(())
    }

    /// Mark `stack_id` busy, or fail with the status of the operation already running.
    async fn claim(&self, stack_id: &str, operation: &'static str) -> Result<BusyGuard<'_>> {
        let claimed =
            self.busy.lock().unwrap_or_else(|e| e.into_inner()).insert(stack_id.to_string());
        if claimed {
            return Ok(BusyGuard { busy: &self.busy, stack_id: stack_id.to_string() });
        }

        let stack = self.store.get_stack(stack_id).await?;
        Err(invalid_transition(&stack, operation))
    }
}

fn invalid_transition(stack: &Stack, operation: &'static str) -> FleetError {
    FleetError::InvalidTransition { stack_id: stack.id.clone(), operation, status: stack.status }
}
