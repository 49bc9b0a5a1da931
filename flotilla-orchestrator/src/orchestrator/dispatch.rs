//! Per-host dispatch.
//!
//! One task per host. Each task walks its containers in the stack's global
//! dependency order and publishes every container's settled state on a
//! `watch` channel; dependents on any host wait on those channels before
//! their own attempt starts. Because every task follows the same global
//! order, the lowest unsettled container always has all of its
//! dependencies settled, so the tasks cannot wait on each other in a cycle.

use flotilla_core::network::NetworkConfigurator;
use flotilla_core::observability::metrics;
use flotilla_core::runtime::{with_timeout, RuntimeClient, RuntimeError, StackRef};
use flotilla_core::types::{ContainerOutcome, ContainerSpec, ContainerState, NetworkConfig};
use flotilla_core::DependencyGraph;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

/// Everything the per-host tasks share for one deploy attempt.
pub(crate) struct DeployPlan {
    pub stack_id: String,
    pub stack_name: String,
    /// Definition order
    pub containers: Vec<ContainerSpec>,
    pub graph: DependencyGraph,
    /// Global dependency order (indices into `containers`)
    pub order: Vec<usize>,
    /// Container index -> assigned host ID
    pub hosts: Vec<String>,
    pub network: NetworkConfig,
}

impl DeployPlan {
    /// Container indices per host, each list in global dependency order.
    fn by_host(&self) -> BTreeMap<String, Vec<usize>> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &idx in &self.order {
            groups.entry(self.hosts[idx].clone()).or_default().push(idx);
        }
        groups
    }
}

/// Create and start every container. Returns one outcome per container, in definition order.
pub(crate) async fn deploy(
    plan: Arc<DeployPlan>,
    clients: HashMap<String, Arc<dyn RuntimeClient>>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Vec<ContainerOutcome> {
    let count = plan.containers.len();
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..count).map(|_| watch::channel(ContainerState::Pending)).unzip();
    let receivers = Arc::new(receivers);
    let mut senders: Vec<Option<watch::Sender<ContainerState>>> =
        senders.into_iter().map(Some).collect();

    let mut outcomes = vec![ContainerOutcome::default(); count];
    let mut tasks = Vec::new();

    for (host_id, indices) in plan.by_host() {
        let own: Vec<(usize, watch::Sender<ContainerState>)> =
            indices.iter().filter_map(|&i| senders[i].take().map(|tx| (i, tx))).collect();

        let Some(client) = clients.get(&host_id).cloned() else {
            for (idx, tx) in own {
                outcomes[idx] = ContainerOutcome::failed(format!("host '{}' is not registered", host_id));
                tx.send_replace(ContainerState::Failed);
            }
            continue;
        };

        let span = tracing::info_span!("host_dispatch", host_id = %host_id);
        let task = HostTask {
            plan: plan.clone(),
            receivers: receivers.clone(),
            client,
            timeout,
            cancel: cancel.clone(),
        };
        tasks.push((indices, tokio::spawn(task.run(own).instrument(span))));
    }

    let (indices, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    for (indices, joined) in indices.into_iter().zip(join_all(handles).await) {
        match joined {
            Ok(results) => {
                for (idx, outcome) in results {
                    outcomes[idx] = outcome;
                }
            }
            Err(e) => {
                error!(error = %e, "Host dispatch task aborted");
                for idx in indices {
                    outcomes[idx] = ContainerOutcome::failed(format!("dispatch aborted: {}", e));
                }
            }
        }
    }

    for outcome in &outcomes {
        metrics::record_container_outcome("deploy", outcome.state.as_str());
    }
    outcomes
}

struct HostTask {
    plan: Arc<DeployPlan>,
    receivers: Arc<Vec<watch::Receiver<ContainerState>>>,
    client: Arc<dyn RuntimeClient>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl HostTask {
    async fn run(
        self,
        own: Vec<(usize, watch::Sender<ContainerState>)>,
    ) -> Vec<(usize, ContainerOutcome)> {
        let mut results = Vec::with_capacity(own.len());
        let mut unreachable: Option<String> = None;

        for (idx, tx) in own {
            let outcome = match &unreachable {
                Some(reason) => ContainerOutcome::failed(format!("host unreachable: {}", reason)),
                None => match self.attempt(idx).await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_connection_failure() => {
                        warn!(error = %e, "Host became unreachable, failing its remaining containers");
                        unreachable = Some(e.to_string());
                        ContainerOutcome::failed(e.to_string())
                    }
                    Err(e) => ContainerOutcome::failed(e.to_string()),
                },
            };

            tx.send_replace(outcome.state);
            results.push((idx, outcome));
        }

        results
    }

    /// Wait for dependencies, then create and start one container.
    ///
    /// Skips are outcomes; a runtime failure is returned as the error.
    async fn attempt(&self, idx: usize) -> Result<ContainerOutcome, RuntimeError> {
        let spec = &self.plan.containers[idx];

        for &dep in self.plan.graph.dependencies(idx) {
            let mut rx = self.receivers[dep].clone();
            let settled = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(ContainerOutcome::skipped("cancelled")),
                state = rx.wait_for(|s| *s != ContainerState::Pending) => {
                    state.map(|s| *s).unwrap_or(ContainerState::Failed)
                }
            };

            if settled != ContainerState::Running {
                let name = self.plan.graph.name(dep);
                debug!(container = %spec.name, dependency = %name, "Skipping container");
                return Ok(ContainerOutcome::skipped(format!("dependency '{}' is not running", name)));
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(ContainerOutcome::skipped("cancelled"));
        }

        let env = NetworkConfigurator::container_env(spec, &self.plan.network);
        let stack = StackRef { id: &self.plan.stack_id, name: &self.plan.stack_name };
        let create = self.client.create_and_start(stack, spec, &env);

        let container_id = with_timeout(self.timeout, "create", create).await.map_err(|e| {
            warn!(container = %spec.name, error = %e, "Container creation failed");
            e
        })?;

        debug!(container = %spec.name, container_id = %container_id, "Container running");
        Ok(ContainerOutcome::running(container_id))
    }
}

/// Best-effort teardown operation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Teardown {
    Stop { timeout: Duration },
    Remove { remove_volumes: bool },
}

impl Teardown {
    pub fn name(&self) -> &'static str {
        match self {
            Teardown::Stop { .. } => "stop",
            Teardown::Remove { .. } => "remove",
        }
    }
}

/// One created container to tear down.
#[derive(Debug, Clone)]
pub(crate) struct TeardownTarget {
    pub index: usize,
    pub host_id: String,
    pub container_id: String,
}

/// Apply `op` to every target; hosts run concurrently, each host's targets in order.
///
/// Every target is attempted. Returns `(index, error)` per target, `None` on success.
pub(crate) async fn teardown(
    targets: Vec<TeardownTarget>,
    clients: HashMap<String, Arc<dyn RuntimeClient>>,
    op: Teardown,
    timeout: Duration,
) -> Vec<(usize, Option<String>)> {
    let mut groups: BTreeMap<String, Vec<TeardownTarget>> = BTreeMap::new();
    for target in targets {
        groups.entry(target.host_id.clone()).or_default().push(target);
    }

    let mut results = Vec::new();
    let mut tasks = Vec::new();

    for (host_id, group) in groups {
        let Some(client) = clients.get(&host_id).cloned() else {
            let reason = format!("host '{}' is not registered", host_id);
            results.extend(group.iter().map(|t| (t.index, Some(reason.clone()))));
            continue;
        };

        let span = tracing::info_span!("host_teardown", host_id = %host_id, op = op.name());
        let indices: Vec<usize> = group.iter().map(|t| t.index).collect();
        tasks.push((indices, tokio::spawn(
            async move {
                let mut results = Vec::with_capacity(group.len());
                for target in group {
                    let call = async {
                        match op {
                            Teardown::Stop { timeout: grace } => {
                                client.stop(&target.container_id, grace).await
                            }
                            Teardown::Remove { remove_volumes } => {
                                client.remove(&target.container_id, remove_volumes).await
                            }
                        }
                    };
                    let error = match with_timeout(timeout, op.name(), call).await {
                        // Already gone counts as done.
                        Ok(()) | Err(RuntimeError::ContainerNotFound(_)) => None,
                        Err(e) => {
                            warn!(container_id = %target.container_id, error = %e, "Teardown failed");
                            Some(e.to_string())
                        }
                    };
                    results.push((target.index, error));
                }
                results
            }
            .instrument(span),
        )));
    }

    // An aborted host task leaves its targets unconfirmed; report them all as failed.
    let (indices, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    for (indices, joined) in indices.into_iter().zip(join_all(handles).await) {
        match joined {
            Ok(host_results) => results.extend(host_results),
            Err(e) => {
                error!(error = %e, "Host teardown task aborted");
                let reason = format!("teardown aborted: {}", e);
                results.extend(indices.into_iter().map(|idx| (idx, Some(reason.clone()))));
            }
        }
    }

    for (_, error) in &results {
        let state = if error.is_none() { "ok" } else { "failed" };
        metrics::record_container_outcome(op.name(), state);
    }
    results
}
