//! Docker Engine runtime client.

use super::{RuntimeClient, RuntimeConnector, RuntimeError, RuntimeResult, StackRef};
use crate::types::{ContainerSpec, Protocol, ResourceLoad};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Label keys written on every managed container.
pub const LABEL_STACK: &str = "io.flotilla.stack";
pub const LABEL_STACK_NAME: &str = "io.flotilla.stack-name";
pub const LABEL_CONTAINER: &str = "io.flotilla.container";
pub const LABEL_CPUS: &str = "io.flotilla.cpus";
pub const LABEL_MEMORY: &str = "io.flotilla.memory";

/// Runtime client for one Docker host.
pub struct DockerRuntime {
    docker: Docker,
    endpoint: String,
}

impl DockerRuntime {
    /// Connect to `endpoint` (`unix://<path>`, `tcp://host:port` or `http://host:port`).
    ///
    /// Construction does not contact the daemon; call `ping` to verify.
    pub fn connect(endpoint: &str, timeout: Duration) -> RuntimeResult<Self> {
        let secs = timeout.as_secs().max(1);

        let docker = if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, secs, API_DEFAULT_VERSION)
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            Docker::connect_with_http(&format!("http://{}", addr), secs, API_DEFAULT_VERSION)
        } else if endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, secs, API_DEFAULT_VERSION)
        } else {
            return Err(RuntimeError::Unreachable(format!(
                "unsupported endpoint '{}' (expected unix://, tcp:// or http://)",
                endpoint
            )));
        }
        .map_err(|e| RuntimeError::Unreachable(format!("{}: {}", endpoint, e)))?;

        Ok(Self { docker, endpoint: endpoint.to_string() })
    }

    fn container_name(stack: StackRef<'_>, container: &str) -> String {
        format!("{}-{}", stack.prefix(), container)
    }

    fn build_config(
        stack: StackRef<'_>,
        spec: &ContainerSpec,
        env: &HashMap<String, String>,
    ) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(LABEL_STACK.to_string(), stack.id.to_string());
        labels.insert(LABEL_STACK_NAME.to_string(), stack.name.to_string());
        labels.insert(LABEL_CONTAINER.to_string(), spec.name.clone());

        let mut host_config = HostConfig::default();
        if let Some(request) = &spec.resources {
            labels.insert(LABEL_CPUS.to_string(), request.cpus.to_string());
            labels.insert(LABEL_MEMORY.to_string(), request.memory_bytes.to_string());
            host_config.nano_cpus = Some((request.cpus * 1e9) as i64);
            if request.memory_bytes > 0 {
                host_config.memory = Some(request.memory_bytes.min(i64::MAX as u64) as i64);
            }
        }

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let proto = match port.protocol {
                Protocol::Tcp => "tcp",
                Protocol::Udp => "udp",
            };
            let key = format!("{}/{}", port.container_port, proto);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.published_port().to_string()),
                }]),
            );
        }
        if !port_bindings.is_empty() {
            host_config.port_bindings = Some(port_bindings);
        }

        let mut env: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        env.sort();

        Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        info!(endpoint = %self.endpoint, image, "Pulling image");
        let options = CreateImageOptions { from_image: image.to_string(), ..Default::default() };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| match classify(e) {
                RuntimeError::ContainerNotFound(msg) => RuntimeError::ImageNotFound(msg),
                other => other,
            })?;
        Ok(())
    }

    async fn create(&self, name: &str, config: Config<String>) -> RuntimeResult<String> {
        let options = CreateContainerOptions { name: name.to_string(), platform: None };
        let created =
            self.docker.create_container(Some(options), config).await.map_err(classify)?;
        Ok(created.id)
    }

    /// Force-remove a container by ID or name.
    async fn discard(&self, container: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions { v: false, force: true, link: false };
        self.docker.remove_container(container, Some(options)).await.map_err(classify)
    }
}

/// Await `start`; if it fails, await `discard` so the created container does
/// not outlive the failed attempt. The start error is returned either way.
async fn start_or_discard<S, D>(container_id: &str, start: S, discard: D) -> RuntimeResult<()>
where
    S: Future<Output = RuntimeResult<()>>,
    D: Future<Output = RuntimeResult<()>>,
{
    let Err(e) = start.await else {
        return Ok(());
    };
    if let Err(cleanup) = discard.await {
        warn!(container_id, error = %cleanup, "Could not remove container after failed start");
    }
    Err(e)
}

/// Map a bollard error onto the runtime taxonomy.
fn classify(err: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error;

    match err {
        Error::DockerResponseServerError { status_code, message } => match status_code {
            404 if message.contains("image") => RuntimeError::ImageNotFound(message),
            404 => RuntimeError::ContainerNotFound(message),
            409 => RuntimeError::Conflict(message),
            _ => RuntimeError::Api(format!("{} ({})", message, status_code)),
        },
        Error::RequestTimeoutError => RuntimeError::Timeout("Docker API request".to_string()),
        e @ Error::IOError { .. } => RuntimeError::Unreachable(e.to_string()),
        other if caused_by_io(&other) => RuntimeError::Unreachable(other.to_string()),
        other => RuntimeError::Api(other.to_string()),
    }
}

/// Transport failures surface as an `io::Error` somewhere in the source chain.
fn caused_by_io(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = err.source();
    while let Some(e) = current {
        if e.is::<std::io::Error>() {
            return true;
        }
        current = e.source();
    }
    false
}

fn parse_label<T: std::str::FromStr>(labels: &HashMap<String, String>, key: &str) -> Option<T> {
    labels.get(key).and_then(|v| v.parse().ok())
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.docker.ping().await.map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self, spec, env), fields(endpoint = %self.endpoint, container = %spec.name))]
    async fn create_and_start(
        &self,
        stack: StackRef<'_>,
        spec: &ContainerSpec,
        env: &HashMap<String, String>,
    ) -> RuntimeResult<String> {
        let name = Self::container_name(stack, &spec.name);
        let config = || Self::build_config(stack, spec, env);

        let container_id = match self.create(&name, config()).await {
            Ok(id) => id,
            Err(RuntimeError::ImageNotFound(_)) => {
                self.pull_image(&spec.image).await?;
                self.create(&name, config()).await?
            }
            // Left behind by an earlier attempt of this stack.
            Err(RuntimeError::Conflict(message)) => {
                warn!(name = %name, %message, "Replacing leftover container");
                self.discard(&name).await?;
                self.create(&name, config()).await?
            }
            Err(e) => return Err(e),
        };

        let start = async {
            self.docker
                .start_container(&container_id, None::<StartContainerOptions<String>>)
                .await
                .map_err(classify)
        };
        start_or_discard(&container_id, start, self.discard(&container_id)).await?;

        debug!(container_id = %container_id, name = %name, "Container started");
        Ok(container_id)
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions { t: timeout.as_secs() as i64 };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => {
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn remove(&self, container_id: &str, remove_volumes: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions { v: remove_volumes, force: true, link: false };
        self.docker.remove_container(container_id, Some(options)).await.map_err(classify)
    }

    async fn load(&self) -> RuntimeResult<ResourceLoad> {
        let options = ListContainersOptions::<String> { all: false, ..Default::default() };
        let running = self.docker.list_containers(Some(options)).await.map_err(classify)?;

        let mut load = ResourceLoad::default();
        for summary in &running {
            load.containers += 1;
            if let Some(labels) = &summary.labels {
                load.cpus_used += parse_label::<f64>(labels, LABEL_CPUS).unwrap_or(0.0);
                load.memory_used += parse_label::<u64>(labels, LABEL_MEMORY).unwrap_or(0);
            }
        }
        Ok(load)
    }
}

/// Connector producing `DockerRuntime` handles.
#[derive(Debug, Clone)]
pub struct DockerConnector {
    timeout: Duration,
}

impl DockerConnector {
    /// `timeout` bounds every Docker API request made through the handles.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl RuntimeConnector for DockerConnector {
    async fn connect(&self, endpoint: &str) -> RuntimeResult<Arc<dyn RuntimeClient>> {
        Ok(Arc::new(DockerRuntime::connect(endpoint, self.timeout)?))
    }
}
