//! Docker implementation of [`SandboxEngine`] on top of bollard.

use crate::engine::{SandboxEngine, SandboxId, SandboxSpec, SandboxStatus, SandboxSummary};
use crate::error::{EngineError, Result};
use crate::filter::NameFilter;
use async_trait::async_trait;
use bollard::{
    errors::Error as BollardError,
    models::{ContainerCreateBody, HostConfig, PortBinding as DockerPortBinding},
    query_parameters::{
        BuildImageOptionsBuilder, CreateContainerOptionsBuilder, InspectContainerOptions,
        ListContainersOptionsBuilder, RemoveContainerOptionsBuilder,
        RestartContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
        UploadToContainerOptionsBuilder,
    },
    Docker,
};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// Label stamped on every sandbox regnet creates.
pub const MANAGED_LABEL: &str = "io.regnet.managed";

/// A [`SandboxEngine`] backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn status_code(error: &BollardError) -> Option<u16> {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn operation_error(operation: &'static str, target: &str, source: BollardError) -> EngineError {
    match status_code(&source) {
        Some(404) => EngineError::NotFound(target.to_owned()),
        _ => EngineError::Operation {
            operation,
            target: target.to_owned(),
            message: source.to_string(),
        },
    }
}

fn grace_secs(grace: Duration) -> i32 {
    i32::try_from(grace.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl SandboxEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Connect(e.to_string()))
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for binding in &spec.port_bindings {
            let key = format!("{}/tcp", binding.sandbox_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(binding.host_port.to_string()),
                }]),
            );
        }

        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_LABEL.to_owned(), "true".to_owned());

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(|e| match status_code(&e) {
                Some(409) => EngineError::AlreadyExists(spec.name.clone()),
                _ => operation_error("create_container", &spec.name, e),
            })?;

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| operation_error("start_container", id, e))
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        match self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptionsBuilder::new().t(grace_secs(grace)).build()),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(operation_error("stop_container", id, e)),
        }
    }

    async fn restart(&self, id: &str, grace: Duration) -> Result<()> {
        self.docker
            .restart_container(
                id,
                Some(
                    RestartContainerOptionsBuilder::new()
                        .t(grace_secs(grace))
                        .build(),
                ),
            )
            .await
            .map_err(|e| operation_error("restart_container", id, e))
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptionsBuilder::new().force(force).build()),
            )
            .await
            .map_err(|e| operation_error("remove_container", id, e))
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.docker
            .unpause_container(id)
            .await
            .map_err(|e| operation_error("unpause_container", id, e))
    }

    async fn inspect(&self, id: &str) -> Result<SandboxStatus> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| operation_error("inspect_container", id, e))?;

        let state = response.state.unwrap_or_default();
        Ok(SandboxStatus {
            running: state.running.unwrap_or(false),
            paused: state.paused.unwrap_or(false),
        })
    }

    async fn list(&self, filter: &NameFilter) -> Result<Vec<SandboxSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_owned(), vec![filter.as_str().to_owned()]);

        let containers = self
            .docker
            .list_containers(Some(
                ListContainersOptionsBuilder::new()
                    .all(true)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(|e| operation_error("list_containers", filter.as_str(), e))?;

        // The daemon's name filter is a substring match; re-check client side.
        let summaries = containers
            .into_iter()
            .filter_map(|container| {
                let id = container.id?;
                let name = container
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .find(|name| filter.matches(name))?;
                let state = container
                    .state
                    .map(|state| state.to_string())
                    .unwrap_or_default();
                Some(SandboxSummary {
                    id,
                    name: name.trim_start_matches('/').to_owned(),
                    status: SandboxStatus {
                        running: state == "running" || state == "paused",
                        paused: state == "paused",
                    },
                })
            })
            .collect();

        Ok(summaries)
    }

    async fn copy_archive(&self, id: &str, dest: &str, archive: Bytes) -> Result<()> {
        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptionsBuilder::new().path(dest).build()),
                bollard::body_full(archive),
            )
            .await
            .map_err(|e| operation_error("upload_to_container", id, e))
    }

    fn build_image(
        &self,
        context: Bytes,
        dockerfile: &str,
        tag: &str,
    ) -> BoxStream<'_, Result<String>> {
        let options = BuildImageOptionsBuilder::new()
            .dockerfile(dockerfile)
            .t(tag)
            .rm(true)
            .build();
        let tag = tag.to_owned();

        self.docker
            .build_image(options, None, Some(bollard::body_full(context)))
            .flat_map(move |item| {
                let lines: Vec<Result<String>> = match item {
                    Ok(info) => {
                        if let Some(detail) = info.error_detail {
                            vec![Err(EngineError::Build(
                                detail.message.unwrap_or_else(|| "unknown error".to_owned()),
                            ))]
                        } else {
                            info.stream
                                .into_iter()
                                .chain(info.status)
                                .map(|line| line.trim_end().to_owned())
                                .filter(|line| !line.is_empty())
                                .map(Ok)
                                .collect()
                        }
                    }
                    Err(e) => vec![Err(operation_error("build_image", &tag, e))],
                };
                stream::iter(lines)
            })
            .boxed()
    }
}
