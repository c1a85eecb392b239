//! Container lifecycle: build, replace, launch and tear down deployments

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::deploy::build_plan;
use crate::deploy::docker::{ContainerRuntime, ContainerState, RunSpec};
use crate::errors::AppError;
use crate::filesys::dir::{Dir, ScopedDir};
use crate::models::deployment::LogEntry;
use crate::models::framework::Framework;
use crate::utils::slugify;

/// Routing and port configuration for launched containers
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub base_port: u16,
    pub port_pool_size: u32,
    pub app_port: u16,
    pub domain: String,
    pub network: String,
    pub url_scheme: String,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            base_port: 10000,
            port_pool_size: 20000,
            app_port: 8000,
            domain: "localhost".to_string(),
            network: "web".to_string(),
            url_scheme: "https".to_string(),
        }
    }
}

/// Maps deployment ids onto a bounded range of host ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    base: u16,
    pool_size: u32,
}

impl PortAllocator {
    pub fn new(base: u16, pool_size: u32) -> Self {
        Self { base, pool_size }
    }

    pub fn port_for(&self, deployment_id: u64) -> Result<u16, AppError> {
        if deployment_id >= u64::from(self.pool_size) {
            return Err(AppError::PortExhausted(deployment_id));
        }
        u16::try_from(u64::from(self.base) + deployment_id)
            .map_err(|_| AppError::PortExhausted(deployment_id))
    }
}

/// Deterministic container name for a deployment
pub fn container_name(project_name: &str, deployment_id: u64) -> String {
    format!("{}-{}", slugify(project_name), deployment_id)
}

/// What to launch
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub project_name: String,
    pub deployment_id: u64,
    pub framework: Framework,
    pub env: BTreeMap<String, String>,
}

/// Outcome of `build_and_run`; the log is filled in on both paths
#[derive(Debug)]
pub struct LaunchReport {
    pub container: Result<String, AppError>,
    pub log: Vec<LogEntry>,
}

pub struct ContainerController {
    runtime: Arc<dyn ContainerRuntime>,
    options: ControllerOptions,
    ports: PortAllocator,
}

impl ContainerController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: ControllerOptions) -> Self {
        let ports = PortAllocator::new(options.base_port, options.port_pool_size);
        Self {
            runtime,
            options,
            ports,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn host_port(&self, deployment_id: u64) -> Result<u16, AppError> {
        self.ports.port_for(deployment_id)
    }

    pub fn hostname(&self, project_name: &str, deployment_id: u64) -> String {
        format!(
            "{}.{}",
            container_name(project_name, deployment_id),
            self.options.domain
        )
    }

    pub fn published_url(&self, project_name: &str, deployment_id: u64) -> String {
        format!(
            "{}://{}",
            self.options.url_scheme,
            self.hostname(project_name, deployment_id)
        )
    }

    /// Caller variables overlaid with the mandated runtime keys
    pub fn merged_env(&self, request: &LaunchRequest) -> BTreeMap<String, String> {
        let mut env = request.env.clone();
        env.insert("PORT".to_string(), self.options.app_port.to_string());
        env.insert("HOST".to_string(), "0.0.0.0".to_string());
        env.insert("NODE_ENV".to_string(), "production".to_string());
        env.insert("DEPLOYMENT_ID".to_string(), request.deployment_id.to_string());
        env.insert("PROJECT_NAME".to_string(), request.project_name.clone());
        env
    }

    /// Labels the routing proxy discovers the container by
    pub fn routing_labels(&self, name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("traefik.enable".to_string(), "true".to_string());
        labels.insert(
            format!("traefik.http.routers.{}.rule", name),
            format!("Host(`{}.{}`)", name, self.options.domain),
        );
        labels.insert(
            format!("traefik.http.services.{}.loadbalancer.server.port", name),
            self.options.app_port.to_string(),
        );
        labels
    }

    /// Build the context into an image and start it, replacing any container
    /// with the same name. The context directory is removed before returning.
    pub async fn build_and_run(&self, context: ScopedDir, request: &LaunchRequest) -> LaunchReport {
        let mut log = Vec::new();
        let container = self.launch(context.dir(), request, &mut log).await;

        if let Err(e) = &container {
            error!(
                deployment_id = request.deployment_id,
                "Error building/running container: {}", e
            );
            log.push(LogEntry::error(format!("Error building/running container: {}", e)));
        }

        match context.release().await {
            Ok(()) => log.push(LogEntry::info("Cleaned up temporary files")),
            Err(e) => {
                warn!("Failed to remove build context: {}", e);
                log.push(LogEntry::warn(format!("Failed to remove build context: {}", e)));
            }
        }

        LaunchReport { container, log }
    }

    async fn launch(
        &self,
        context: &Dir,
        request: &LaunchRequest,
        log: &mut Vec<LogEntry>,
    ) -> Result<String, AppError> {
        let name = container_name(&request.project_name, request.deployment_id);
        let host_port = self.ports.port_for(request.deployment_id)?;

        let descriptor =
            build_plan::ensure_descriptor(context, request.framework, self.options.app_port).await?;
        if descriptor.is_fallback() {
            log.push(LogEntry::warn(descriptor.describe()));
        } else {
            log.push(LogEntry::info(descriptor.describe()));
        }

        log.push(LogEntry::info("Building Docker image..."));
        let image = self
            .runtime
            .build_image(context.path(), &format!("{}:latest", name))
            .await?;
        log.push(LogEntry::info("Docker image built successfully"));

        match self.runtime.inspect(&name).await {
            Ok(ContainerState::NotFound) => {}
            Ok(_) => {
                log.push(LogEntry::info(format!("Stopping existing container {}", name)));
                self.stop(&name).await?;
            }
            Err(e) => {
                // lookup failed; removal is still attempted so the name is free
                warn!("Could not inspect existing container {}: {}", name, e);
                self.stop(&name).await?;
            }
        }

        let spec = RunSpec {
            image,
            name: name.clone(),
            env: self.merged_env(request),
            network: self.options.network.clone(),
            host_port,
            container_port: self.options.app_port,
            labels: self.routing_labels(&name),
        };

        log.push(LogEntry::info(format!(
            "Starting container {} on port {}",
            name, host_port
        )));
        let handle = self.runtime.run(&spec).await?;
        info!(deployment_id = request.deployment_id, "Container {} started", name);
        log.push(LogEntry::info(format!("Container {} started successfully", name)));

        Ok(handle)
    }

    /// Stop and remove; a container that is already gone counts as stopped
    pub async fn stop(&self, handle: &str) -> Result<(), AppError> {
        match self.runtime.stop(handle).await {
            Ok(()) | Err(AppError::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.runtime.remove(handle).await {
            Ok(()) | Err(AppError::ContainerNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Best-effort log tail; failures come back as a diagnostic string
    pub async fn get_logs(&self, handle: &str, tail_lines: usize) -> String {
        match self.runtime.logs(handle, tail_lines).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Error getting logs for container {}: {}", handle, e);
                format!("Error getting logs: {}", e)
            }
        }
    }

    pub async fn inspect(&self, handle: &str) -> Result<ContainerState, AppError> {
        self.runtime.inspect(handle).await
    }
}
