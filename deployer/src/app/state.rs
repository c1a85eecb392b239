//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::container::ContainerController;
use crate::deploy::docker::{ContainerRuntime, DockerCli};
use crate::deploy::lifecycle::DeploymentManager;
use crate::deploy::source::{GitHubSource, SourceControl};
use crate::errors::AppError;
use crate::store::{JsonStore, Store};

/// Shared services, built once per process
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub controller: Arc<ContainerController>,
    pub manager: Arc<DeploymentManager>,
}

impl AppState {
    /// Production wiring: JSON store, GitHub, docker CLI
    pub async fn init(options: &AppOptions) -> Result<Self, AppError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let store: Arc<dyn Store> = Arc::new(JsonStore::new(options.layout.state_file()));
        let source: Arc<dyn SourceControl> =
            Arc::new(GitHubSource::new(&options.source_api_base_url)?);
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::default());

        info!("Using store at {}", options.layout.state_file().path().display());
        Ok(Self::new(options, store, source, runtime))
    }

    pub fn new(
        options: &AppOptions,
        store: Arc<dyn Store>,
        source: Arc<dyn SourceControl>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let controller = Arc::new(ContainerController::new(runtime, options.controller.clone()));
        let manager = Arc::new(DeploymentManager::new(
            store.clone(),
            source,
            controller.clone(),
            options.pipeline.clone(),
        ));
        Self {
            store,
            controller,
            manager,
        }
    }
}
