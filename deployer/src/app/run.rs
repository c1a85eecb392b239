//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, Role};
use crate::app::state::AppState;
use crate::deploy::lifecycle::DeploymentManager;
use crate::errors::AppError;
use crate::logs::{init_logging, LogOptions};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::version_info;
use crate::workers::{deployer, monitor};

/// Process entry point shared by the binaries: settings, logging, then `run`
pub async fn start(role: Role) -> Result<(), AppError> {
    let layout = StorageLayout::from_env();
    let settings = Settings::load(&layout.settings_file()).await?;

    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        file_prefix: format!("ezdeploy-{}.log", role),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let version = version_info();
    info!(
        "ezdeploy {} {} (git: {}, built: {})",
        role, version.version, version.git_hash, version.build_time
    );

    let options = AppOptions::from_settings(layout, &settings);
    info!("Running with options: {:?}", options);
    run(role, options, await_shutdown_signal()).await
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}

/// Run one long-lived process until `shutdown_signal` resolves
pub async fn run(
    role: Role,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    info!("Initializing ezdeploy {}...", role);
    let state = AppState::init(&options).await?;
    run_with_state(role, options, state, shutdown_signal).await
}

/// Same as `run` with pre-built services
pub async fn run_with_state(
    role: Role,
    options: AppOptions,
    state: AppState,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    let handle = match role {
        Role::Worker => {
            shutdown_manager.with_manager(state.manager.clone());
            spawn_deployer_worker(&options, &state, shutdown_tx.subscribe())
        }
        Role::Monitor => spawn_monitor_worker(&options, &state, shutdown_tx.subscribe()),
    };
    shutdown_manager.with_worker_handle(handle)?;

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

fn spawn_deployer_worker(
    options: &AppOptions,
    state: &AppState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Initializing deployer worker...");
    let worker_options = options.deployer.clone();
    let manager = state.manager.clone();

    tokio::spawn(async move {
        deployer::run(
            &worker_options,
            manager,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    })
}

fn spawn_monitor_worker(
    options: &AppOptions,
    state: &AppState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Initializing health monitor...");
    let monitor_options = options.monitor.clone();
    let store = state.store.clone();
    let controller = state.controller.clone();

    tokio::spawn(async move {
        monitor::run(
            &monitor_options,
            store,
            controller,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    })
}

// ================================= SHUTDOWN ===================================== //

pub const SHUTDOWN_ABORT_REASON: &str = "Worker shut down before the deployment finished";

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    worker_handle: Option<JoinHandle<()>>,
    manager: Option<Arc<DeploymentManager>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            worker_handle: None,
            manager: None,
        }
    }

    /// Deployments still executing when the worker is aborted get failed
    fn with_manager(&mut self, manager: Arc<DeploymentManager>) {
        self.manager = Some(manager);
    }

    fn with_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AppError> {
        if self.worker_handle.is_some() {
            return Err(AppError::ShutdownError("worker_handle already set".to_string()));
        }
        self.worker_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), AppError> {
        let _ = self.shutdown_tx.send(());

        let Some(handle) = self.worker_handle.take() else {
            return Ok(());
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.max_shutdown_delay, handle).await {
            Ok(joined) => {
                joined.map_err(|e| AppError::ShutdownError(e.to_string()))?;
                info!("Shutdown complete");
                Ok(())
            }
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, aborting worker...",
                    self.max_shutdown_delay
                );
                let interrupted = self
                    .manager
                    .as_ref()
                    .map(|manager| manager.in_flight())
                    .unwrap_or_default();
                abort.abort();

                if let Some(manager) = &self.manager {
                    let failed = manager.abort_all(&interrupted, SHUTDOWN_ABORT_REASON).await;
                    if failed > 0 {
                        error!("Marked {} interrupted deployments failed", failed);
                    }
                }
                Err(AppError::ShutdownError("worker did not stop in time".to_string()))
            }
        }
    }
}
