//! Health monitor and reaper
//!
//! The health pass runs every cycle and fails deployed records whose
//! container stopped or disappeared. The reaper runs once a day and removes
//! containers of terminal deployments past the retention window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::deploy::container::ContainerController;
use crate::deploy::docker::ContainerState;
use crate::errors::AppError;
use crate::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry,
};
use crate::store::Store;
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::workers::schedule::DailySchedule;

pub const REAPER_WATERMARK: &str = "reaper.last_run";

/// Monitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
    pub error_backoff: Duration,
    pub reaper_schedule: DailySchedule,
    pub retention: chrono::Duration,
    pub log_tail_lines: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(120),
            reaper_schedule: DailySchedule::new(3),
            retention: chrono::Duration::days(7),
            log_tail_lines: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: usize,
    pub failed: usize,
    pub inconclusive: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub reaped: usize,
    pub errors: usize,
}

/// Run the monitor until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    store: Arc<dyn Store>,
    controller: Arc<ContainerController>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health monitor starting...");
    let cooldown = CooldownOptions {
        base_delay: options.error_backoff,
        max_delay: Duration::from_secs(30 * 60),
        multiplier: 2.0,
    };
    let mut err_streak: u32 = 0;

    loop {
        let wait = match run_cycle(options, store.as_ref(), &controller, Utc::now()).await {
            Ok(()) => {
                err_streak = 0;
                options.interval
            }
            Err(e) => {
                let wait = calc_exp_backoff(&cooldown, err_streak);
                err_streak = err_streak.saturating_add(1);
                error!("Monitor cycle failed: {}, retrying in {:?}", e, wait);
                wait
            }
        };

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
    }
}

/// Health pass, then the reaper when its daily slot is due
pub async fn run_cycle(
    options: &Options,
    store: &dyn Store,
    controller: &ContainerController,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let health = health_pass(store, controller, options.log_tail_lines).await?;
    if health.failed > 0 || health.inconclusive > 0 {
        info!("Health pass: {:?}", health);
    }

    let last_run = store.get_watermark(REAPER_WATERMARK).await?;
    if options.reaper_schedule.is_due(now, last_run) {
        info!("Running container reaper...");
        let reaped = reap_pass(store, controller, now, options.retention).await?;
        store.set_watermark(REAPER_WATERMARK, now).await?;
        info!("Reaper done: {:?}", reaped);
    }
    Ok(())
}

/// Check every deployed container and fail the ones that are gone
pub async fn health_pass(
    store: &dyn Store,
    controller: &ContainerController,
    log_tail_lines: usize,
) -> Result<HealthReport, AppError> {
    let filter = DeploymentFilter {
        has_container: Some(true),
        ..DeploymentFilter::with_status(DeploymentStatus::Deployed)
    };
    let deployments = store.list_deployments(filter).await?;
    let mut report = HealthReport::default();

    for deployment in deployments {
        let Some(handle) = deployment.container_id.as_deref() else {
            continue;
        };

        let entries = match controller.inspect(handle).await {
            Ok(ContainerState::Running) => {
                report.healthy += 1;
                continue;
            }
            Ok(ContainerState::Stopped(status)) => {
                let logs = controller.get_logs(handle, log_tail_lines).await;
                vec![
                    LogEntry::error(format!("Container stopped running. Status: {}", status)),
                    LogEntry::info(format!("Container logs:\n{}", logs)),
                ]
            }
            Ok(ContainerState::NotFound) => {
                vec![LogEntry::error("Container not found. It may have been removed.")]
            }
            Err(e) => {
                warn!(
                    deployment_id = deployment.id,
                    "Could not check container {}: {}", handle, e
                );
                report.inconclusive += 1;
                continue;
            }
        };

        if mark_lost(store, &deployment, entries).await {
            report.failed += 1;
        }
    }

    Ok(report)
}

async fn mark_lost(store: &dyn Store, deployment: &Deployment, entries: Vec<LogEntry>) -> bool {
    // the handle stays so the reaper removes the container later
    let patch = DeploymentPatch::status(DeploymentStatus::Failed).with_logs(entries);
    match store
        .update_deployment(deployment.id, DeploymentStatus::Deployed, patch)
        .await
    {
        Ok(_) => {
            warn!(deployment_id = deployment.id, "Deployment marked failed: container lost");
            true
        }
        Err(e) if e.is_conflict() => {
            debug!(deployment_id = deployment.id, "Deployment changed during health check");
            false
        }
        Err(e) => {
            error!(deployment_id = deployment.id, "Failed to mark deployment failed: {}", e);
            false
        }
    }
}

/// Remove containers of terminal deployments completed before `now - retention`
pub async fn reap_pass(
    store: &dyn Store,
    controller: &ContainerController,
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> Result<ReapReport, AppError> {
    let filter = DeploymentFilter {
        statuses: vec![DeploymentStatus::Deployed, DeploymentStatus::Failed],
        has_container: Some(true),
        completed_before: Some(now - retention),
        ..Default::default()
    };
    let deployments = store.list_deployments(filter).await?;
    let mut report = ReapReport::default();

    for deployment in deployments {
        let Some(handle) = deployment.container_id.as_deref() else {
            continue;
        };

        if let Err(e) = controller.stop(handle).await {
            warn!(deployment_id = deployment.id, "Failed to reap container {}: {}", handle, e);
            report.errors += 1;
            continue;
        }

        let patch = DeploymentPatch {
            container_id: Some(None),
            ..Default::default()
        };
        match store
            .update_deployment(deployment.id, deployment.status, patch)
            .await
        {
            Ok(_) => {
                info!(deployment_id = deployment.id, "Reaped container {}", handle);
                report.reaped += 1;
            }
            Err(e) => {
                warn!(deployment_id = deployment.id, "Failed to clear container handle: {}", e);
                report.errors += 1;
            }
        }
    }

    Ok(report)
}
