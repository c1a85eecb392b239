//! Deployment worker: drains pending deployments through the lifecycle manager

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::deploy::lifecycle::{DeploymentManager, ExecuteOutcome};
use crate::errors::AppError;
use crate::models::deployment::{DeploymentFilter, DeploymentStatus};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Pause between cycles
    pub interval: Duration,

    /// First pause after a failed cycle; doubles per consecutive failure
    pub error_backoff: Duration,

    /// Deployments executed at once
    pub max_concurrency: usize,

    /// Pending deployments taken per cycle
    pub batch_size: usize,

    /// Wall-clock limit for one deployment
    pub deployment_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            max_concurrency: 1,
            batch_size: 32,
            deployment_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Options {
    fn cooldown(&self) -> CooldownOptions {
        CooldownOptions {
            base_delay: self.error_backoff,
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// How one deployment went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Finished(DeploymentStatus),
    Skipped,
    TimedOut,
    Errored,
}

/// Tally of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub deployed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: usize,
    pub errored: usize,
}

impl CycleStats {
    fn record(&mut self, result: JobResult) {
        match result {
            JobResult::Finished(DeploymentStatus::Deployed) => self.deployed += 1,
            JobResult::Finished(_) => self.failed += 1,
            JobResult::Skipped => self.skipped += 1,
            JobResult::TimedOut => self.timed_out += 1,
            JobResult::Errored => self.errored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.deployed + self.failed + self.skipped + self.timed_out + self.errored
    }
}

/// Run the deployer worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    manager: Arc<DeploymentManager>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Deployer worker starting (concurrency: {}, timeout: {:?})...",
        options.max_concurrency, options.deployment_timeout
    );
    let cooldown = options.cooldown();
    let mut err_streak: u32 = 0;

    loop {
        let wait = match process_pending(options, &manager).await {
            Ok(stats) => {
                err_streak = 0;
                if stats.total() > 0 {
                    info!("Deployer cycle done: {:?}", stats);
                }
                options.interval
            }
            Err(e) => {
                let wait = calc_exp_backoff(&cooldown, err_streak);
                err_streak = err_streak.saturating_add(1);
                error!("Deployer cycle failed: {}, retrying in {:?}", e, wait);
                wait
            }
        };

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
    }
}

/// One cycle: list pending deployments and execute them
pub async fn process_pending(
    options: &Options,
    manager: &DeploymentManager,
) -> Result<CycleStats, AppError> {
    let filter = DeploymentFilter {
        limit: Some(options.batch_size.max(1)),
        ..DeploymentFilter::with_status(DeploymentStatus::Pending)
    };
    let pending = manager.store().list_deployments(filter).await?;
    debug!("Found {} pending deployments", pending.len());

    let results: Vec<JobResult> = stream::iter(pending)
        .map(|deployment| process_one(manager, deployment.id, options.deployment_timeout))
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await;

    let mut stats = CycleStats::default();
    for result in results {
        stats.record(result);
    }
    Ok(stats)
}

async fn process_one(manager: &DeploymentManager, id: u64, timeout: Duration) -> JobResult {
    info!(deployment_id = id, "Processing deployment");

    match tokio::time::timeout(timeout, manager.execute(id)).await {
        Ok(Ok(ExecuteOutcome::Finished(deployment))) => {
            info!(
                deployment_id = id,
                "Deployment completed with status: {}", deployment.status
            );
            JobResult::Finished(deployment.status)
        }
        Ok(Ok(ExecuteOutcome::Skipped { .. })) => JobResult::Skipped,
        Ok(Err(e)) => {
            error!(deployment_id = id, "Error processing deployment: {}", e);
            if let Err(abort_err) = manager.abort(id, &e.to_string()).await {
                warn!(deployment_id = id, "Could not record failure: {}", abort_err);
            }
            JobResult::Errored
        }
        Err(_) => {
            let reason = format!("Deployment timed out after {}s", timeout.as_secs());
            error!(deployment_id = id, "{}", reason);
            if let Err(abort_err) = manager.abort(id, &reason).await {
                warn!(deployment_id = id, "Could not record timeout: {}", abort_err);
            }
            JobResult::TimedOut
        }
    }
}
