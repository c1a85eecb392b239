//! Deployment lifecycle manager
//!
//! Drives a deployment from `pending` through `building` to a terminal
//! status. Every status write is a conditional update against the status the
//! manager last observed, so a deployment claimed by one worker is never
//! executed by another.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::deploy::container::{container_name, ContainerController, LaunchRequest};
use crate::deploy::detect;
use crate::deploy::source::SourceControl;
use crate::errors::AppError;
use crate::filesys::dir::{Dir, ScopedDir};
use crate::models::deployment::{
    Deployment, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use crate::models::framework::Framework;
use crate::models::project::Project;
use crate::store::Store;
use crate::utils::{retry_with_backoff, CooldownOptions};

/// Lifecycle manager options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Scratch space for build contexts
    pub builds_dir: PathBuf,

    /// Attempts for retryable source control failures
    pub source_retry_attempts: u32,

    pub source_retry_cooldown: CooldownOptions,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            builds_dir: std::env::temp_dir().join("ezdeploy-builds"),
            source_retry_attempts: 3,
            source_retry_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }
}

/// Result of `execute`
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    /// The pipeline ran; the record is terminal
    Finished(Deployment),
    /// Someone else owns the deployment, or it is no longer pending
    Skipped { id: u64, status: DeploymentStatus },
}

pub struct DeploymentManager {
    store: Arc<dyn Store>,
    source: Arc<dyn SourceControl>,
    controller: Arc<ContainerController>,
    options: LifecycleOptions,
    in_flight: Mutex<BTreeSet<u64>>,
}

/// Marks a claimed deployment as executing until dropped
struct InFlight<'a> {
    ids: &'a Mutex<BTreeSet<u64>>,
    id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock_ids(self.ids).remove(&self.id);
    }
}

fn lock_ids(ids: &Mutex<BTreeSet<u64>>) -> MutexGuard<'_, BTreeSet<u64>> {
    ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeploymentManager {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn SourceControl>,
        controller: Arc<ContainerController>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            store,
            source,
            controller,
            options,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn controller(&self) -> &Arc<ContainerController> {
        &self.controller
    }

    /// Published URL for a deployment of `project`
    pub fn deployment_url(&self, project: &Project, deployment_id: u64) -> String {
        self.controller.published_url(&project.name, deployment_id)
    }

    /// Resolve the newest commit of `branch` (default: the project's branch)
    /// and record a pending deployment for it
    pub async fn create_deployment(
        &self,
        project_id: u64,
        branch: Option<&str>,
        environment_name: &str,
    ) -> Result<Deployment, AppError> {
        let project = self.store.get_project(project_id).await?;
        let branch = branch.unwrap_or(&project.branch).to_string();
        let (owner, repo) = project.repository_path()?;
        let token = self.token_for(&project).await?;

        let commit_hash = retry_with_backoff(
            "latest commit lookup",
            self.options.source_retry_attempts,
            &self.options.source_retry_cooldown,
            tokio::time::sleep,
            || self.source.latest_commit(token.as_ref(), &owner, &repo, &branch),
        )
        .await?;

        let environment = self
            .store
            .get_or_create_environment(project.id, environment_name)
            .await?;

        let deployment = self
            .store
            .insert_deployment(NewDeployment {
                project_id: project.id,
                commit_hash,
                branch,
                environment_id: Some(environment.id),
            })
            .await?;

        info!(
            deployment_id = deployment.id,
            project_id = project.id,
            "Created deployment for commit {}", deployment.commit_hash
        );
        Ok(deployment)
    }

    /// Run the pipeline for a pending deployment
    ///
    /// Pipeline failures end in a `failed` record, not an `Err`. An `Err`
    /// means the store itself could not be read or written.
    pub async fn execute(&self, id: u64) -> Result<ExecuteOutcome, AppError> {
        let claim = DeploymentPatch::status(DeploymentStatus::Building)
            .with_log(LogEntry::info("Cloning repository..."));
        let deployment = match self
            .store
            .update_deployment(id, DeploymentStatus::Pending, claim)
            .await
        {
            Ok(deployment) => deployment,
            Err(AppError::StoreConflict { actual, .. }) => {
                info!(deployment_id = id, "Deployment is {}, skipping", actual);
                return Ok(ExecuteOutcome::Skipped { id, status: actual });
            }
            Err(e) => return Err(e),
        };

        lock_ids(&self.in_flight).insert(id);
        let _in_flight = InFlight {
            ids: &self.in_flight,
            id,
        };

        info!(deployment_id = id, "Starting deployment");
        match self.run_pipeline(&deployment).await {
            Ok(deployed) => {
                info!(
                    deployment_id = id,
                    "Deployment succeeded: {}",
                    deployed.deployment_url.as_deref().unwrap_or("")
                );
                Ok(ExecuteOutcome::Finished(deployed))
            }
            Err(e) => {
                error!(deployment_id = id, "Deployment failed: {}", e);
                self.fail(id, DeploymentStatus::Building, &e.to_string())
                    .await
                    .map(ExecuteOutcome::Finished)
            }
        }
    }

    /// Move a non-terminal deployment to `failed`; terminal records are
    /// returned unchanged
    pub async fn abort(&self, id: u64, reason: &str) -> Result<Deployment, AppError> {
        let current = self.store.get_deployment(id).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }
        warn!(deployment_id = id, "Aborting deployment: {}", reason);
        self.fail(id, current.status, reason).await
    }

    /// Ids whose pipeline is currently running in this process
    pub fn in_flight(&self) -> Vec<u64> {
        lock_ids(&self.in_flight).iter().copied().collect()
    }

    /// Fail each of `ids` that is still non-terminal; returns how many were failed
    pub async fn abort_all(&self, ids: &[u64], reason: &str) -> usize {
        let mut failed = 0;
        for &id in ids {
            match self.abort(id, reason).await {
                Ok(deployment) if deployment.status == DeploymentStatus::Failed => failed += 1,
                Ok(_) => {}
                Err(e) => warn!(deployment_id = id, "Could not abort deployment: {}", e),
            }
        }
        failed
    }

    async fn fail(
        &self,
        id: u64,
        expected: DeploymentStatus,
        reason: &str,
    ) -> Result<Deployment, AppError> {
        let patch = DeploymentPatch::status(DeploymentStatus::Failed)
            .with_log(LogEntry::error(format!("ERROR: {}", reason)))
            .completed_at(Utc::now());
        match self.store.update_deployment(id, expected, patch).await {
            Ok(deployment) => Ok(deployment),
            // someone else already finished it
            Err(e) if e.is_conflict() => self.store.get_deployment(id).await,
            Err(e) => Err(e),
        }
    }

    async fn token_for(&self, project: &Project) -> Result<Option<SecretString>, AppError> {
        Ok(self
            .store
            .get_account(&project.owner)
            .await?
            .map(|account| account.access_token))
    }

    async fn run_pipeline(&self, deployment: &Deployment) -> Result<Deployment, AppError> {
        let id = deployment.id;
        let project = self.store.get_project(deployment.project_id).await?;
        let token = self.token_for(&project).await?;

        Dir::new(&self.options.builds_dir).create().await?;
        let context =
            Dir::create_unique(&self.options.builds_dir, &container_name(&project.name, id)).await?;

        self.fetch_source(&project, deployment, token.as_ref(), &context)
            .await?;

        let framework = self.resolve_framework(&project, id, context.dir()).await?;

        let mut env = BTreeMap::new();
        if let Some(environment_id) = deployment.environment_id {
            if let Some(environment) = self.store.get_environment(environment_id).await? {
                if let Some(dotenv) = environment.to_dotenv() {
                    context.dir().file(".env").write_string(&dotenv).await?;
                }
                env = environment.variables;
            }
        }

        self.store
            .append_log(id, vec![LogEntry::info("Building container...")])
            .await?;

        let request = LaunchRequest {
            project_name: project.name.clone(),
            deployment_id: id,
            framework,
            env,
        };
        let report = self.controller.build_and_run(context, &request).await;
        self.store.append_log(id, report.log).await?;
        let handle = report.container?;

        let url = self.deployment_url(&project, id);
        let now = Utc::now();
        let patch = DeploymentPatch {
            status: Some(DeploymentStatus::Deployed),
            completed_at: Some(now),
            deployment_url: Some(url),
            container_id: Some(Some(handle.clone())),
            logs: vec![LogEntry::info("Deployment completed")],
        };
        let deployed = match self
            .store
            .update_deployment(id, DeploymentStatus::Building, patch)
            .await
        {
            Ok(deployed) => deployed,
            Err(e) => {
                // nothing will track this container, so take it down
                if let Err(stop_err) = self.controller.stop(&handle).await {
                    warn!(deployment_id = id, "Failed to stop orphaned container: {}", stop_err);
                }
                return Err(e);
            }
        };

        self.store.mark_project_deployed(project.id, now).await?;
        Ok(deployed)
    }

    async fn fetch_source(
        &self,
        project: &Project,
        deployment: &Deployment,
        token: Option<&SecretString>,
        context: &ScopedDir,
    ) -> Result<(), AppError> {
        let dir = context.dir();
        let branch = if deployment.branch.is_empty() {
            project.branch.as_str()
        } else {
            deployment.branch.as_str()
        };

        retry_with_backoff(
            "source fetch",
            self.options.source_retry_attempts,
            &self.options.source_retry_cooldown,
            tokio::time::sleep,
            || async move {
                // a failed attempt may leave a partial checkout behind
                dir.delete().await?;
                dir.create().await?;
                self.source
                    .fetch_tree(
                        token,
                        &project.repository_url,
                        branch,
                        &deployment.commit_hash,
                        dir.path(),
                    )
                    .await
            },
        )
        .await
    }

    async fn resolve_framework(
        &self,
        project: &Project,
        id: u64,
        tree: &Dir,
    ) -> Result<Framework, AppError> {
        if let Some(framework) = project.framework {
            return Ok(framework);
        }
        let framework = detect::detect(tree).await?;
        self.store.set_project_framework(project.id, framework).await?;
        self.store
            .append_log(id, vec![LogEntry::info(format!("Detected framework: {}", framework))])
            .await?;
        Ok(framework)
    }
}
