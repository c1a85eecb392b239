//! Shared fakes for the scenario tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;

use ezdeploy::deploy::container::{ContainerController, ControllerOptions};
use ezdeploy::deploy::docker::{ContainerRuntime, ContainerState, RunSpec};
use ezdeploy::deploy::lifecycle::{DeploymentManager, LifecycleOptions};
use ezdeploy::deploy::source::SourceControl;
use ezdeploy::errors::AppError;
use chrono::{DateTime, Utc};
use ezdeploy::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use ezdeploy::models::environment::Environment;
use ezdeploy::models::framework::Framework;
use ezdeploy::models::project::{NewProject, Project, SourceAccount};
use ezdeploy::store::{MemoryStore, Store};
use ezdeploy::utils::CooldownOptions;

// ================================ RUNTIME ======================================= //

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub handle: String,
    pub name: String,
    pub state: ContainerState,
    pub spec: Option<RunSpec>,
}

#[derive(Debug, Clone)]
pub struct BuildCall {
    pub context: PathBuf,
    pub tag: String,
    pub dockerfile: Option<String>,
    pub dotenv: Option<String>,
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub containers: Vec<FakeContainer>,
    pub builds: Vec<BuildCall>,
    pub runs: Vec<RunSpec>,
    pub stopped: Vec<String>,
    pub removed: Vec<String>,
    pub fail_build: Option<String>,
    pub fail_run: Option<String>,
    pub fail_stop: Option<String>,
    pub fail_inspect: Option<String>,
    pub container_logs: String,
    next_id: u64,
}

/// In-process container runtime
#[derive(Debug, Default)]
pub struct FakeRuntime {
    pub state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn with<T>(&self, f: impl FnOnce(&mut RuntimeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Register a container the runtime already knows about
    pub fn add_container(&self, handle: &str, name: &str, state: ContainerState) {
        self.with(|s| {
            s.containers.push(FakeContainer {
                handle: handle.to_string(),
                name: name.to_string(),
                state,
                spec: None,
            })
        });
    }

    pub fn set_state(&self, handle: &str, state: ContainerState) {
        self.with(|s| {
            for container in s.containers.iter_mut() {
                if container.handle == handle {
                    container.state = state.clone();
                }
            }
        });
    }

    pub fn forget(&self, handle: &str) {
        self.with(|s| s.containers.retain(|c| c.handle != handle));
    }

    pub fn builds(&self) -> Vec<BuildCall> {
        self.with(|s| s.builds.clone())
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.with(|s| s.runs.clone())
    }

    pub fn live_names(&self) -> Vec<String> {
        self.with(|s| s.containers.iter().map(|c| c.name.clone()).collect())
    }
}

fn find<'a>(state: &'a mut RuntimeState, handle: &str) -> Option<&'a mut FakeContainer> {
    state
        .containers
        .iter_mut()
        .find(|c| c.handle == handle || c.name == handle)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<String, AppError> {
        let dockerfile = std::fs::read_to_string(context.join("Dockerfile")).ok();
        let dotenv = std::fs::read_to_string(context.join(".env")).ok();
        self.with(|s| {
            s.builds.push(BuildCall {
                context: context.to_path_buf(),
                tag: tag.to_string(),
                dockerfile,
                dotenv,
            });
            match &s.fail_build {
                Some(msg) => Err(AppError::Build(msg.clone())),
                None => Ok(tag.to_string()),
            }
        })
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, AppError> {
        self.with(|s| {
            s.runs.push(spec.clone());
            if let Some(msg) = &s.fail_run {
                return Err(AppError::RuntimeLaunch(msg.clone()));
            }
            if s.containers.iter().any(|c| c.name == spec.name) {
                return Err(AppError::RuntimeLaunch(format!(
                    "name {} is already in use",
                    spec.name
                )));
            }
            s.next_id += 1;
            let handle = format!("ctr{:04}", s.next_id);
            s.containers.push(FakeContainer {
                handle: handle.clone(),
                name: spec.name.clone(),
                state: ContainerState::Running,
                spec: Some(spec.clone()),
            });
            Ok(handle)
        })
    }

    async fn stop(&self, handle: &str) -> Result<(), AppError> {
        self.with(|s| {
            if let Some(msg) = &s.fail_stop {
                return Err(AppError::RuntimeLaunch(msg.clone()));
            }
            s.stopped.push(handle.to_string());
            match find(s, handle) {
                Some(container) => {
                    container.state = ContainerState::Stopped("exited".to_string());
                    Ok(())
                }
                None => Err(AppError::ContainerNotFound(handle.to_string())),
            }
        })
    }

    async fn remove(&self, handle: &str) -> Result<(), AppError> {
        self.with(|s| {
            let before = s.containers.len();
            s.containers.retain(|c| c.handle != handle && c.name != handle);
            if s.containers.len() == before {
                return Err(AppError::ContainerNotFound(handle.to_string()));
            }
            s.removed.push(handle.to_string());
            Ok(())
        })
    }

    async fn logs(&self, handle: &str, tail_lines: usize) -> Result<String, AppError> {
        self.with(|s| {
            if find(s, handle).is_none() {
                return Err(AppError::ContainerNotFound(handle.to_string()));
            }
            let lines: Vec<&str> = s.container_logs.lines().collect();
            Ok(lines[lines.len().saturating_sub(tail_lines)..].join("\n"))
        })
    }

    async fn inspect(&self, handle: &str) -> Result<ContainerState, AppError> {
        self.with(|s| {
            if let Some(msg) = &s.fail_inspect {
                return Err(AppError::Internal(msg.clone()));
            }
            Ok(find(s, handle)
                .map(|c| c.state.clone())
                .unwrap_or(ContainerState::NotFound))
        })
    }
}

// ================================ SOURCE ======================================== //

#[derive(Debug, Default)]
pub struct SourceState {
    /// (owner, repo, branch) -> commit
    pub commits: BTreeMap<(String, String, String), String>,
    /// Files written into every fetched tree
    pub files: Vec<(String, String)>,
    /// Fail this many fetches with a retryable error, then succeed
    pub transient_fetch_failures: usize,
    /// Fail every fetch with a permanent error
    pub fail_fetch: Option<String>,
    /// Stall every fetch this long
    pub fetch_delay: Option<Duration>,
    pub fetches: Vec<FetchCall>,
    pub tokens_seen: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub repo_url: String,
    pub branch: String,
    pub commit: String,
    pub dest: PathBuf,
}

/// In-process source control
#[derive(Debug, Default)]
pub struct FakeSource {
    pub state: Mutex<SourceState>,
    pub lookups: AtomicUsize,
}

impl FakeSource {
    pub fn with<T>(&self, f: impl FnOnce(&mut SourceState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_commit(&self, owner: &str, repo: &str, branch: &str, commit: &str) {
        self.with(|s| {
            s.commits.insert(
                (owner.to_string(), repo.to_string(), branch.to_string()),
                commit.to_string(),
            )
        });
    }

    pub fn add_file(&self, name: &str, contents: &str) {
        self.with(|s| s.files.push((name.to_string(), contents.to_string())));
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.with(|s| s.fetches.clone())
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn latest_commit(
        &self,
        token: Option<&SecretString>,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.with(|s| {
            s.tokens_seen
                .push(token.map(|t| t.expose_secret().to_string()));
            s.commits
                .get(&(owner.to_string(), repo.to_string(), branch.to_string()))
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("{}/{}@{}", owner, repo, branch)))
        })
    }

    async fn fetch_tree(
        &self,
        _token: Option<&SecretString>,
        repo_url: &str,
        branch: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<(), AppError> {
        let delay = self.with(|s| s.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let files = self.with(|s| {
            s.fetches.push(FetchCall {
                repo_url: repo_url.to_string(),
                branch: branch.to_string(),
                commit: commit.to_string(),
                dest: dest.to_path_buf(),
            });
            if let Some(msg) = &s.fail_fetch {
                return Err(AppError::Build(msg.clone()));
            }
            if s.transient_fetch_failures > 0 {
                s.transient_fetch_failures -= 1;
                return Err(AppError::SourceFetch("connection reset".to_string()));
            }
            Ok(s.files.clone())
        })?;

        for (name, contents) in files {
            let path = dest.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }
}

// ================================= STORE ======================================== //

/// Failures to inject, each counter consumed one call at a time
#[derive(Debug, Default)]
pub struct StoreFaults {
    pub list: AtomicUsize,
    pub claim: AtomicUsize,
    pub append: AtomicUsize,
}

impl StoreFaults {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn injected(what: &str) -> AppError {
    AppError::StorageError(format!("injected {} failure", what))
}

/// MemoryStore that fails selected calls while its fault counters last
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub faults: Arc<StoreFaults>,
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_project(&self, project: NewProject) -> Result<Project, AppError> {
        self.inner.insert_project(project).await
    }

    async fn get_project(&self, id: u64) -> Result<Project, AppError> {
        self.inner.get_project(id).await
    }

    async fn set_project_framework(&self, id: u64, framework: Framework) -> Result<(), AppError> {
        self.inner.set_project_framework(id, framework).await
    }

    async fn mark_project_deployed(&self, id: u64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.inner.mark_project_deployed(id, at).await
    }

    async fn upsert_account(&self, account: SourceAccount) -> Result<(), AppError> {
        self.inner.upsert_account(account).await
    }

    async fn get_account(&self, owner: &str) -> Result<Option<SourceAccount>, AppError> {
        self.inner.get_account(owner).await
    }

    async fn get_or_create_environment(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<Environment, AppError> {
        self.inner.get_or_create_environment(project_id, name).await
    }

    async fn get_environment(&self, id: u64) -> Result<Option<Environment>, AppError> {
        self.inner.get_environment(id).await
    }

    async fn set_environment_variables(
        &self,
        id: u64,
        variables: BTreeMap<String, String>,
    ) -> Result<Environment, AppError> {
        self.inner.set_environment_variables(id, variables).await
    }

    async fn delete_environment(&self, id: u64) -> Result<(), AppError> {
        self.inner.delete_environment(id).await
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, AppError> {
        self.inner.insert_deployment(deployment).await
    }

    async fn get_deployment(&self, id: u64) -> Result<Deployment, AppError> {
        self.inner.get_deployment(id).await
    }

    async fn list_deployments(&self, filter: DeploymentFilter) -> Result<Vec<Deployment>, AppError> {
        if StoreFaults::take(&self.faults.list) {
            return Err(injected("list"));
        }
        self.inner.list_deployments(filter).await
    }

    async fn update_deployment(
        &self,
        id: u64,
        expected: DeploymentStatus,
        patch: DeploymentPatch,
    ) -> Result<Deployment, AppError> {
        if patch.status == Some(DeploymentStatus::Building) && StoreFaults::take(&self.faults.claim)
        {
            return Err(injected("claim"));
        }
        self.inner.update_deployment(id, expected, patch).await
    }

    async fn append_log(&self, id: u64, entries: Vec<LogEntry>) -> Result<(), AppError> {
        if StoreFaults::take(&self.faults.append) {
            return Err(injected("append"));
        }
        self.inner.append_log(id, entries).await
    }

    async fn read_log(
        &self,
        id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogEntry>, AppError> {
        self.inner.read_log(id, offset, limit).await
    }

    async fn get_watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        self.inner.get_watermark(name).await
    }

    async fn set_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.inner.set_watermark(name, at).await
    }
}

// ================================= SLEEP ======================================== //

/// Sleep function that records each requested pause and returns at once;
/// `shutdown` resolves after `stop_after` pauses
pub struct SleepLog {
    pub pauses: Arc<Mutex<Vec<Duration>>>,
    stop: Arc<tokio::sync::Notify>,
    stop_after: usize,
}

impl SleepLog {
    pub fn new(stop_after: usize) -> Self {
        Self {
            pauses: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(tokio::sync::Notify::new()),
            stop_after,
        }
    }

    pub fn sleep_fn(&self) -> impl Fn(Duration) -> BoxFuture<'static, ()> {
        let pauses = self.pauses.clone();
        let stop = self.stop.clone();
        let stop_after = self.stop_after;
        move |d| {
            let mut pauses = pauses.lock().unwrap();
            pauses.push(d);
            if pauses.len() >= stop_after {
                stop.notify_one();
            }
            Box::pin(tokio::task::yield_now())
        }
    }

    pub fn shutdown(&self) -> BoxFuture<'static, ()> {
        let stop = self.stop.clone();
        Box::pin(async move { stop.notified().await })
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

// ================================ HARNESS ======================================= //

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub faults: Arc<StoreFaults>,
    pub runtime: Arc<FakeRuntime>,
    pub source: Arc<FakeSource>,
    pub controller: Arc<ContainerController>,
    pub manager: Arc<DeploymentManager>,
    pub builds: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(ControllerOptions {
            domain: "apps.test".to_string(),
            ..Default::default()
        })
    }

    pub fn with_options(controller_options: ControllerOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(StoreFaults::default());
        let runtime = Arc::new(FakeRuntime::default());
        let source = Arc::new(FakeSource::default());
        let builds = tempfile::tempdir().unwrap();

        let controller = Arc::new(ContainerController::new(
            runtime.clone(),
            controller_options,
        ));
        let manager = Arc::new(DeploymentManager::new(
            Arc::new(FlakyStore {
                inner: store.clone(),
                faults: faults.clone(),
            }),
            source.clone(),
            controller.clone(),
            LifecycleOptions {
                builds_dir: builds.path().join("builds"),
                source_retry_attempts: 3,
                source_retry_cooldown: CooldownOptions {
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    multiplier: 2.0,
                },
            },
        ));

        Self {
            store,
            faults,
            runtime,
            source,
            controller,
            manager,
            builds,
        }
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.builds.path().join("builds")
    }

    /// Register `acme/<name>` on branch main, resolving main to `abc123`
    pub async fn project(&self, name: &str, framework: Option<Framework>) -> Project {
        let repo = name.to_lowercase().replace(' ', "-");
        self.source.set_commit("acme", &repo, "main", "abc123");
        self.store
            .insert_project(NewProject {
                name: name.to_string(),
                repository_url: format!("https://github.com/acme/{}.git", repo),
                branch: "main".to_string(),
                framework,
                owner: "alice".to_string(),
            })
            .await
            .unwrap()
    }

    /// Names of the entries left in the builds directory
    pub fn leftover_contexts(&self) -> Vec<String> {
        match std::fs::read_dir(self.builds_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
