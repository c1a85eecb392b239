//! Store backend persisted to a single JSON file
//!
//! Every write holds an exclusive advisory lock on a file next to the
//! database, so the worker and monitor processes can share one file and still
//! get atomic conditional updates. Writes replace the file with an atomic
//! rename, which lets readers go without the lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::{lock_contended_error, FileExt};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::filesys::file::File;
use crate::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use crate::models::environment::Environment;
use crate::models::framework::Framework;
use crate::models::project::{NewProject, Project, SourceAccount};
use crate::store::tables::Tables;
use crate::store::Store;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// JSON file store
#[derive(Debug)]
pub struct JsonStore {
    file: File,
    lock_path: PathBuf,
    local: Mutex<()>,
    lock_timeout: Duration,
}

impl JsonStore {
    pub fn new(file: File) -> Self {
        let lock_path = file.path().with_extension("lock");
        Self {
            file,
            lock_path,
            local: Mutex::new(()),
            lock_timeout: Duration::from_secs(10),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    async fn load(&self) -> Result<Tables, AppError> {
        Ok(self.file.read_json_opt::<Tables>().await?.unwrap_or_default())
    }

    async fn read<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(&Tables) -> Result<T, AppError> + Send,
        T: Send,
    {
        let tables = self.load().await?;
        op(&tables)
    }

    async fn write<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Tables) -> Result<T, AppError> + Send,
        T: Send,
    {
        let _local = self.local.lock().await;
        let _lock = self.acquire_file_lock().await?;

        let mut tables = self.load().await?;
        let value = op(&mut tables)?;
        self.file.write_json(&tables).await?;
        Ok(value)
    }

    async fn acquire_file_lock(&self) -> Result<LockFile, AppError> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LockFile { file }),
                Err(e) if e.kind() == lock_contended_error().kind() => {
                    if started.elapsed() > self.lock_timeout {
                        return Err(AppError::StorageError(format!(
                            "Timed out waiting for store lock {}",
                            self.lock_path.display()
                        )));
                    }
                    debug!("Store lock busy, retrying...");
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Advisory lock held for one write; the OS drops it if the process dies
struct LockFile {
    file: std::fs::File,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release store lock: {}", e);
        }
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn insert_project(&self, project: NewProject) -> Result<Project, AppError> {
        self.write(move |t| Ok(t.insert_project(project))).await
    }

    async fn get_project(&self, id: u64) -> Result<Project, AppError> {
        self.read(|t| t.project(id).cloned()).await
    }

    async fn set_project_framework(&self, id: u64, framework: Framework) -> Result<(), AppError> {
        self.write(|t| t.set_project_framework(id, framework)).await
    }

    async fn mark_project_deployed(&self, id: u64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.write(|t| t.mark_project_deployed(id, at)).await
    }

    async fn upsert_account(&self, account: SourceAccount) -> Result<(), AppError> {
        self.write(move |t| {
            t.upsert_account(account);
            Ok(())
        })
        .await
    }

    async fn get_account(&self, owner: &str) -> Result<Option<SourceAccount>, AppError> {
        self.read(|t| Ok(t.account(owner))).await
    }

    async fn get_or_create_environment(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<Environment, AppError> {
        self.write(|t| t.get_or_create_environment(project_id, name))
            .await
    }

    async fn get_environment(&self, id: u64) -> Result<Option<Environment>, AppError> {
        self.read(|t| Ok(t.environment(id))).await
    }

    async fn set_environment_variables(
        &self,
        id: u64,
        variables: BTreeMap<String, String>,
    ) -> Result<Environment, AppError> {
        self.write(move |t| t.set_environment_variables(id, variables))
            .await
    }

    async fn delete_environment(&self, id: u64) -> Result<(), AppError> {
        self.write(|t| t.delete_environment(id)).await
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, AppError> {
        self.write(move |t| t.insert_deployment(deployment)).await
    }

    async fn get_deployment(&self, id: u64) -> Result<Deployment, AppError> {
        self.read(|t| t.deployment(id).cloned()).await
    }

    async fn list_deployments(&self, filter: DeploymentFilter) -> Result<Vec<Deployment>, AppError> {
        self.read(move |t| Ok(t.list_deployments(&filter))).await
    }

    async fn update_deployment(
        &self,
        id: u64,
        expected: DeploymentStatus,
        patch: DeploymentPatch,
    ) -> Result<Deployment, AppError> {
        self.write(move |t| t.update_deployment(id, expected, patch))
            .await
    }

    async fn append_log(&self, id: u64, entries: Vec<LogEntry>) -> Result<(), AppError> {
        self.write(move |t| t.append_log(id, entries)).await
    }

    async fn read_log(
        &self,
        id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogEntry>, AppError> {
        self.read(|t| t.read_log(id, offset, limit)).await
    }

    async fn get_watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        self.read(|t| Ok(t.watermark(name))).await
    }

    async fn set_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.write(|t| {
            t.set_watermark(name, at);
            Ok(())
        })
        .await
    }
}
