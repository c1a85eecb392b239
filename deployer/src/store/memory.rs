//! In-process store backend

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use crate::models::environment::Environment;
use crate::models::framework::Framework;
use crate::models::project::{NewProject, Project, SourceAccount};
use crate::store::tables::Tables;
use crate::store::Store;

/// Store held entirely in memory; every clone shares the same tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_project(&self, project: NewProject) -> Result<Project, AppError> {
        Ok(self.tables.write().await.insert_project(project))
    }

    async fn get_project(&self, id: u64) -> Result<Project, AppError> {
        self.tables.read().await.project(id).cloned()
    }

    async fn set_project_framework(&self, id: u64, framework: Framework) -> Result<(), AppError> {
        self.tables.write().await.set_project_framework(id, framework)
    }

    async fn mark_project_deployed(&self, id: u64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.tables.write().await.mark_project_deployed(id, at)
    }

    async fn upsert_account(&self, account: SourceAccount) -> Result<(), AppError> {
        self.tables.write().await.upsert_account(account);
        Ok(())
    }

    async fn get_account(&self, owner: &str) -> Result<Option<SourceAccount>, AppError> {
        Ok(self.tables.read().await.account(owner))
    }

    async fn get_or_create_environment(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<Environment, AppError> {
        self.tables
            .write()
            .await
            .get_or_create_environment(project_id, name)
    }

    async fn get_environment(&self, id: u64) -> Result<Option<Environment>, AppError> {
        Ok(self.tables.read().await.environment(id))
    }

    async fn set_environment_variables(
        &self,
        id: u64,
        variables: BTreeMap<String, String>,
    ) -> Result<Environment, AppError> {
        self.tables
            .write()
            .await
            .set_environment_variables(id, variables)
    }

    async fn delete_environment(&self, id: u64) -> Result<(), AppError> {
        self.tables.write().await.delete_environment(id)
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, AppError> {
        self.tables.write().await.insert_deployment(deployment)
    }

    async fn get_deployment(&self, id: u64) -> Result<Deployment, AppError> {
        self.tables.read().await.deployment(id).cloned()
    }

    async fn list_deployments(&self, filter: DeploymentFilter) -> Result<Vec<Deployment>, AppError> {
        Ok(self.tables.read().await.list_deployments(&filter))
    }

    async fn update_deployment(
        &self,
        id: u64,
        expected: DeploymentStatus,
        patch: DeploymentPatch,
    ) -> Result<Deployment, AppError> {
        self.tables
            .write()
            .await
            .update_deployment(id, expected, patch)
    }

    async fn append_log(&self, id: u64, entries: Vec<LogEntry>) -> Result<(), AppError> {
        self.tables.write().await.append_log(id, entries)
    }

    async fn read_log(
        &self,
        id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LogEntry>, AppError> {
        self.tables.read().await.read_log(id, offset, limit)
    }

    async fn get_watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self.tables.read().await.watermark(name))
    }

    async fn set_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.tables.write().await.set_watermark(name, at);
        Ok(())
    }
}
