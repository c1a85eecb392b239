//! Persistent store for projects, environments and deployments

pub mod json;
pub mod memory;
pub mod tables;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use crate::models::environment::Environment;
use crate::models::framework::Framework;
use crate::models::project::{NewProject, Project, SourceAccount};

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Typed CRUD plus conditional updates over the deployment records
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_project(&self, project: NewProject) -> Result<Project, AppError>;

    async fn get_project(&self, id: u64) -> Result<Project, AppError>;

    async fn set_project_framework(&self, id: u64, framework: Framework) -> Result<(), AppError>;

    async fn mark_project_deployed(&self, id: u64, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn upsert_account(&self, account: SourceAccount) -> Result<(), AppError>;

    async fn get_account(&self, owner: &str) -> Result<Option<SourceAccount>, AppError>;

    /// Return the (project, name) environment, creating an empty one if absent
    async fn get_or_create_environment(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<Environment, AppError>;

    async fn get_environment(&self, id: u64) -> Result<Option<Environment>, AppError>;

    async fn set_environment_variables(
        &self,
        id: u64,
        variables: BTreeMap<String, String>,
    ) -> Result<Environment, AppError>;

    /// Delete an environment and null every deployment reference to it
    async fn delete_environment(&self, id: u64) -> Result<(), AppError>;

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, AppError>;

    async fn get_deployment(&self, id: u64) -> Result<Deployment, AppError>;

    async fn list_deployments(&self, filter: DeploymentFilter) -> Result<Vec<Deployment>, AppError>;

    /// Apply `patch` only if the stored status still equals `expected`
    async fn update_deployment(
        &self,
        id: u64,
        expected: DeploymentStatus,
        patch: DeploymentPatch,
    ) -> Result<Deployment, AppError>;

    async fn append_log(&self, id: u64, entries: Vec<LogEntry>) -> Result<(), AppError>;

    /// Read up to `limit` log entries starting at `offset`
    async fn read_log(&self, id: u64, offset: usize, limit: usize)
        -> Result<Vec<LogEntry>, AppError>;

    async fn get_watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>, AppError>;

    async fn set_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<(), AppError>;
}
