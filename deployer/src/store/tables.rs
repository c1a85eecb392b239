//! In-memory tables shared by the store backends

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::validate_transition;
use crate::errors::AppError;
use crate::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use crate::models::environment::Environment;
use crate::models::framework::Framework;
use crate::models::project::{NewProject, Project, SourceAccount};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    next_id: NextIds,
    #[serde(default)]
    projects: BTreeMap<u64, Project>,
    #[serde(default)]
    accounts: BTreeMap<String, SourceAccount>,
    #[serde(default)]
    environments: BTreeMap<u64, Environment>,
    #[serde(default)]
    deployments: BTreeMap<u64, Deployment>,
    #[serde(default)]
    watermarks: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NextIds {
    project: u64,
    environment: u64,
    deployment: u64,
}

impl Default for NextIds {
    fn default() -> Self {
        Self {
            project: 1,
            environment: 1,
            deployment: 1,
        }
    }
}

fn take_id(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter += 1;
    id
}

impl Tables {
    pub fn insert_project(&mut self, new: NewProject) -> Project {
        let project = Project {
            id: take_id(&mut self.next_id.project),
            name: new.name,
            repository_url: new.repository_url,
            branch: new.branch,
            framework: new.framework,
            owner: new.owner,
            created_at: Utc::now(),
            last_deployed: None,
        };
        self.projects.insert(project.id, project.clone());
        project
    }

    pub fn project(&self, id: u64) -> Result<&Project, AppError> {
        self.projects
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", id)))
    }

    fn project_mut(&mut self, id: u64) -> Result<&mut Project, AppError> {
        self.projects
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", id)))
    }

    pub fn set_project_framework(&mut self, id: u64, framework: Framework) -> Result<(), AppError> {
        self.project_mut(id)?.framework = Some(framework);
        Ok(())
    }

    pub fn mark_project_deployed(&mut self, id: u64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.project_mut(id)?.last_deployed = Some(at);
        Ok(())
    }

    pub fn upsert_account(&mut self, account: SourceAccount) {
        self.accounts.insert(account.owner.clone(), account);
    }

    pub fn account(&self, owner: &str) -> Option<SourceAccount> {
        self.accounts.get(owner).cloned()
    }

    pub fn get_or_create_environment(
        &mut self,
        project_id: u64,
        name: &str,
    ) -> Result<Environment, AppError> {
        self.project(project_id)?;

        if let Some(existing) = self
            .environments
            .values()
            .find(|e| e.project_id == project_id && e.name == name)
        {
            return Ok(existing.clone());
        }

        let environment = Environment {
            id: take_id(&mut self.next_id.environment),
            project_id,
            name: name.to_string(),
            variables: BTreeMap::new(),
        };
        self.environments.insert(environment.id, environment.clone());
        Ok(environment)
    }

    pub fn environment(&self, id: u64) -> Option<Environment> {
        self.environments.get(&id).cloned()
    }

    pub fn set_environment_variables(
        &mut self,
        id: u64,
        variables: BTreeMap<String, String>,
    ) -> Result<Environment, AppError> {
        let environment = self
            .environments
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("environment {}", id)))?;
        environment.variables = variables;
        Ok(environment.clone())
    }

    pub fn delete_environment(&mut self, id: u64) -> Result<(), AppError> {
        if self.environments.remove(&id).is_none() {
            return Err(AppError::NotFound(format!("environment {}", id)));
        }
        for deployment in self.deployments.values_mut() {
            if deployment.environment_id == Some(id) {
                deployment.environment_id = None;
            }
        }
        Ok(())
    }

    pub fn insert_deployment(&mut self, new: NewDeployment) -> Result<Deployment, AppError> {
        self.project(new.project_id)?;
        if let Some(environment_id) = new.environment_id {
            let environment = self
                .environments
                .get(&environment_id)
                .ok_or_else(|| AppError::NotFound(format!("environment {}", environment_id)))?;
            if environment.project_id != new.project_id {
                return Err(AppError::StorageError(format!(
                    "environment {} does not belong to project {}",
                    environment_id, new.project_id
                )));
            }
        }

        let deployment = Deployment {
            id: take_id(&mut self.next_id.deployment),
            project_id: new.project_id,
            commit_hash: new.commit_hash,
            branch: new.branch,
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            logs: Vec::new(),
            deployment_url: None,
            container_id: None,
            environment_id: new.environment_id,
        };
        self.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    pub fn deployment(&self, id: u64) -> Result<&Deployment, AppError> {
        self.deployments
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("deployment {}", id)))
    }

    fn deployment_mut(&mut self, id: u64) -> Result<&mut Deployment, AppError> {
        self.deployments
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("deployment {}", id)))
    }

    pub fn list_deployments(&self, filter: &DeploymentFilter) -> Vec<Deployment> {
        let matching = self.deployments.values().filter(|d| filter.matches(d)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn update_deployment(
        &mut self,
        id: u64,
        expected: DeploymentStatus,
        patch: DeploymentPatch,
    ) -> Result<Deployment, AppError> {
        let deployment = self.deployment_mut(id)?;

        if deployment.status != expected {
            return Err(AppError::StoreConflict {
                id,
                expected,
                actual: deployment.status,
            });
        }
        if let Some(status) = patch.status {
            if status != deployment.status {
                validate_transition(deployment.status, status)?;
            }
            deployment.status = status;
        }
        if let Some(completed_at) = patch.completed_at {
            deployment.completed_at = Some(completed_at);
        }
        if let Some(url) = patch.deployment_url {
            deployment.deployment_url = Some(url);
        }
        if let Some(container_id) = patch.container_id {
            deployment.container_id = container_id;
        }
        deployment.logs.extend(patch.logs);

        Ok(deployment.clone())
    }

    pub fn append_log(&mut self, id: u64, entries: Vec<LogEntry>) -> Result<(), AppError> {
        self.deployment_mut(id)?.logs.extend(entries);
        Ok(())
    }

    pub fn read_log(&self, id: u64, offset: usize, limit: usize) -> Result<Vec<LogEntry>, AppError> {
        Ok(self
            .deployment(id)?
            .logs
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn watermark(&self, name: &str) -> Option<DateTime<Utc>> {
        self.watermarks.get(name).copied()
    }

    pub fn set_watermark(&mut self, name: &str, at: DateTime<Utc>) {
        self.watermarks.insert(name.to_string(), at);
    }
}
