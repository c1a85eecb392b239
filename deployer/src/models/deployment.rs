//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Waiting for a worker to claim it
    Pending,

    /// Claimed; source fetch, image build and launch in progress
    Building,

    /// Reserved, never entered by any transition
    Deploying,

    /// Container launched and published
    Deployed,

    /// Pipeline or container failed
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeploymentStatus::Pending),
            "building" => Ok(DeploymentStatus::Building),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "deployed" => Ok(DeploymentStatus::Deployed),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Severity of a deployment log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One timestamped line of a deployment log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.to_rfc3339(), self.message)
    }
}

/// One attempt to build and run a specific commit of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: u64,
    pub project_id: u64,
    pub commit_hash: String,

    /// Branch the commit was resolved from
    #[serde(default)]
    pub branch: String,

    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Append-only, ordered by pipeline step
    #[serde(default)]
    pub logs: Vec<LogEntry>,

    #[serde(default)]
    pub deployment_url: Option<String>,

    /// Container handle; cleared once the reaper reclaims it
    #[serde(default)]
    pub container_id: Option<String>,

    /// Weak reference; nulled when the environment is deleted
    #[serde(default)]
    pub environment_id: Option<u64>,
}

impl Deployment {
    /// Render the log as text, one entry per line
    pub fn log_text(&self) -> String {
        self.logs
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn log_contains(&self, needle: &str) -> bool {
        self.logs.iter().any(|entry| entry.message.contains(needle))
    }
}

/// Fields supplied when inserting a deployment
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project_id: u64,
    pub commit_hash: String,
    pub branch: String,
    pub environment_id: Option<u64>,
}

/// Partial update applied by a conditional store write
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deployment_url: Option<String>,

    /// `Some(None)` clears the handle
    pub container_id: Option<Option<String>>,

    /// Appended after the existing entries
    pub logs: Vec<LogEntry>,
}

impl DeploymentPatch {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_log(mut self, entry: LogEntry) -> Self {
        self.logs.push(entry);
        self
    }

    pub fn with_logs(mut self, entries: impl IntoIterator<Item = LogEntry>) -> Self {
        self.logs.extend(entries);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

/// Deployment query
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Empty matches every status
    pub statuses: Vec<DeploymentStatus>,
    pub has_container: Option<bool>,
    pub completed_before: Option<DateTime<Utc>>,
    pub project_id: Option<u64>,
    pub limit: Option<usize>,
}

impl DeploymentFilter {
    pub fn with_status(status: DeploymentStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Default::default()
        }
    }

    pub fn matches(&self, deployment: &Deployment) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&deployment.status) {
            return false;
        }
        if let Some(has_container) = self.has_container {
            if deployment.container_id.is_some() != has_container {
                return false;
            }
        }
        if let Some(cutoff) = self.completed_before {
            match deployment.completed_at {
                Some(completed_at) if completed_at < cutoff => {}
                _ => return false,
            }
        }
        if let Some(project_id) = self.project_id {
            if deployment.project_id != project_id {
                return false;
            }
        }
        true
    }
}
