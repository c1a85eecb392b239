//! Project and source account models

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::AppError;
use crate::models::framework::Framework;

/// A source-controlled project that can be deployed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,

    /// Human readable name, also the base of the container identity
    pub name: String,

    /// Repository URL, e.g. `https://github.com/owner/repo.git`
    pub repository_url: String,

    /// Branch deployed when none is given
    pub branch: String,

    /// Declared or detected framework; `None` means auto-detect
    #[serde(default)]
    pub framework: Option<Framework>,

    /// Owning principal
    pub owner: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub last_deployed: Option<DateTime<Utc>>,
}

impl Project {
    /// Split the repository URL into (owner, repo)
    pub fn repository_path(&self) -> Result<(String, String), AppError> {
        parse_repository_url(&self.repository_url)
    }
}

/// Fields supplied when registering a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub repository_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub framework: Option<Framework>,
    pub owner: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Source control credentials of a principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAccount {
    pub owner: String,
    pub username: String,
    #[serde(serialize_with = "serialize_token")]
    pub access_token: SecretString,
}

// the store file is the only place the token is written out
fn serialize_token<S: Serializer>(token: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(token.expose_secret())
}

/// Parse `https://host/owner/repo(.git)` into (owner, repo)
pub fn parse_repository_url(repository_url: &str) -> Result<(String, String), AppError> {
    let parsed = url::Url::parse(repository_url).map_err(|e| {
        AppError::SourceFetch(format!("Invalid repository URL {}: {}", repository_url, e))
    })?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [.., owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(*repo);
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(AppError::SourceFetch(format!(
            "Repository URL has no owner/repo path: {}",
            repository_url
        ))),
    }
}
