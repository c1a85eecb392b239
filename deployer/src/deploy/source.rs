//! Source control seam used by the lifecycle manager

use std::path::Path;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::deploy::git;
use crate::errors::AppError;
use crate::http::HttpClient;

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Hash of the newest commit on `branch`
    async fn latest_commit(
        &self,
        token: Option<&SecretString>,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, AppError>;

    /// Materialize `branch` at `commit` into the empty directory `dest`
    async fn fetch_tree(
        &self,
        token: Option<&SecretString>,
        repo_url: &str,
        branch: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<(), AppError>;
}

/// GitHub REST API for commit lookup, git CLI for checkouts
#[derive(Debug, Clone)]
pub struct GitHubSource {
    http: HttpClient,
}

impl GitHubSource {
    pub fn new(api_base_url: &str) -> Result<Self, AppError> {
        Ok(Self {
            http: HttpClient::new(api_base_url)?,
        })
    }
}

#[async_trait]
impl SourceControl for GitHubSource {
    async fn latest_commit(
        &self,
        token: Option<&SecretString>,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, AppError> {
        self.http.latest_commit(token, owner, repo, branch).await
    }

    async fn fetch_tree(
        &self,
        token: Option<&SecretString>,
        repo_url: &str,
        branch: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<(), AppError> {
        git::checkout_commit(repo_url, token, branch, commit, dest).await
    }
}
