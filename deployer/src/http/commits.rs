//! Commit API client

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::AppError;
use crate::http::client::HttpClient;

#[derive(Debug, Clone, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
}

impl HttpClient {
    /// Hash of the newest commit on `branch`
    pub async fn latest_commit(
        &self,
        token: Option<&SecretString>,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, AppError> {
        let path = format!("/repos/{}/{}/commits/{}", owner, repo, branch);
        let response: CommitResponse = self.get(&path, token).await?;
        Ok(response.sha)
    }
}
