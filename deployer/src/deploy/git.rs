//! Git checkout of deployment sources

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AppError;

/// Clone `branch` of `repo_url` into `dest` and pin the work tree to `commit`
pub async fn checkout_commit(
    repo_url: &str,
    token: Option<&SecretString>,
    branch: &str,
    commit: &str,
    dest: &Path,
) -> Result<(), AppError> {
    info!("Cloning {} (branch: {}) to {}", repo_url, branch, dest.display());

    let auth_url = authenticated_url(repo_url, token);
    let dest_str = dest.to_string_lossy();
    run_git(
        None,
        &["clone", "--single-branch", "--branch", branch, auth_url.expose_secret(), &dest_str],
        token,
    )
    .await?;
    scrub_remote(dest, repo_url, token).await?;

    debug!("Checking out commit {} in {}", commit, dest.display());
    run_git(Some(dest), &["checkout", "--quiet", "--detach", commit], token).await?;

    info!("Checked out {}@{}", repo_url, commit);
    Ok(())
}

/// Point `origin` back at the bare URL so the token is not left in `.git/config`
pub async fn scrub_remote(
    dest: &Path,
    repo_url: &str,
    token: Option<&SecretString>,
) -> Result<(), AppError> {
    run_git(Some(dest), &["remote", "set-url", "origin", repo_url], token).await
}

/// Embed the access token in an https clone URL
pub fn authenticated_url(repo_url: &str, token: Option<&SecretString>) -> SecretString {
    match (token, repo_url.strip_prefix("https://")) {
        (Some(token), Some(rest)) => {
            SecretString::from(format!("https://oauth2:{}@{}", token.expose_secret(), rest))
        }
        _ => SecretString::from(repo_url.to_string()),
    }
}

async fn run_git(
    cwd: Option<&Path>,
    args: &[&str],
    token: Option<&SecretString>,
) -> Result<(), AppError> {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = command
        .output()
        .await
        .map_err(|e| AppError::SourceFetch(format!("Failed to run git {}: {}", args[0], e)))?;

    if !output.status.success() {
        let stderr = redact(&String::from_utf8_lossy(&output.stderr), token);
        return Err(AppError::SourceFetch(format!(
            "git {} failed: {}",
            args[0],
            stderr.trim()
        )));
    }
    Ok(())
}

fn redact(text: &str, token: Option<&SecretString>) -> String {
    match token {
        Some(token) if !token.expose_secret().is_empty() => {
            text.replace(token.expose_secret(), "[REDACTED]")
        }
        _ => text.to_string(),
    }
}
