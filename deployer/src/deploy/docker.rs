//! Container runtime seam and its docker CLI implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AppError;

/// Observed state of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    /// Present but not running; carries the runtime's status word
    Stopped(String),
    NotFound,
}

/// Everything needed to start one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub network: String,
    pub host_port: u16,
    pub container_port: u16,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build the image described by `context/Dockerfile`, returning its reference
    async fn build_image(&self, context: &Path, tag: &str) -> Result<String, AppError>;

    /// Start a detached container, returning its handle
    async fn run(&self, spec: &RunSpec) -> Result<String, AppError>;

    /// Fails with `ContainerNotFound` when nothing answers to `handle`
    async fn stop(&self, handle: &str) -> Result<(), AppError>;

    /// Fails with `ContainerNotFound` when nothing answers to `handle`
    async fn remove(&self, handle: &str) -> Result<(), AppError>;

    async fn logs(&self, handle: &str, tail_lines: usize) -> Result<String, AppError>;

    /// An `Err` means the lookup itself failed and says nothing about the container
    async fn inspect(&self, handle: &str) -> Result<ContainerState, AppError>;
}

/// Drives the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn exec(&self, args: &[String]) -> Result<Output, std::io::Error> {
        debug!("{} {}", self.program, args.first().map(String::as_str).unwrap_or(""));
        Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Running", default)]
    running: bool,
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Last `n` lines of `text`
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

fn parse_state(json: &str) -> Result<ContainerState, AppError> {
    let state: InspectState = serde_json::from_str(json.trim())?;
    if state.running {
        Ok(ContainerState::Running)
    } else {
        Ok(ContainerState::Stopped(state.status))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<String, AppError> {
        info!("Building image {} from {}", tag, context.display());
        let args = vec![
            "build".to_string(),
            "--rm".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context.to_string_lossy().to_string(),
        ];
        let output = self
            .exec(&args)
            .await
            .map_err(|e| AppError::Build(format!("Failed to run docker build: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::Build(tail(&stderr_of(&output), 20)));
        }
        Ok(tag.to_string())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, AppError> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--network".to_string(),
            spec.network.clone(),
            "-p".to_string(),
            format!("{}:{}/tcp", spec.host_port, spec.container_port),
        ];
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());

        let output = self
            .exec(&args)
            .await
            .map_err(|e| AppError::RuntimeLaunch(format!("Failed to run docker run: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::RuntimeLaunch(stderr_of(&output)));
        }
        let handle = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if handle.is_empty() {
            return Err(AppError::RuntimeLaunch(format!(
                "docker run returned no container id for {}",
                spec.name
            )));
        }
        Ok(handle)
    }

    async fn stop(&self, handle: &str) -> Result<(), AppError> {
        let output = self.exec(&["stop".to_string(), handle.to_string()]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if is_missing(&stderr) {
            Err(AppError::ContainerNotFound(handle.to_string()))
        } else {
            Err(AppError::RuntimeLaunch(format!("docker stop {}: {}", handle, stderr)))
        }
    }

    async fn remove(&self, handle: &str) -> Result<(), AppError> {
        let output = self
            .exec(&["rm".to_string(), "-f".to_string(), handle.to_string()])
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if is_missing(&stderr) {
            Err(AppError::ContainerNotFound(handle.to_string()))
        } else {
            Err(AppError::RuntimeLaunch(format!("docker rm {}: {}", handle, stderr)))
        }
    }

    async fn logs(&self, handle: &str, tail_lines: usize) -> Result<String, AppError> {
        let output = self
            .exec(&[
                "logs".to_string(),
                "--tail".to_string(),
                tail_lines.to_string(),
                handle.to_string(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing(&stderr) {
                return Err(AppError::ContainerNotFound(handle.to_string()));
            }
            return Err(AppError::Internal(format!("docker logs {}: {}", handle, stderr)));
        }
        // containers write to both streams
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn inspect(&self, handle: &str) -> Result<ContainerState, AppError> {
        let output = self
            .exec(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{json .State}}".to_string(),
                handle.to_string(),
            ])
            .await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing(&stderr) {
                return Ok(ContainerState::NotFound);
            }
            return Err(AppError::Internal(format!("docker inspect {}: {}", handle, stderr)));
        }
        parse_state(&String::from_utf8_lossy(&output.stdout))
    }
}
