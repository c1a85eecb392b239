//! Settings file management

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Process settings, shared by the worker and the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the storage logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Container and routing configuration
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Source control configuration
    #[serde(default)]
    pub github: GitHubSettings,

    /// Source fetch policy
    #[serde(default)]
    pub source: SourceSettings,

    /// Worker loop configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Health monitor and reaper configuration
    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            deploy: DeploySettings::default(),
            github: GitHubSettings::default(),
            source: SourceSettings::default(),
            worker: WorkerSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl Settings {
    /// Read the settings file (defaults when absent) and apply environment overrides
    pub async fn load(file: &File) -> Result<Self, AppError> {
        let mut settings = file.read_json_opt::<Settings>().await?.unwrap_or_default();
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Override selected keys from `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("EZDEPLOY_LOG_LEVEL") {
            self.log_level = level.parse().map_err(AppError::ConfigError)?;
        }
        if let Some(port) = lookup("EZDEPLOY_BASE_CONTAINER_PORT") {
            self.deploy.base_container_port = port.parse().map_err(|e| {
                AppError::ConfigError(format!("EZDEPLOY_BASE_CONTAINER_PORT={}: {}", port, e))
            })?;
        }
        if let Some(domain) = lookup("EZDEPLOY_DEPLOYMENT_DOMAIN") {
            self.deploy.deployment_domain = domain;
        }
        if let Some(network) = lookup("EZDEPLOY_PROXY_NETWORK") {
            self.deploy.proxy_network = network;
        }
        if let Some(client_id) = lookup("EZDEPLOY_GITHUB_CLIENT_ID") {
            self.github.client_id = Some(client_id);
        }
        if let Some(secret) = lookup("EZDEPLOY_GITHUB_CLIENT_SECRET") {
            self.github.client_secret = Some(SecretString::from(secret));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.deploy.deployment_domain.trim().is_empty() {
            return Err(AppError::ConfigError("deploy.deployment_domain is empty".to_string()));
        }
        if self.deploy.port_pool_size == 0 {
            return Err(AppError::ConfigError("deploy.port_pool_size must be > 0".to_string()));
        }
        if self.worker.max_concurrency == 0 {
            return Err(AppError::ConfigError("worker.max_concurrency must be > 0".to_string()));
        }
        if self.monitor.reaper_hour_utc > 23 {
            return Err(AppError::ConfigError(format!(
                "monitor.reaper_hour_utc must be 0-23, got {}",
                self.monitor.reaper_hour_utc
            )));
        }
        Ok(())
    }
}

/// Container and routing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// First externally exposed port
    #[serde(default = "default_base_container_port")]
    pub base_container_port: u16,

    /// Number of ports available above the base
    #[serde(default = "default_port_pool_size")]
    pub port_pool_size: u32,

    /// Port the application listens on inside the container
    #[serde(default = "default_app_port")]
    pub app_port: u16,

    /// Domain suffix for published hostnames
    #[serde(default = "default_deployment_domain")]
    pub deployment_domain: String,

    /// Network shared with the routing proxy
    #[serde(default = "default_proxy_network")]
    pub proxy_network: String,

    /// Scheme of published URLs
    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,
}

fn default_base_container_port() -> u16 {
    10000
}

fn default_port_pool_size() -> u32 {
    20000
}

fn default_app_port() -> u16 {
    8000
}

fn default_deployment_domain() -> String {
    "localhost".to_string()
}

fn default_proxy_network() -> String {
    "web".to_string()
}

fn default_url_scheme() -> String {
    "https".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            base_container_port: default_base_container_port(),
            port_pool_size: default_port_pool_size(),
            app_port: default_app_port(),
            deployment_domain: default_deployment_domain(),
            proxy_network: default_proxy_network(),
            url_scheme: default_url_scheme(),
        }
    }
}

/// GitHub API and OAuth application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_oauth_base_url")]
    pub oauth_base_url: String,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing)]
    pub client_secret: Option<SecretString>,

    #[serde(default)]
    pub redirect_uri: Option<String>,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_oauth_base_url() -> String {
    "https://github.com/login/oauth".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["repo".to_string()]
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            oauth_base_url: default_oauth_base_url(),
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            scopes: default_scopes(),
        }
    }
}

impl GitHubSettings {
    /// URL a user is sent to when linking their GitHub account
    pub fn authorize_url(&self, state: &str) -> Result<url::Url, AppError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| AppError::ConfigError("github.client_id is not set".to_string()))?;

        let mut params = vec![
            ("client_id", client_id.to_string()),
            ("scope", self.scopes.join(" ")),
            ("state", state.to_string()),
        ];
        if let Some(redirect_uri) = &self.redirect_uri {
            params.push(("redirect_uri", redirect_uri.clone()));
        }

        let base = format!("{}/authorize", self.oauth_base_url.trim_end_matches('/'));
        url::Url::parse_with_params(&base, &params)
            .map_err(|e| AppError::ConfigError(format!("Invalid OAuth URL: {}", e)))
    }
}

/// Source fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Attempts for retryable source control failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
        }
    }
}

/// Worker loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_worker_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_worker_error_backoff")]
    pub error_backoff_secs: u64,

    /// Deployments processed at once; 1 keeps processing strictly sequential
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Pending deployments taken per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_deployment_timeout")]
    pub deployment_timeout_secs: u64,
}

fn default_worker_poll_interval() -> u64 {
    5
}

fn default_worker_error_backoff() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    1
}

fn default_batch_size() -> usize {
    32
}

fn default_deployment_timeout() -> u64 {
    1800
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_worker_poll_interval(),
            error_backoff_secs: default_worker_error_backoff(),
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
            deployment_timeout_secs: default_deployment_timeout(),
        }
    }
}

/// Health monitor and reaper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_monitor_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_monitor_error_backoff")]
    pub error_backoff_secs: u64,

    /// Hour of day (UTC) the reaper runs
    #[serde(default = "default_reaper_hour")]
    pub reaper_hour_utc: u32,

    /// Terminal deployments older than this lose their container
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Container log lines attached to health failures
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_monitor_poll_interval() -> u64 {
    60
}

fn default_monitor_error_backoff() -> u64 {
    120
}

fn default_reaper_hour() -> u32 {
    3
}

fn default_retention_days() -> u32 {
    7
}

fn default_log_tail_lines() -> usize {
    100
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_monitor_poll_interval(),
            error_backoff_secs: default_monitor_error_backoff(),
            reaper_hour_utc: default_reaper_hour(),
            retention_days: default_retention_days(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}
