//! Application configuration options

use std::fmt;
use std::time::Duration;

use crate::deploy::container::ControllerOptions;
use crate::deploy::lifecycle::LifecycleOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;
use crate::workers::schedule::DailySchedule;
use crate::workers::{deployer, monitor};

/// Which long-running process to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Monitor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Worker => write!(f, "worker"),
            Role::Monitor => write!(f, "monitor"),
        }
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Source control API base URL
    pub source_api_base_url: String,

    /// Container routing and ports
    pub controller: ControllerOptions,

    /// Lifecycle manager options
    pub pipeline: LifecycleOptions,

    /// Deployer worker options
    pub deployer: deployer::Options,

    /// Monitor worker options
    pub monitor: monitor::Options,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default())
    }
}

impl AppOptions {
    /// Options derived from the loaded settings file
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        let controller = ControllerOptions {
            base_port: settings.deploy.base_container_port,
            port_pool_size: settings.deploy.port_pool_size,
            app_port: settings.deploy.app_port,
            domain: settings.deploy.deployment_domain.clone(),
            network: settings.deploy.proxy_network.clone(),
            url_scheme: settings.deploy.url_scheme.clone(),
        };

        let pipeline = LifecycleOptions {
            builds_dir: layout.builds_dir().path().to_path_buf(),
            source_retry_attempts: settings.source.retry_attempts,
            source_retry_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        };

        let deployer = deployer::Options {
            interval: Duration::from_secs(settings.worker.poll_interval_secs),
            error_backoff: Duration::from_secs(settings.worker.error_backoff_secs),
            max_concurrency: settings.worker.max_concurrency,
            batch_size: settings.worker.batch_size,
            deployment_timeout: Duration::from_secs(settings.worker.deployment_timeout_secs),
        };

        let monitor = monitor::Options {
            interval: Duration::from_secs(settings.monitor.poll_interval_secs),
            error_backoff: Duration::from_secs(settings.monitor.error_backoff_secs),
            reaper_schedule: DailySchedule::new(settings.monitor.reaper_hour_utc),
            retention: chrono::Duration::days(i64::from(settings.monitor.retention_days)),
            log_tail_lines: settings.monitor.log_tail_lines,
        };

        Self {
            layout,
            source_api_base_url: settings.github.api_base_url.clone(),
            controller,
            pipeline,
            deployer,
            monitor,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.deploy.deployment_domain = "apps.example.com".to_string();
        settings.worker.max_concurrency = 4;
        settings.monitor.retention_days = 3;

        let options = AppOptions::from_settings(StorageLayout::new("/srv/ezdeploy"), &settings);
        assert_eq!(options.controller.domain, "apps.example.com");
        assert_eq!(options.deployer.max_concurrency, 4);
        assert_eq!(options.monitor.retention, chrono::Duration::days(3));
        assert_eq!(options.monitor.reaper_schedule, DailySchedule::new(3));
        assert!(options.pipeline.builds_dir.starts_with("/srv/ezdeploy"));
    }
}
