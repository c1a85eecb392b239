//! ezdeploy monitor: container health checks and the daily reaper

use anyhow::Context;
use ezdeploy::app::options::Role;
use ezdeploy::app::run::start;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start(Role::Monitor)
        .await
        .inspect_err(|e| tracing::error!("Failed to run the monitor: {e}"))
        .with_context(|| format!("ezdeploy-monitor {}", env!("CARGO_PKG_VERSION")))
}
