//! ezdeploy worker: drains pending deployments

use anyhow::Context;
use ezdeploy::app::options::Role;
use ezdeploy::app::run::start;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start(Role::Worker)
        .await
        .inspect_err(|e| tracing::error!("Failed to run the worker: {e}"))
        .with_context(|| format!("ezdeploy-worker {}", env!("CARGO_PKG_VERSION")))
}
