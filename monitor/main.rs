//! `heartbeat-monitor` binary
//!
//! ```text
//! heartbeat-monitor --node http://127.0.0.1:8080 \
//!     --validator GTzRQPzkcuynHgkEHhsPBFpKdh4sAacVRsnd8vYfPpTMeEY \
//!     --webhook https://hooks.example.org/validators --port 5555
//! ```
//!
//! Exits non-zero when the chain connection is lost; restarting is left to
//! the process supervisor.

use anyhow::Context;
use heartbeat_monitor::{MonitorConfig, Service, ServiceError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match MonitorConfig::from_args(std::env::args_os()) {
        Ok(config) => config,
        Err(ServiceError::Cli(e)) => e.exit(),
        Err(e) => return Err(e).context("failed to load configuration"),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    Service::new(config)
        .context("invalid configuration")?
        .run()
        .await
        .context("heartbeat monitor stopped")
}
