//! Heartbeat monitor service
//!
//! Wires [`heartbeat_core::HeartbeatMonitor`] to the outside world:
//!
//! - **config**: layered configuration (defaults, TOML file, environment, CLI)
//! - **sidecar**: [`heartbeat_core::ChainQuery`] over the Substrate API sidecar REST API
//! - **metrics**: Prometheus gauges behind [`heartbeat_core::MetricsSink`]
//! - **http**: the `GET /metrics` endpoint
//! - **alert**: fire-and-forget JSON webhook alerts
//! - **service**: head polling and the single-flight block loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use heartbeat_monitor::{MonitorConfig, Service};
//!
//! let config = MonitorConfig::from_args(std::env::args_os())?;
//! Service::new(config)?.run().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod alert;
pub mod config;
pub mod http;
pub mod metrics;
pub mod service;
pub mod sidecar;

pub use crate::alert::WebhookAlerter;
pub use crate::config::{ChainOverrides, MonitorConfig};
pub use crate::metrics::PrometheusSink;
pub use crate::service::Service;
pub use crate::sidecar::SidecarClient;

pub mod error {
    //! Error types for the monitor service

    pub use heartbeat_core::{MonitorError, MonitorResult};

    /// Errors raised while setting up or running the service
    #[derive(Debug, thiserror::Error)]
    pub enum ServiceError {
        /// Monitoring error
        #[error("Monitor error: {0}")]
        Monitor(#[from] MonitorError),

        /// HTTP client error
        #[error("HTTP client error: {0}")]
        Http(#[from] reqwest::Error),

        /// Metrics registry error
        #[error("Metrics error: {0}")]
        Metrics(#[from] prometheus::Error),

        /// Configuration source error
        #[error("Configuration error: {0}")]
        Config(#[from] ::config::ConfigError),

        /// Command line error
        #[error("Command line error: {0}")]
        Cli(#[from] clap::Error),

        /// I/O error
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// Serialization error
        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),
    }

    /// Result type for service operations
    pub type ServiceResult<T> = Result<T, ServiceError>;
}

pub use error::{ServiceError, ServiceResult};
