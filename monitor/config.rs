//! Service configuration
//!
//! Sources are layered, later ones winning: built-in defaults, an optional
//! TOML file given with `--config`, `HEARTBEAT_*` environment variables, and
//! finally command line flags.
//!
//! ```toml
//! node = "http://127.0.0.1:8080"
//! validators = ["GTzRQPzkcuynHgkEHhsPBFpKdh4sAacVRsnd8vYfPpTMeEY"]
//! webhook = "https://hooks.example.org/validators"
//! port = 5555
//! throttle_mode = "per-validator"
//!
//! [chain]
//! blocks_per_session = 600
//! ```

use crate::error::ServiceResult;
use clap::{Arg, ArgAction, ArgMatches, Command};
use ::config::{Environment, File, FileFormat};
use heartbeat_core::{ChainParams, MonitorError, MonitorResult, ThrottleMode, WatchList};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of the environment variables read by [`MonitorConfig::load`]
pub const ENV_PREFIX: &str = "HEARTBEAT";

/// Configuration for the heartbeat monitor service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Base URL of the Substrate API sidecar serving the chain
    pub node: String,
    /// Validator stash addresses to watch
    pub validators: Vec<String>,
    /// Alert webhook; alerting is disabled when unset
    pub webhook: Option<String>,
    /// Port of the metrics endpoint
    pub port: u16,
    /// How often the chain head is polled (milliseconds)
    pub poll_interval_ms: u64,
    /// Consecutive failed head polls treated as a lost connection
    pub max_head_failures: u32,
    /// Timeout for a single node or webhook request (milliseconds)
    pub request_timeout_ms: u64,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Alert cool-down bookkeeping
    pub throttle_mode: ThrottleMode,
    /// Overrides for the chain presets
    pub chain: ChainOverrides,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            node: String::new(),
            validators: Vec::new(),
            webhook: None,
            port: 5555,
            poll_interval_ms: 2000,
            max_head_failures: 3,
            request_timeout_ms: 10_000,
            log_level: "info".to_string(),
            throttle_mode: ThrottleMode::default(),
            chain: ChainOverrides::default(),
        }
    }
}

/// Chain constants that replace the preset picked from the chain name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainOverrides {
    /// Blocks in one session
    pub blocks_per_session: Option<u64>,
    /// Fraction of a session between repeated alerts
    pub cooldown_fraction: Option<f64>,
    /// Short reward window in eras; 0 disables it
    pub short_window_eras: Option<u32>,
    /// Long reward window in eras; 0 disables it
    pub long_window_eras: Option<u32>,
}

impl ChainOverrides {
    /// Apply the overrides on top of `params`
    pub fn apply(&self, mut params: ChainParams) -> ChainParams {
        if let Some(blocks) = self.blocks_per_session {
            params.blocks_per_session = blocks;
        }
        if let Some(fraction) = self.cooldown_fraction {
            params.cooldown_fraction = fraction;
        }
        if let Some(eras) = self.short_window_eras {
            params.reward_windows.short_window_eras = (eras > 0).then_some(eras);
        }
        if let Some(eras) = self.long_window_eras {
            params.reward_windows.long_window_eras = (eras > 0).then_some(eras);
        }
        params
    }
}

/// Command line definition
pub fn command() -> Command {
    Command::new("heartbeat-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Exports Substrate validator heartbeat and reward gauges, and alerts on missed heartbeats")
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("PATH")
            .help("TOML configuration file")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("node")
            .long("node")
            .visible_alias("ws")
            .value_name("URL")
            .help("Substrate API sidecar endpoint"))
        .arg(Arg::new("validator")
            .long("validator")
            .visible_alias("val")
            .value_name("ADDRESS")
            .help("Validator stash address to watch (repeatable)")
            .action(ArgAction::Append))
        .arg(Arg::new("webhook")
            .long("webhook")
            .visible_alias("alert-url")
            .value_name("URL")
            .help("Webhook receiving downtime alerts as JSON"))
        .arg(Arg::new("port")
            .short('p')
            .long("port")
            .value_name("PORT")
            .help("Metrics endpoint port [default: 5555]")
            .value_parser(clap::value_parser!(u16)))
        .arg(Arg::new("throttle-mode")
            .long("throttle-mode")
            .value_name("MODE")
            .help("Alert cool-down bookkeeping")
            .value_parser(["per-validator", "shared"]))
        .arg(Arg::new("log-level")
            .long("log-level")
            .value_name("FILTER")
            .help("Log filter used when RUST_LOG is unset [default: info]"))
}

impl MonitorConfig {
    /// Parse the command line and load every configuration layer
    pub fn from_args<I, T>(args: I) -> ServiceResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;
        Self::load(&matches)
    }

    /// Load every configuration layer, with `matches` on top
    pub fn load(matches: &ArgMatches) -> ServiceResult<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&MonitorConfig::default())?);

        if let Some(path) = matches.get_one::<PathBuf>("config") {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("validators"),
        );

        if let Some(node) = matches.get_one::<String>("node") {
            builder = builder.set_override("node", node.as_str())?;
        }
        if let Some(validators) = matches.get_many::<String>("validator") {
            let validators: Vec<String> = validators.cloned().collect();
            builder = builder.set_override("validators", validators)?;
        }
        if let Some(webhook) = matches.get_one::<String>("webhook") {
            builder = builder.set_override("webhook", webhook.as_str())?;
        }
        if let Some(port) = matches.get_one::<u16>("port") {
            builder = builder.set_override("port", i64::from(*port))?;
        }
        if let Some(mode) = matches.get_one::<String>("throttle-mode") {
            builder = builder.set_override("throttle_mode", mode.as_str())?;
        }
        if let Some(level) = matches.get_one::<String>("log-level") {
            builder = builder.set_override("log_level", level.as_str())?;
        }

        let config: MonitorConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Create a configuration for `node` watching `validators`
    pub fn new(node: impl Into<String>, validators: Vec<String>) -> Self {
        Self {
            node: node.into(),
            validators,
            ..Default::default()
        }
    }

    /// Set the alert webhook
    pub fn with_webhook(mut self, webhook: impl Into<String>) -> Self {
        self.webhook = Some(webhook.into());
        self
    }

    /// Set the metrics port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the throttle policy
    pub fn with_throttle_mode(mut self, mode: ThrottleMode) -> Self {
        self.throttle_mode = mode;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> MonitorResult<()> {
        if self.node.trim().is_empty() {
            return Err(MonitorError::InvalidConfig(
                "a node URL is required (--node)".to_string(),
            ));
        }

        if !(self.node.starts_with("http://") || self.node.starts_with("https://")) {
            return Err(MonitorError::InvalidConfig(format!(
                "node URL must be http(s) pointing at a Substrate API sidecar, got {}",
                self.node
            )));
        }

        if self.validators.iter().all(|v| v.trim().is_empty()) {
            return Err(MonitorError::InvalidConfig(
                "at least one validator is required (--validator)".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "poll interval must be positive".to_string(),
            ));
        }

        if self.max_head_failures == 0 {
            return Err(MonitorError::InvalidConfig(
                "max head failures must be positive".to_string(),
            ));
        }

        // Checked against the default preset; chain-specific presets only add windows
        self.chain_params("").validate()
    }

    /// Chain constants for the chain named `chain`
    pub fn chain_params(&self, chain: &str) -> ChainParams {
        self.chain.apply(ChainParams::for_chain(chain))
    }

    /// The configured watch-list
    pub fn watch_list(&self) -> WatchList {
        WatchList::new(
            self.validators
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty()),
        )
    }

    /// Head polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
