//! # Heartbeat Core
//!
//! Per-block monitoring state machine for a Substrate validator set. The crate
//! consumes facts the chain node has already computed (session index and
//! progress, the active validator set, im-online heartbeats, era rewards) and
//! turns them into gauges and downtime alerts.
//!
//! ## Architecture
//!
//! - **Resolver**: maps the configured watch-list to authority indices in the current set
//! - **Session**: session-progress fraction and the "just rolled over" alert guard
//! - **Throttle**: block-based alert cool-down, shared or per validator
//! - **Rewards**: a validator's share of era rewards over contiguous era windows
//! - **Monitor**: the evaluation pass run once per observed block
//!
//! Everything that touches the network sits behind [`ChainQuery`], [`MetricsSink`]
//! and [`AlertTransport`], so the whole pass can be driven from tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use heartbeat_core::{ChainParams, HeartbeatMonitor, WatchList};
//!
//! let params = ChainParams::for_chain(&info.chain);
//! let watch = WatchList::new(["HNZata7iMYWmk5RvZRTiAsSDhV8366zq2YGb3tLH5Upf74F"]);
//! let mut monitor = HeartbeatMonitor::new(chain, params, watch, info)?;
//!
//! let report = monitor.on_block(block_number, &sink, &alerts).await?;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod chain;
pub mod monitor;
pub mod resolver;
pub mod rewards;
pub mod session;
pub mod sink;
pub mod throttle;

pub use chain::{ChainQuery, EraRewardPoints, HeartbeatStatus};
pub use monitor::{
    evaluate_heartbeat, EraTransition, HeartbeatMonitor, HeartbeatState, MonitorState, PassReport,
    PendingEra, ValidatorOutcome,
};
pub use resolver::{resolve_auth_indices, WatchList};
pub use rewards::{
    compute_rewards, compute_watchlist_rewards, era_share, RewardWindow, RewardWindows, WindowKind,
};
pub use session::{SessionProgress, SessionState};
pub use sink::{AlertTransport, ChainInfo, DowntimeAlert, MetricsSink, NoopAlerts};
pub use throttle::{AlertThrottle, LastAlert, ThrottleMode};

/// Block height as reported by the node.
pub type BlockNumber = u64;

/// Session index (`session.currentIndex`).
pub type SessionIndex = u32;

/// Era index (`staking.activeEra.index`).
pub type EraIndex = u32;

/// Position of a validator in the current session's validator set.
pub type AuthIndex = u32;

/// Era reward points (`staking.erasRewardPoints`).
pub type RewardPoints = u32;

/// Raw balance in the chain's smallest unit.
pub type Balance = u128;

/// Blocks per session on Kusama and Polkadot relay chains.
pub const DEFAULT_BLOCKS_PER_SESSION: u64 = 2400;

/// Share of a session a validator must wait between repeated alerts.
pub const DEFAULT_COOLDOWN_FRACTION: f64 = 0.10;

/// Short reward window: four 6h eras, i.e. one day on Kusama.
pub const KUSAMA_SHORT_WINDOW_ERAS: u32 = 4;

/// Long reward window: 84 eras, 21 days at 6h eras.
pub const LONG_WINDOW_ERAS: u32 = 84;

/// Blocks on which an era's failed reward windows are retried before they are
/// given up for that era.
pub const ERA_WINDOW_ATTEMPTS: u32 = 3;

/// Validator stash address as it appears in the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(String);

impl ValidatorId {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for ValidatorId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Chain-specific constants the monitor needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Number of blocks in one session
    pub blocks_per_session: u64,

    /// Fraction of a session between repeated alerts
    pub cooldown_fraction: f64,

    /// Reward windows reported on each era transition
    pub reward_windows: RewardWindows,
}

impl ChainParams {
    /// Create parameters with relay-chain defaults and only the long reward window
    pub fn new() -> Self {
        Self {
            blocks_per_session: DEFAULT_BLOCKS_PER_SESSION,
            cooldown_fraction: DEFAULT_COOLDOWN_FRACTION,
            reward_windows: RewardWindows {
                short_window_eras: None,
                long_window_eras: Some(LONG_WINDOW_ERAS),
            },
        }
    }

    /// Presets keyed by the name the node reports from `system_chain`.
    ///
    /// Only Kusama runs 6h eras, so only Kusama gets the one-day short window.
    pub fn for_chain(chain: &str) -> Self {
        let params = Self::new();
        if chain.eq_ignore_ascii_case("kusama") {
            params.with_reward_windows(RewardWindows {
                short_window_eras: Some(KUSAMA_SHORT_WINDOW_ERAS),
                long_window_eras: Some(LONG_WINDOW_ERAS),
            })
        } else {
            params
        }
    }

    /// Set the session length in blocks
    pub fn with_blocks_per_session(mut self, blocks: u64) -> Self {
        self.blocks_per_session = blocks;
        self
    }

    /// Set the alert cool-down as a fraction of the session length
    pub fn with_cooldown_fraction(mut self, fraction: f64) -> Self {
        self.cooldown_fraction = fraction;
        self
    }

    /// Replace the reward windows
    pub fn with_reward_windows(mut self, windows: RewardWindows) -> Self {
        self.reward_windows = windows;
        self
    }

    /// Cool-down in whole blocks.
    ///
    /// `block > last + c` for a real `c` holds exactly when `block > last + floor(c)`,
    /// so flooring keeps the comparison identical to the fractional one.
    pub fn cooldown_blocks(&self) -> u64 {
        (self.blocks_per_session as f64 * self.cooldown_fraction).floor() as u64
    }

    /// Validate the parameters
    pub fn validate(&self) -> MonitorResult<()> {
        if self.blocks_per_session == 0 {
            return Err(MonitorError::InvalidConfig(
                "blocks per session must be positive".to_string(),
            ));
        }

        if !(self.cooldown_fraction > 0.0 && self.cooldown_fraction <= 1.0) {
            return Err(MonitorError::InvalidConfig(format!(
                "cooldown fraction must be in (0, 1], got {}",
                self.cooldown_fraction
            )));
        }

        if self.reward_windows.short_window_eras == Some(0)
            || self.reward_windows.long_window_eras == Some(0)
        {
            return Err(MonitorError::InvalidConfig(
                "reward windows must span at least one era".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while evaluating a block
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// A read against the node failed; the next block may succeed
    #[error("chain query failed: {0}")]
    Chain(String),

    /// The node answered with data that does not decode
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// The storage item or field being decoded
        what: String,
        /// What was wrong with it
        detail: String,
    },

    /// The connection to the node is gone
    #[error("chain connection lost: {0}")]
    Disconnected(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MonitorError {
    /// Shorthand for a [`MonitorError::Malformed`] value
    pub fn malformed(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Whether the process should stop instead of waiting for the next block
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::InvalidConfig(_))
    }

    /// Whether the error came from undecodable chain data
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;
