//! Block-based alert cool-down
//!
//! A validator that keeps missing its heartbeat would otherwise raise an alert
//! on every block. The throttle allows one alert per cool-down window, measured
//! in blocks. Two policies are available:
//!
//! - [`ThrottleMode::PerValidator`]: each validator has its own window.
//! - [`ThrottleMode::Shared`]: one `(block, authIndex)` pair for the whole
//!   watch-list. A strictly higher authority index may still alert inside the
//!   window, so several validators can alert in the same pass, but validators
//!   alternating their downtime can hold each other's alerts back.

use crate::{AuthIndex, BlockNumber, MonitorError, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Cool-down bookkeeping policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThrottleMode {
    /// Independent window per validator
    #[default]
    PerValidator,
    /// One window for the whole watch-list
    Shared,
}

impl FromStr for ThrottleMode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-validator" => Ok(Self::PerValidator),
            "shared" => Ok(Self::Shared),
            other => Err(MonitorError::InvalidConfig(format!(
                "unknown throttle mode {other:?}, expected per-validator or shared"
            ))),
        }
    }
}

impl fmt::Display for ThrottleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerValidator => f.write_str("per-validator"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// Most recent alert in shared mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastAlert {
    pub block: BlockNumber,
    pub auth_index: AuthIndex,
}

/// Alert rate limiter keyed by validator
#[derive(Debug, Clone)]
pub struct AlertThrottle {
    mode: ThrottleMode,
    cooldown_blocks: u64,
    shared: LastAlert,
    per_validator: HashMap<ValidatorId, BlockNumber>,
}

impl AlertThrottle {
    /// Create a throttle with an empty history
    pub fn new(mode: ThrottleMode, cooldown_blocks: u64) -> Self {
        Self {
            mode,
            cooldown_blocks,
            shared: LastAlert::default(),
            per_validator: HashMap::new(),
        }
    }

    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }

    pub fn cooldown_blocks(&self) -> u64 {
        self.cooldown_blocks
    }

    /// Whether an alert for `validator` at `auth_index` may fire at `block`
    pub fn permits(&self, block: BlockNumber, auth_index: AuthIndex, validator: &ValidatorId) -> bool {
        match self.mode {
            ThrottleMode::Shared => {
                let cooldown_elapsed =
                    block > self.shared.block.saturating_add(self.cooldown_blocks);
                let later_validator = auth_index > self.shared.auth_index;
                cooldown_elapsed || later_validator
            }
            ThrottleMode::PerValidator => match self.per_validator.get(validator) {
                Some(last) => block > last.saturating_add(self.cooldown_blocks),
                None => true,
            },
        }
    }

    /// Record an alert that fired
    pub fn record(&mut self, block: BlockNumber, auth_index: AuthIndex, validator: &ValidatorId) {
        self.shared = LastAlert { block, auth_index };
        self.per_validator.insert(validator.clone(), block);
    }

    /// Last alert in shared mode
    pub fn last_alert(&self) -> LastAlert {
        self.shared
    }

    /// Block of the last alert for `validator`
    pub fn last_alert_for(&self, validator: &ValidatorId) -> Option<BlockNumber> {
        self.per_validator.get(validator).copied()
    }
}
