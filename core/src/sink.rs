//! Outputs of an evaluation pass: gauges and downtime alerts

use crate::{
    BlockNumber, EraIndex, RewardPoints, SessionIndex, ValidatorId, WindowKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the node being queried, used as metric labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Chain name, e.g. `Kusama`
    pub chain: String,
    /// Node implementation name, e.g. `Parity Polkadot`
    pub client: String,
    /// Node version string
    pub version: String,
}

/// Gauge registry the monitor writes to.
///
/// Gauges are last-write-wins per label set; implementations must make a
/// single update atomic because scrapes run concurrently with passes.
pub trait MetricsSink: Send + Sync {
    /// 1 when the validator has not sent a heartbeat this session, else 0
    fn set_heartbeat_failure(&self, info: &ChainInfo, validator: &ValidatorId, failing: bool);

    /// Reward points accrued in the active era
    fn set_reward_points(&self, info: &ChainInfo, validator: &ValidatorId, points: RewardPoints);

    /// Active era index, written on each era transition
    fn set_era_index(&self, info: &ChainInfo, era: EraIndex);

    /// Aggregate watch-list reward over one window, written on each era transition
    fn set_window_reward(&self, info: &ChainInfo, window: WindowKind, reward: f64);
}

/// A validator missed its heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowntimeAlert {
    pub validator: ValidatorId,
    pub chain: String,
    pub session: SessionIndex,
    pub block: BlockNumber,
    pub progress_percent: i64,
    pub raised_at: DateTime<Utc>,
}

impl DowntimeAlert {
    /// Human readable summary
    pub fn message(&self) -> String {
        format!("{} is reported offline", self.validator)
    }
}

/// Fire-and-forget alert delivery.
///
/// `notify` must return promptly and must not fail the caller: delivery
/// errors are the transport's to log.
pub trait AlertTransport: Send + Sync {
    fn notify(&self, alert: DowntimeAlert);
}

/// Transport used when alerting is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAlerts;

impl AlertTransport for NoopAlerts {
    fn notify(&self, alert: DowntimeAlert) {
        tracing::debug!("alerting disabled, dropping: {}", alert.message());
    }
}
