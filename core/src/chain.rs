//! Chain query facade
//!
//! The monitor never talks to a node directly. Everything it needs is read
//! through [`ChainQuery`], which a transport crate implements (the service uses
//! the Substrate API sidecar; tests use an in-memory chain). Values the node may
//! legitimately not have are `Option`s; values it has but that do not decode are
//! [`MonitorError::Malformed`].

use crate::{
    AuthIndex, Balance, BlockNumber, ChainInfo, EraIndex, MonitorError, MonitorResult,
    RewardPoints, SessionIndex, ValidatorId,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Point-in-time reads against a chain node.
///
/// Reads taking `at` are pinned to that block height so one pass sees a
/// consistent view; era reads address historical storage and are not pinned.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Chain name, node client name and node version
    async fn chain_info(&self) -> MonitorResult<ChainInfo>;

    /// Height of the current best block
    async fn latest_block(&self) -> MonitorResult<BlockNumber>;

    /// `session.currentIndex`
    async fn session_index(&self, at: BlockNumber) -> MonitorResult<SessionIndex>;

    /// Blocks elapsed in the current session, as estimated by the node
    async fn session_progress_estimate(&self, at: BlockNumber) -> MonitorResult<u64>;

    /// `session.validators`, in authority-index order
    async fn validators(&self, at: BlockNumber) -> MonitorResult<Vec<ValidatorId>>;

    /// `imOnline.receivedHeartbeats(session, authIndex)`
    async fn heartbeat(
        &self,
        at: BlockNumber,
        session: SessionIndex,
        auth_index: AuthIndex,
    ) -> MonitorResult<HeartbeatStatus>;

    /// `staking.activeEra`, `None` before the first era starts
    async fn active_era(&self, at: BlockNumber) -> MonitorResult<Option<EraIndex>>;

    /// `staking.erasValidatorReward(era)`, `None` until the era has been paid out
    async fn era_total_reward(&self, era: EraIndex) -> MonitorResult<Option<Balance>>;

    /// `staking.erasRewardPoints(era)`
    async fn era_reward_points(&self, era: EraIndex) -> MonitorResult<Option<EraRewardPoints>>;
}

#[async_trait]
impl<T: ChainQuery + ?Sized> ChainQuery for Arc<T> {
    async fn chain_info(&self) -> MonitorResult<ChainInfo> {
        (**self).chain_info().await
    }

    async fn latest_block(&self) -> MonitorResult<BlockNumber> {
        (**self).latest_block().await
    }

    async fn session_index(&self, at: BlockNumber) -> MonitorResult<SessionIndex> {
        (**self).session_index(at).await
    }

    async fn session_progress_estimate(&self, at: BlockNumber) -> MonitorResult<u64> {
        (**self).session_progress_estimate(at).await
    }

    async fn validators(&self, at: BlockNumber) -> MonitorResult<Vec<ValidatorId>> {
        (**self).validators(at).await
    }

    async fn heartbeat(
        &self,
        at: BlockNumber,
        session: SessionIndex,
        auth_index: AuthIndex,
    ) -> MonitorResult<HeartbeatStatus> {
        (**self).heartbeat(at, session, auth_index).await
    }

    async fn active_era(&self, at: BlockNumber) -> MonitorResult<Option<EraIndex>> {
        (**self).active_era(at).await
    }

    async fn era_total_reward(&self, era: EraIndex) -> MonitorResult<Option<Balance>> {
        (**self).era_total_reward(era).await
    }

    async fn era_reward_points(&self, era: EraIndex) -> MonitorResult<Option<EraRewardPoints>> {
        (**self).era_reward_points(era).await
    }
}

/// Whether a validator has sent its heartbeat for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeartbeatStatus {
    /// A heartbeat is on chain for this session
    Received,
    /// Nothing received yet
    Missing,
}

impl HeartbeatStatus {
    /// Decode the JSON rendering of `imOnline.receivedHeartbeats`.
    ///
    /// Runtimes have stored this item as opaque bytes (`"0x00"` and `"0x"` mean
    /// nothing was received) and later as a plain `bool`; an empty entry comes
    /// back as `null`. Anything else is rejected rather than read as received.
    pub fn decode(raw: &Value) -> MonitorResult<Self> {
        match raw {
            Value::Null => Ok(Self::Missing),
            Value::Bool(true) => Ok(Self::Received),
            Value::Bool(false) => Ok(Self::Missing),
            Value::String(s) => {
                let hex = s.strip_prefix("0x").ok_or_else(|| {
                    MonitorError::malformed("receivedHeartbeats", format!("not hex: {s:?}"))
                })?;
                if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(MonitorError::malformed(
                        "receivedHeartbeats",
                        format!("not hex: {s:?}"),
                    ));
                }
                if hex.is_empty() || hex == "00" {
                    Ok(Self::Missing)
                } else {
                    Ok(Self::Received)
                }
            }
            other => Err(MonitorError::malformed(
                "receivedHeartbeats",
                format!("unexpected value {other}"),
            )),
        }
    }

    /// Whether the heartbeat is missing
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Reward points accrued in one era
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraRewardPoints {
    /// Sum over all validators
    pub total: RewardPoints,
    /// Points per validator stash
    pub individual: IndexMap<ValidatorId, RewardPoints>,
}

impl EraRewardPoints {
    /// Points recorded for `validator`, if any
    pub fn points_of(&self, validator: &ValidatorId) -> Option<RewardPoints> {
        self.individual.get(validator).copied()
    }
}
