//! Era reward aggregation
//!
//! A validator's reward for an era is its share of the era's total payout,
//! weighted by reward points: `total_reward * individual_points / total_points`.
//! Eras the node cannot price (not paid out yet, pruned, zero points) count as
//! zero, and so do eras whose data does not decode.

use crate::{
    Balance, ChainQuery, EraIndex, EraRewardPoints, MonitorResult, ValidatorId,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, trace, warn};

/// Contiguous era range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RewardWindow {
    pub start: EraIndex,
    pub end: EraIndex,
}

impl RewardWindow {
    pub fn new(start: EraIndex, end: EraIndex) -> Self {
        Self { start, end }
    }

    /// The `length` eras before `current`; starts before genesis clamp to era 0
    pub fn trailing(current: EraIndex, length: u32) -> Self {
        Self {
            start: current.saturating_sub(length),
            end: current,
        }
    }

    /// Eras covered, ascending
    pub fn eras(&self) -> Range<EraIndex> {
        self.start..self.end.max(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Which reward window a figure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    /// The era that just ended
    LastEra,
    /// Short trailing window (one day on 6h-era chains)
    Recent,
    /// Long trailing window (21 days on 6h-era chains)
    Long,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastEra => "last_era",
            Self::Recent => "recent_window",
            Self::Long => "long_window",
        }
    }
}

/// Windows reported on each era transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardWindows {
    /// Length of the short window in eras, if the chain reports one
    pub short_window_eras: Option<u32>,
    /// Length of the long window in eras, if the chain reports one
    pub long_window_eras: Option<u32>,
}

impl RewardWindows {
    /// Windows ending at `current`, last era first
    pub fn windows_for(&self, current: EraIndex) -> Vec<(WindowKind, RewardWindow)> {
        let mut windows = vec![(WindowKind::LastEra, RewardWindow::trailing(current, 1))];
        if let Some(length) = self.short_window_eras {
            windows.push((WindowKind::Recent, RewardWindow::trailing(current, length)));
        }
        if let Some(length) = self.long_window_eras {
            windows.push((WindowKind::Long, RewardWindow::trailing(current, length)));
        }
        windows
    }
}

/// `validator`'s share of one era's payout, 0 when the era cannot be priced
pub fn era_share(
    total_reward: Option<Balance>,
    points: Option<&EraRewardPoints>,
    validator: &ValidatorId,
) -> f64 {
    let (Some(total_reward), Some(points)) = (total_reward, points) else {
        return 0.0;
    };
    if points.total == 0 {
        return 0.0;
    }
    match points.points_of(validator) {
        Some(individual) => total_reward as f64 / points.total as f64 * individual as f64,
        None => 0.0,
    }
}

/// Reward earned by `validator` over `window`
pub async fn compute_rewards<C>(
    chain: &C,
    validator: &ValidatorId,
    window: RewardWindow,
) -> MonitorResult<f64>
where
    C: ChainQuery + ?Sized,
{
    compute_watchlist_rewards(chain, std::slice::from_ref(validator), window).await
}

/// Summed reward of every validator in `validators` over `window`.
///
/// Each era is read once however many validators are summed. Transport errors
/// abort the window so the caller can retry it; undecodable era data counts
/// as zero.
pub async fn compute_watchlist_rewards<C>(
    chain: &C,
    validators: &[ValidatorId],
    window: RewardWindow,
) -> MonitorResult<f64>
where
    C: ChainQuery + ?Sized,
{
    let mut total = 0.0;

    for era in window.eras() {
        let total_reward = match chain.era_total_reward(era).await {
            Ok(Some(reward)) => reward,
            Ok(None) => {
                trace!("era {} has no recorded payout", era);
                continue;
            }
            Err(e) if e.is_malformed() => {
                warn!("skipping era {}: {}", era, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let points = match chain.era_reward_points(era).await {
            Ok(points) => points,
            Err(e) if e.is_malformed() => {
                warn!("skipping era {}: {}", era, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let era_reward: f64 = validators
            .iter()
            .map(|validator| era_share(Some(total_reward), points.as_ref(), validator))
            .sum();

        debug!("validator rewards in era {} are {}", era, era_reward);
        total += era_reward;
    }

    Ok(total)
}
