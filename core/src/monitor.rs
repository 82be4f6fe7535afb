//! The per-block evaluation pass
//!
//! [`HeartbeatMonitor::on_block`] runs once for every observed block:
//!
//! 1. read session index, session progress and the validator set
//! 2. resolve the watch-list to authority indices
//! 3. on an era transition, recompute the reward windows
//! 4. per watched validator, in ascending authority index: publish reward
//!    points, decode the heartbeat, update the failure gauge and maybe alert
//!
//! Passes must not overlap; `on_block` takes `&mut self` so the borrow checker
//! enforces that for a single monitor.

use crate::{
    compute_watchlist_rewards, resolve_auth_indices, AlertThrottle, AlertTransport, AuthIndex,
    BlockNumber, ChainInfo, ChainParams, ChainQuery, DowntimeAlert, EraIndex, EraRewardPoints,
    HeartbeatStatus, MetricsSink, MonitorError, MonitorResult, RewardPoints, RewardWindow,
    SessionProgress, SessionState, ThrottleMode, ValidatorId, WatchList, WindowKind,
    ERA_WINDOW_ATTEMPTS,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome of the heartbeat check for one validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeartbeatState {
    /// Heartbeat received this session
    Present,
    /// Heartbeat missing, alert held back by the cool-down or the rollover guard
    AbsentSuppressed,
    /// Heartbeat missing, alert sent
    AbsentAlerted,
}

impl HeartbeatState {
    /// Value for the failure gauge
    pub fn is_failing(&self) -> bool {
        !matches!(self, Self::Present)
    }
}

/// Apply the heartbeat transition rule for one validator.
///
/// Records the alert in `throttle` when one fires; the caller delivers it.
pub fn evaluate_heartbeat(
    throttle: &mut AlertThrottle,
    block: BlockNumber,
    auth_index: AuthIndex,
    validator: &ValidatorId,
    status: HeartbeatStatus,
    progress: SessionProgress,
) -> HeartbeatState {
    if !status.is_missing() {
        return HeartbeatState::Present;
    }

    if throttle.permits(block, auth_index, validator) && progress.alerts_allowed() {
        throttle.record(block, auth_index, validator);
        HeartbeatState::AbsentAlerted
    } else {
        HeartbeatState::AbsentSuppressed
    }
}

/// Reward windows of an era still being published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEra {
    pub era: EraIndex,
    /// Windows already published for `era`
    pub published: Vec<WindowKind>,
    /// Blocks on which the windows were attempted
    pub attempts: u32,
}

impl PendingEra {
    fn new(era: EraIndex) -> Self {
        Self {
            era,
            published: Vec::new(),
            attempts: 0,
        }
    }
}

/// State carried from one pass to the next
#[derive(Debug, Clone)]
pub struct MonitorState {
    /// Highest era whose reward windows are settled
    pub last_seen_era: EraIndex,
    /// Era whose windows are partly published, awaiting a retry
    pub pending: Option<PendingEra>,
    pub throttle: AlertThrottle,
}

impl MonitorState {
    pub fn new(mode: ThrottleMode, cooldown_blocks: u64) -> Self {
        Self {
            last_seen_era: 0,
            pending: None,
            throttle: AlertThrottle::new(mode, cooldown_blocks),
        }
    }
}

/// What happened to one watched validator during a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    pub validator: ValidatorId,
    pub auth_index: AuthIndex,
    /// `None` when the heartbeat could not be read this pass
    pub heartbeat: Option<HeartbeatState>,
    /// `None` when the active era's points could not be read
    pub reward_points: Option<RewardPoints>,
}

/// Reward windows published on an era transition, or on a retry of the
/// windows that failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EraTransition {
    pub era: EraIndex,
    pub rewards: Vec<(WindowKind, RewardWindow, f64)>,
}

/// Summary of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub block: BlockNumber,
    pub session: SessionState,
    pub outcomes: Vec<ValidatorOutcome>,
    pub era_transition: Option<EraTransition>,
}

impl PassReport {
    /// Number of alerts sent in this pass
    pub fn alerts_sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.heartbeat == Some(HeartbeatState::AbsentAlerted))
            .count()
    }
}

/// Heartbeat and reward monitor for one chain
pub struct HeartbeatMonitor<C> {
    chain: C,
    params: ChainParams,
    watch_list: WatchList,
    info: ChainInfo,
    state: MonitorState,
}

impl<C: ChainQuery> HeartbeatMonitor<C> {
    /// Create a monitor with the default per-validator throttle
    pub fn new(
        chain: C,
        params: ChainParams,
        watch_list: WatchList,
        info: ChainInfo,
    ) -> MonitorResult<Self> {
        Self::with_throttle_mode(chain, params, watch_list, info, ThrottleMode::default())
    }

    /// Create a monitor with an explicit throttle policy
    pub fn with_throttle_mode(
        chain: C,
        params: ChainParams,
        watch_list: WatchList,
        info: ChainInfo,
        mode: ThrottleMode,
    ) -> MonitorResult<Self> {
        params.validate()?;
        let state = MonitorState::new(mode, params.cooldown_blocks());
        Ok(Self {
            chain,
            params,
            watch_list,
            info,
            state,
        })
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain_info(&self) -> &ChainInfo {
        &self.info
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    /// Run one evaluation pass for `block`.
    ///
    /// Fails only when the session reads fail, since nothing else can be
    /// evaluated without them. Era, reward-point and heartbeat read failures
    /// skip the affected update and are logged.
    pub async fn on_block(
        &mut self,
        block: BlockNumber,
        sink: &dyn MetricsSink,
        alerts: &dyn AlertTransport,
    ) -> MonitorResult<PassReport> {
        info!("Chain is at block #{}", block);

        let (estimate, session_index, validators) = futures::try_join!(
            self.chain.session_progress_estimate(block),
            self.chain.session_index(block),
            self.chain.validators(block),
        )?;
        let session = SessionState {
            index: session_index,
            progress: SessionProgress::from_estimate(estimate, self.params.blocks_per_session),
        };

        let auth_indices = resolve_auth_indices(&validators, &self.watch_list);
        if auth_indices.is_empty() {
            debug!("no watched validator in the set of {} at block #{}", validators.len(), block);
        }

        let (era_transition, era_points) = self.track_era(block, sink).await;

        let mut outcomes = Vec::with_capacity(auth_indices.len());
        for auth_index in auth_indices {
            let validator = validators[auth_index as usize].clone();
            let outcome = self
                .check_validator(block, session, auth_index, validator, era_points.as_ref(), sink, alerts)
                .await;
            outcomes.push(outcome);
        }

        Ok(PassReport {
            block,
            session,
            outcomes,
            era_transition,
        })
    }

    /// Reads the active era and its points; publishes reward windows when the
    /// era moved past the last one published.
    async fn track_era(
        &mut self,
        block: BlockNumber,
        sink: &dyn MetricsSink,
    ) -> (Option<EraTransition>, Option<Option<EraRewardPoints>>) {
        let era = match self.chain.active_era(block).await {
            Ok(Some(era)) => era,
            Ok(None) => {
                debug!("no active era at block #{}", block);
                return (None, None);
            }
            Err(e) => {
                warn!("skipping era bookkeeping at block #{}: {}", block, e);
                return (None, None);
            }
        };
        debug!("active era is {}", era);

        let points = match self.chain.era_reward_points(era).await {
            Ok(points) => Some(points),
            Err(e) => {
                warn!("reward points for era {} unavailable: {}", era, e);
                None
            }
        };

        if era <= self.state.last_seen_era {
            return (None, points);
        }

        let mut pending = match self.state.pending.take() {
            Some(pending) if pending.era == era => pending,
            _ => {
                sink.set_era_index(&self.info, era);
                PendingEra::new(era)
            }
        };
        pending.attempts += 1;

        let watched: Vec<ValidatorId> = self.watch_list.iter().cloned().collect();
        let mut rewards = Vec::new();
        let mut failed = Vec::new();

        for (kind, window) in self.params.reward_windows.windows_for(era) {
            if pending.published.contains(&kind) {
                continue;
            }
            match compute_watchlist_rewards(&self.chain, &watched, window).await {
                Ok(reward) => {
                    info!(
                        "{} rewards over eras [{}, {}) are {}",
                        kind.as_str(),
                        window.start,
                        window.end,
                        reward
                    );
                    sink.set_window_reward(&self.info, kind, reward);
                    pending.published.push(kind);
                    rewards.push((kind, window, reward));
                }
                Err(e) => {
                    warn!("{} rewards for era {} failed: {}", kind.as_str(), era, e);
                    failed.push(kind);
                }
            }
        }

        if failed.is_empty() {
            self.state.last_seen_era = era;
        } else if pending.attempts >= ERA_WINDOW_ATTEMPTS {
            warn!(
                "giving up on {} reward window(s) for era {} after {} attempts",
                failed.len(),
                era,
                pending.attempts
            );
            self.state.last_seen_era = era;
        } else {
            debug!("retrying {} reward window(s) for era {} next block", failed.len(), era);
            self.state.pending = Some(pending);
        }

        (Some(EraTransition { era, rewards }), points)
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_validator(
        &mut self,
        block: BlockNumber,
        session: SessionState,
        auth_index: AuthIndex,
        validator: ValidatorId,
        era_points: Option<&Option<EraRewardPoints>>,
        sink: &dyn MetricsSink,
        alerts: &dyn AlertTransport,
    ) -> ValidatorOutcome {
        debug!(
            "Checking AuthIndex #{}, Session #{}, Progress {}%",
            auth_index,
            session.index,
            session.progress.percent()
        );

        let reward_points = era_points.map(|points| {
            let value = points
                .as_ref()
                .and_then(|p| p.points_of(&validator))
                .unwrap_or(0);
            sink.set_reward_points(&self.info, &validator, value);
            value
        });

        let heartbeat = match self.chain.heartbeat(block, session.index, auth_index).await {
            Ok(status) => Some(self.apply_heartbeat(block, session, auth_index, &validator, status, sink, alerts)),
            Err(e) => {
                log_heartbeat_failure(&validator, &e);
                None
            }
        };

        ValidatorOutcome {
            validator,
            auth_index,
            heartbeat,
            reward_points,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_heartbeat(
        &mut self,
        block: BlockNumber,
        session: SessionState,
        auth_index: AuthIndex,
        validator: &ValidatorId,
        status: HeartbeatStatus,
        sink: &dyn MetricsSink,
        alerts: &dyn AlertTransport,
    ) -> HeartbeatState {
        let state = evaluate_heartbeat(
            &mut self.state.throttle,
            block,
            auth_index,
            validator,
            status,
            session.progress,
        );
        sink.set_heartbeat_failure(&self.info, validator, state.is_failing());

        match state {
            HeartbeatState::Present => {
                debug!("Everything good - {} sent a heartbeat", validator);
            }
            HeartbeatState::AbsentSuppressed => {
                info!(
                    "{} has not submitted a heartbeat this session [{}%]",
                    validator,
                    session.progress.percent()
                );
            }
            HeartbeatState::AbsentAlerted => {
                info!("Reporting {} for session {}", validator, session.index);
                alerts.notify(DowntimeAlert {
                    validator: validator.clone(),
                    chain: self.info.chain.clone(),
                    session: session.index,
                    block,
                    progress_percent: session.progress.percent(),
                    raised_at: chrono::Utc::now(),
                });
            }
        }

        state
    }
}

fn log_heartbeat_failure(validator: &ValidatorId, error: &MonitorError) {
    if error.is_malformed() {
        warn!("undecodable heartbeat for {}, leaving gauge unchanged: {}", validator, error);
    } else {
        warn!("heartbeat read for {} failed: {}", validator, error);
    }
}
