//! Shared fixtures for the heartbeat-core integration tests
//!
//! `MockChain` is an in-memory chain whose storage the tests edit between
//! passes; `RecordingSink` and `RecordingAlerts` capture everything a pass
//! writes out.

#![allow(dead_code)]

use async_trait::async_trait;
use heartbeat_core::{
    AlertTransport, AuthIndex, Balance, BlockNumber, ChainInfo, ChainQuery, DowntimeAlert,
    EraIndex, EraRewardPoints, HeartbeatStatus, MetricsSink, MonitorError, MonitorResult,
    RewardPoints, SessionIndex, ValidatorId, WindowKind,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub fn kusama_info() -> ChainInfo {
    ChainInfo {
        chain: "Kusama".to_string(),
        client: "Parity Polkadot".to_string(),
        version: "0.9.42".to_string(),
    }
}

pub fn ids(names: &[&str]) -> Vec<ValidatorId> {
    names.iter().map(|n| ValidatorId::from(*n)).collect()
}

pub fn era_points(total: RewardPoints, entries: &[(&str, RewardPoints)]) -> EraRewardPoints {
    let individual: IndexMap<ValidatorId, RewardPoints> = entries
        .iter()
        .map(|(id, p)| (ValidatorId::from(*id), *p))
        .collect();
    EraRewardPoints { total, individual }
}

#[derive(Debug, Default)]
struct ChainStorage {
    head: BlockNumber,
    session_index: SessionIndex,
    progress_estimate: u64,
    validators: Vec<ValidatorId>,
    heartbeats: HashMap<(SessionIndex, AuthIndex), Value>,
    active_era: Option<EraIndex>,
    era_rewards: HashMap<EraIndex, Balance>,
    era_points: HashMap<EraIndex, EraRewardPoints>,
    failing_eras: HashSet<EraIndex>,
    malformed_eras: HashSet<EraIndex>,
    session_unavailable: bool,
    heartbeats_unavailable: bool,
    era_reads: HashMap<EraIndex, usize>,
}

/// In-memory chain; clones share storage
#[derive(Debug, Clone, Default)]
pub struct MockChain {
    storage: Arc<Mutex<ChainStorage>>,
}

impl MockChain {
    pub fn new(validators: Vec<ValidatorId>) -> Self {
        let chain = Self::default();
        chain.storage.lock().unwrap().validators = validators;
        chain
    }

    pub fn set_head(&self, block: BlockNumber) {
        self.storage.lock().unwrap().head = block;
    }

    pub fn set_session(&self, index: SessionIndex, progress_estimate: u64) {
        let mut storage = self.storage.lock().unwrap();
        storage.session_index = index;
        storage.progress_estimate = progress_estimate;
    }

    pub fn set_validators(&self, validators: Vec<ValidatorId>) {
        self.storage.lock().unwrap().validators = validators;
    }

    /// Store a raw `receivedHeartbeats` value
    pub fn set_heartbeat_raw(&self, session: SessionIndex, auth_index: AuthIndex, raw: Value) {
        self.storage
            .lock()
            .unwrap()
            .heartbeats
            .insert((session, auth_index), raw);
    }

    pub fn set_heartbeat(&self, session: SessionIndex, auth_index: AuthIndex) {
        self.set_heartbeat_raw(session, auth_index, Value::Bool(true));
    }

    pub fn set_active_era(&self, era: Option<EraIndex>) {
        self.storage.lock().unwrap().active_era = era;
    }

    pub fn set_era(&self, era: EraIndex, total_reward: Option<Balance>, points: Option<EraRewardPoints>) {
        let mut storage = self.storage.lock().unwrap();
        match total_reward {
            Some(reward) => storage.era_rewards.insert(era, reward),
            None => storage.era_rewards.remove(&era),
        };
        match points {
            Some(points) => storage.era_points.insert(era, points),
            None => storage.era_points.remove(&era),
        };
    }

    /// Make reads of `era` fail with a transport error until cleared
    pub fn set_era_failing(&self, era: EraIndex, failing: bool) {
        let mut storage = self.storage.lock().unwrap();
        if failing {
            storage.failing_eras.insert(era);
        } else {
            storage.failing_eras.remove(&era);
        }
    }

    /// Make reads of `era` return undecodable data
    pub fn set_era_malformed(&self, era: EraIndex) {
        self.storage.lock().unwrap().malformed_eras.insert(era);
    }

    pub fn set_session_unavailable(&self, unavailable: bool) {
        self.storage.lock().unwrap().session_unavailable = unavailable;
    }

    pub fn set_heartbeats_unavailable(&self, unavailable: bool) {
        self.storage.lock().unwrap().heartbeats_unavailable = unavailable;
    }

    /// How many times `era_total_reward(era)` was called
    pub fn era_reads(&self, era: EraIndex) -> usize {
        self.storage
            .lock()
            .unwrap()
            .era_reads
            .get(&era)
            .copied()
            .unwrap_or(0)
    }

    fn era_check(&self, era: EraIndex) -> MonitorResult<()> {
        let storage = self.storage.lock().unwrap();
        if storage.failing_eras.contains(&era) {
            return Err(MonitorError::Chain(format!("era {era} read timed out")));
        }
        if storage.malformed_eras.contains(&era) {
            return Err(MonitorError::malformed("erasValidatorReward", format!("era {era}")));
        }
        Ok(())
    }

    fn session_check(&self) -> MonitorResult<()> {
        if self.storage.lock().unwrap().session_unavailable {
            return Err(MonitorError::Chain("session read failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn chain_info(&self) -> MonitorResult<ChainInfo> {
        Ok(kusama_info())
    }

    async fn latest_block(&self) -> MonitorResult<BlockNumber> {
        Ok(self.storage.lock().unwrap().head)
    }

    async fn session_index(&self, _at: BlockNumber) -> MonitorResult<SessionIndex> {
        self.session_check()?;
        Ok(self.storage.lock().unwrap().session_index)
    }

    async fn session_progress_estimate(&self, _at: BlockNumber) -> MonitorResult<u64> {
        self.session_check()?;
        Ok(self.storage.lock().unwrap().progress_estimate)
    }

    async fn validators(&self, _at: BlockNumber) -> MonitorResult<Vec<ValidatorId>> {
        Ok(self.storage.lock().unwrap().validators.clone())
    }

    async fn heartbeat(
        &self,
        _at: BlockNumber,
        session: SessionIndex,
        auth_index: AuthIndex,
    ) -> MonitorResult<HeartbeatStatus> {
        let raw = {
            let storage = self.storage.lock().unwrap();
            if storage.heartbeats_unavailable {
                return Err(MonitorError::Chain("heartbeat read failed".to_string()));
            }
            storage
                .heartbeats
                .get(&(session, auth_index))
                .cloned()
                .unwrap_or(Value::Null)
        };
        HeartbeatStatus::decode(&raw)
    }

    async fn active_era(&self, _at: BlockNumber) -> MonitorResult<Option<EraIndex>> {
        Ok(self.storage.lock().unwrap().active_era)
    }

    async fn era_total_reward(&self, era: EraIndex) -> MonitorResult<Option<Balance>> {
        *self.storage.lock().unwrap().era_reads.entry(era).or_insert(0) += 1;
        self.era_check(era)?;
        Ok(self.storage.lock().unwrap().era_rewards.get(&era).copied())
    }

    async fn era_reward_points(&self, era: EraIndex) -> MonitorResult<Option<EraRewardPoints>> {
        self.era_check(era)?;
        Ok(self.storage.lock().unwrap().era_points.get(&era).cloned())
    }
}

/// Captures gauge writes
#[derive(Debug, Default)]
pub struct RecordingSink {
    failures: Mutex<HashMap<ValidatorId, bool>>,
    points: Mutex<HashMap<ValidatorId, RewardPoints>>,
    eras: Mutex<Vec<EraIndex>>,
    windows: Mutex<Vec<(WindowKind, f64)>>,
}

impl RecordingSink {
    pub fn failure(&self, validator: &str) -> Option<bool> {
        self.failures
            .lock()
            .unwrap()
            .get(&ValidatorId::from(validator))
            .copied()
    }

    pub fn points(&self, validator: &str) -> Option<RewardPoints> {
        self.points
            .lock()
            .unwrap()
            .get(&ValidatorId::from(validator))
            .copied()
    }

    pub fn era_writes(&self) -> Vec<EraIndex> {
        self.eras.lock().unwrap().clone()
    }

    pub fn window_writes(&self) -> Vec<(WindowKind, f64)> {
        self.windows.lock().unwrap().clone()
    }

    /// Latest value written for `kind`
    pub fn window(&self, kind: WindowKind) -> Option<f64> {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
    }
}

impl MetricsSink for RecordingSink {
    fn set_heartbeat_failure(&self, _info: &ChainInfo, validator: &ValidatorId, failing: bool) {
        self.failures.lock().unwrap().insert(validator.clone(), failing);
    }

    fn set_reward_points(&self, _info: &ChainInfo, validator: &ValidatorId, points: RewardPoints) {
        self.points.lock().unwrap().insert(validator.clone(), points);
    }

    fn set_era_index(&self, _info: &ChainInfo, era: EraIndex) {
        self.eras.lock().unwrap().push(era);
    }

    fn set_window_reward(&self, _info: &ChainInfo, window: WindowKind, reward: f64) {
        self.windows.lock().unwrap().push((window, reward));
    }
}

/// Captures delivered alerts
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    sent: Mutex<Vec<DowntimeAlert>>,
}

impl RecordingAlerts {
    pub fn sent(&self) -> Vec<DowntimeAlert> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl AlertTransport for RecordingAlerts {
    fn notify(&self, alert: DowntimeAlert) {
        self.sent.lock().unwrap().push(alert);
    }
}
