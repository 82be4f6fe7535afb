//! Chain access through the Substrate API sidecar
//!
//! The sidecar exposes runtime storage as JSON over HTTP:
//!
//! - `GET /node/version` for the chain name and node client
//! - `GET /blocks/head/header` for the best block
//! - `GET /pallets/{pallet}/storage/{item}?keys[]=..&at=..` for storage reads
//! - `GET /pallets/{pallet}/consts/{item}` for runtime constants
//!
//! Integers come back as decimal strings; everything is decoded here so the
//! core only sees typed values.

use crate::error::ServiceResult;
use async_trait::async_trait;
use heartbeat_core::{
    AuthIndex, Balance, BlockNumber, ChainInfo, ChainQuery, EraIndex, EraRewardPoints,
    HeartbeatStatus, MonitorError, MonitorResult, SessionIndex, ValidatorId,
};
use indexmap::IndexMap;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

/// [`ChainQuery`] backed by a Substrate API sidecar
#[derive(Debug, Clone)]
pub struct SidecarClient {
    client: Client,
    base_url: String,
    epoch_duration: std::sync::Arc<OnceCell<u64>>,
}

impl SidecarClient {
    /// Create a client for the sidecar at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            epoch_duration: Default::default(),
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> MonitorResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        trace!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    MonitorError::Disconnected(format!("{}: {e}", self.base_url))
                } else {
                    MonitorError::Chain(format!("{path}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Chain(format!("{path}: sidecar answered {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| MonitorError::malformed(path, e.to_string()))
    }

    /// Read a storage item, optionally pinned to a block
    async fn storage(
        &self,
        pallet: &str,
        item: &str,
        keys: &[String],
        at: Option<BlockNumber>,
    ) -> MonitorResult<Value> {
        let mut query: Vec<(&str, String)> = keys.iter().map(|k| ("keys[]", k.clone())).collect();
        if let Some(block) = at {
            query.push(("at", block.to_string()));
        }

        let path = format!("/pallets/{pallet}/storage/{item}");
        let body = self.get_json(&path, &query).await?;
        take_value(body, &format!("{pallet}.{item}"))
    }

    async fn constant(&self, pallet: &str, item: &str) -> MonitorResult<Value> {
        let path = format!("/pallets/{pallet}/consts/{item}");
        let body = self.get_json(&path, &[]).await?;
        take_value(body, &format!("{pallet}.{item}"))
    }

    async fn epoch_duration(&self) -> MonitorResult<u64> {
        self.epoch_duration
            .get_or_try_init(|| async {
                let value = self.constant("babe", "EpochDuration").await?;
                let duration = parse_u64(&value, "babe.EpochDuration")?;
                debug!("epoch duration is {} slots", duration);
                Ok::<u64, MonitorError>(duration)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl ChainQuery for SidecarClient {
    async fn chain_info(&self) -> MonitorResult<ChainInfo> {
        let body = self.get_json("/node/version", &[]).await?;
        parse_node_version(&body)
    }

    async fn latest_block(&self) -> MonitorResult<BlockNumber> {
        let body = self.get_json("/blocks/head/header", &[]).await?;
        parse_header_number(&body)
    }

    async fn session_index(&self, at: BlockNumber) -> MonitorResult<SessionIndex> {
        let value = self.storage("session", "currentIndex", &[], Some(at)).await?;
        parse_u32(&value, "session.currentIndex")
    }

    async fn session_progress_estimate(&self, at: BlockNumber) -> MonitorResult<u64> {
        let (current_slot, epoch_index, genesis_slot, epoch_duration) = futures::try_join!(
            self.storage("babe", "currentSlot", &[], Some(at)),
            self.storage("babe", "epochIndex", &[], Some(at)),
            self.storage("babe", "genesisSlot", &[], Some(at)),
            self.epoch_duration(),
        )?;

        Ok(epoch_progress(
            parse_u64(&current_slot, "babe.currentSlot")?,
            parse_u64(&epoch_index, "babe.epochIndex")?,
            epoch_duration,
            parse_u64(&genesis_slot, "babe.genesisSlot")?,
        ))
    }

    async fn validators(&self, at: BlockNumber) -> MonitorResult<Vec<ValidatorId>> {
        let value = self.storage("session", "validators", &[], Some(at)).await?;
        parse_validators(&value)
    }

    async fn heartbeat(
        &self,
        at: BlockNumber,
        session: SessionIndex,
        auth_index: AuthIndex,
    ) -> MonitorResult<HeartbeatStatus> {
        let keys = [session.to_string(), auth_index.to_string()];
        let value = self
            .storage("imOnline", "receivedHeartbeats", &keys, Some(at))
            .await?;
        HeartbeatStatus::decode(&value)
    }

    async fn active_era(&self, at: BlockNumber) -> MonitorResult<Option<EraIndex>> {
        let value = self.storage("staking", "activeEra", &[], Some(at)).await?;
        parse_active_era(&value)
    }

    async fn era_total_reward(&self, era: EraIndex) -> MonitorResult<Option<Balance>> {
        let value = self
            .storage("staking", "erasValidatorReward", &[era.to_string()], None)
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        parse_u128(&value, "staking.erasValidatorReward").map(Some)
    }

    async fn era_reward_points(&self, era: EraIndex) -> MonitorResult<Option<EraRewardPoints>> {
        let value = self
            .storage("staking", "erasRewardPoints", &[era.to_string()], None)
            .await?;
        parse_era_points(&value)
    }
}

fn take_value(mut body: Value, what: &str) -> MonitorResult<Value> {
    match body.get_mut("value") {
        Some(value) => Ok(value.take()),
        None => Err(MonitorError::malformed(what, "response has no value field")),
    }
}

/// Blocks elapsed in the current BABE epoch, clamped at 0
pub fn epoch_progress(current_slot: u64, epoch_index: u64, epoch_duration: u64, genesis_slot: u64) -> u64 {
    let epoch_start = epoch_index
        .saturating_mul(epoch_duration)
        .saturating_add(genesis_slot);
    current_slot.saturating_sub(epoch_start)
}

fn parse_u128(value: &Value, what: &str) -> MonitorResult<u128> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16).ok(),
            None => s.parse::<u128>().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| MonitorError::malformed(what, format!("not an unsigned integer: {value}")))
}

fn parse_u64(value: &Value, what: &str) -> MonitorResult<u64> {
    let wide = parse_u128(value, what)?;
    u64::try_from(wide).map_err(|_| MonitorError::malformed(what, format!("{wide} out of range")))
}

fn parse_u32(value: &Value, what: &str) -> MonitorResult<u32> {
    let wide = parse_u128(value, what)?;
    u32::try_from(wide).map_err(|_| MonitorError::malformed(what, format!("{wide} out of range")))
}

/// `number` of a `/blocks/head/header` response
pub fn parse_header_number(body: &Value) -> MonitorResult<BlockNumber> {
    let number = body
        .get("number")
        .ok_or_else(|| MonitorError::malformed("header", "missing number"))?;
    parse_u64(number, "header.number")
}

/// Chain identity from a `/node/version` response
pub fn parse_node_version(body: &Value) -> MonitorResult<ChainInfo> {
    let field = |name: &str| -> MonitorResult<String> {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MonitorError::malformed("node version", format!("missing {name}")))
    };

    Ok(ChainInfo {
        chain: field("chain")?,
        client: field("clientImplName")?,
        version: field("clientVersion")?,
    })
}

/// `session.validators`
pub fn parse_validators(value: &Value) -> MonitorResult<Vec<ValidatorId>> {
    let entries = value
        .as_array()
        .ok_or_else(|| MonitorError::malformed("session.validators", "not a list"))?;

    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(ValidatorId::from)
                .ok_or_else(|| MonitorError::malformed("session.validators", format!("bad entry {entry}")))
        })
        .collect()
}

/// `staking.activeEra`, `null` before the first era
pub fn parse_active_era(value: &Value) -> MonitorResult<Option<EraIndex>> {
    if value.is_null() {
        return Ok(None);
    }
    let index = value
        .get("index")
        .ok_or_else(|| MonitorError::malformed("staking.activeEra", "missing index"))?;
    parse_u32(index, "staking.activeEra.index").map(Some)
}

/// `staking.erasRewardPoints`, `null` for eras without points
pub fn parse_era_points(value: &Value) -> MonitorResult<Option<EraRewardPoints>> {
    if value.is_null() {
        return Ok(None);
    }

    let total = value
        .get("total")
        .ok_or_else(|| MonitorError::malformed("staking.erasRewardPoints", "missing total"))?;
    let total = parse_u32(total, "staking.erasRewardPoints.total")?;

    let individual = match value.get("individual") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(stash, points)| {
                parse_u32(points, "staking.erasRewardPoints.individual")
                    .map(|p| (ValidatorId::from(stash.as_str()), p))
            })
            .collect::<MonitorResult<IndexMap<_, _>>>()?,
        // Older runtimes render the map as a list of pairs
        Some(Value::Array(pairs)) => pairs
            .iter()
            .map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(stash), points]) => {
                    parse_u32(points, "staking.erasRewardPoints.individual")
                        .map(|p| (ValidatorId::from(stash.as_str()), p))
                }
                _ => Err(MonitorError::malformed(
                    "staking.erasRewardPoints.individual",
                    format!("bad entry {pair}"),
                )),
            })
            .collect::<MonitorResult<IndexMap<_, _>>>()?,
        None | Some(Value::Null) => IndexMap::new(),
        Some(other) => {
            return Err(MonitorError::malformed(
                "staking.erasRewardPoints.individual",
                format!("unexpected {other}"),
            ))
        }
    };

    Ok(Some(EraRewardPoints { total, individual }))
}
