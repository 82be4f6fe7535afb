//! Prometheus gauges
//!
//! All gauges live in a registry owned by [`PrometheusSink`] rather than the
//! process-wide default one, so several sinks can coexist in one process.

use crate::error::ServiceResult;
use heartbeat_core::{ChainInfo, EraIndex, MetricsSink, RewardPoints, ValidatorId, WindowKind};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

const VALIDATOR_LABELS: &[&str] = &["validator", "chain", "client", "version"];
const CHAIN_LABELS: &[&str] = &["chain", "client", "version"];

/// [`MetricsSink`] exporting Prometheus gauges
pub struct PrometheusSink {
    registry: Registry,
    heartbeat_failure: GaugeVec,
    reward_points: GaugeVec,
    era_index: GaugeVec,
    last_era_reward: GaugeVec,
    recent_window_reward: GaugeVec,
    long_window_reward: GaugeVec,
}

impl PrometheusSink {
    /// Create the gauges and register them, plus process metrics where supported
    pub fn new() -> ServiceResult<Self> {
        let registry = Registry::new();

        let heartbeat_failure = gauge(
            &registry,
            "heartbeat_failure",
            "1 when the validator has not sent an im-online heartbeat this session",
            VALIDATOR_LABELS,
        )?;
        let reward_points = gauge(
            &registry,
            "reward_points",
            "Reward points earned by the validator in the active era",
            VALIDATOR_LABELS,
        )?;
        let era_index = gauge(&registry, "era_index", "Active era index", CHAIN_LABELS)?;
        let last_era_reward = gauge(
            &registry,
            "last_era_reward",
            "Watched validators' reward for the last completed era",
            CHAIN_LABELS,
        )?;
        let recent_window_reward = gauge(
            &registry,
            "recent_window_reward",
            "Watched validators' reward over the short trailing era window",
            CHAIN_LABELS,
        )?;
        let long_window_reward = gauge(
            &registry,
            "long_window_reward",
            "Watched validators' reward over the long trailing era window",
            CHAIN_LABELS,
        )?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            heartbeat_failure,
            reward_points,
            era_index,
            last_era_reward,
            recent_window_reward,
            long_window_reward,
        })
    }

    /// The registry backing this sink
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the text exposition format
    pub fn encode(&self) -> ServiceResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn window_gauge(&self, window: WindowKind) -> &GaugeVec {
        match window {
            WindowKind::LastEra => &self.last_era_reward,
            WindowKind::Recent => &self.recent_window_reward,
            WindowKind::Long => &self.long_window_reward,
        }
    }
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> ServiceResult<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn validator_labels<'a>(info: &'a ChainInfo, validator: &'a ValidatorId) -> [&'a str; 4] {
    [
        validator.as_str(),
        info.chain.as_str(),
        info.client.as_str(),
        info.version.as_str(),
    ]
}

fn chain_labels(info: &ChainInfo) -> [&str; 3] {
    [info.chain.as_str(), info.client.as_str(), info.version.as_str()]
}

impl MetricsSink for PrometheusSink {
    fn set_heartbeat_failure(&self, info: &ChainInfo, validator: &ValidatorId, failing: bool) {
        let value = if failing { 1.0 } else { 0.0 };
        self.heartbeat_failure
            .with_label_values(&validator_labels(info, validator))
            .set(value);
    }

    fn set_reward_points(&self, info: &ChainInfo, validator: &ValidatorId, points: RewardPoints) {
        self.reward_points
            .with_label_values(&validator_labels(info, validator))
            .set(f64::from(points));
    }

    fn set_era_index(&self, info: &ChainInfo, era: EraIndex) {
        self.era_index
            .with_label_values(&chain_labels(info))
            .set(f64::from(era));
    }

    fn set_window_reward(&self, info: &ChainInfo, window: WindowKind, reward: f64) {
        self.window_gauge(window)
            .with_label_values(&chain_labels(info))
            .set(reward);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ChainInfo {
        ChainInfo {
            chain: "Kusama".to_string(),
            client: "parity-polkadot".to_string(),
            version: "1.5.0".to_string(),
        }
    }

    #[test]
    fn test_heartbeat_gauge_last_write_wins() {
        let sink = PrometheusSink::new().unwrap();
        let alice = ValidatorId::from("alice");

        sink.set_heartbeat_failure(&info(), &alice, true);
        let gauge = sink
            .heartbeat_failure
            .with_label_values(&validator_labels(&info(), &alice));
        assert_eq!(gauge.get(), 1.0);

        sink.set_heartbeat_failure(&info(), &alice, false);
        assert_eq!(gauge.get(), 0.0);
    }

    #[test]
    fn test_window_gauges_are_separate() {
        let sink = PrometheusSink::new().unwrap();
        sink.set_window_reward(&info(), WindowKind::LastEra, 12.5);
        sink.set_window_reward(&info(), WindowKind::Long, 900.0);

        let info = info();
        let labels = chain_labels(&info);
        assert_eq!(sink.last_era_reward.with_label_values(&labels).get(), 12.5);
        assert_eq!(sink.long_window_reward.with_label_values(&labels).get(), 900.0);
        assert_eq!(sink.recent_window_reward.with_label_values(&labels).get(), 0.0);
    }

    #[test]
    fn test_encode() {
        let sink = PrometheusSink::new().unwrap();
        sink.set_reward_points(&info(), &"alice".into(), 3320);
        sink.set_era_index(&info(), 6120);

        let text = sink.encode().unwrap();
        assert!(text.contains("# TYPE reward_points gauge"));
        assert!(text.contains("validator=\"alice\""));
        assert!(text.contains("chain=\"Kusama\""));
        assert!(text.contains("} 3320"));
        assert!(text.contains("} 6120"));
    }

    #[test]
    fn test_sinks_do_not_share_registries() {
        let first = PrometheusSink::new().unwrap();
        let second = PrometheusSink::new().unwrap();
        first.set_era_index(&info(), 1);
        assert!(!second.encode().unwrap().contains("era_index{"));
    }
}
