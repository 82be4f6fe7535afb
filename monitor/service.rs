//! Block-driven service loop
//!
//! A head poller publishes the best block number into a `watch` channel; a
//! single consumer runs one evaluation pass per observed block. The channel
//! only keeps the newest value, so blocks arriving during a slow pass are
//! coalesced and passes never overlap.

use crate::alert::WebhookAlerter;
use crate::config::MonitorConfig;
use crate::error::ServiceResult;
use crate::http;
use crate::metrics::PrometheusSink;
use crate::sidecar::SidecarClient;
use heartbeat_core::{
    AlertTransport, BlockNumber, ChainQuery, HeartbeatMonitor, MetricsSink, MonitorError,
    MonitorResult, NoopAlerts,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The heartbeat monitor service
pub struct Service {
    config: MonitorConfig,
}

impl Service {
    /// Create a service from a validated configuration
    pub fn new(config: MonitorConfig) -> ServiceResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The service configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run until interrupted or until the chain connection is lost
    pub async fn run(self) -> ServiceResult<()> {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
                signal.cancel();
            }
        });

        self.run_until(shutdown).await
    }

    /// Run until `shutdown` fires or the chain connection is lost
    pub async fn run_until(self, shutdown: CancellationToken) -> ServiceResult<()> {
        let config = self.config;
        let chain = SidecarClient::new(&config.node, config.request_timeout())?;

        let info = chain.chain_info().await.map_err(|e| {
            MonitorError::Disconnected(format!("cannot reach {}: {}", chain.base_url(), e))
        })?;
        info!(
            "connected to chain {} using {} v{}",
            info.chain, info.client, info.version
        );

        let params = config.chain_params(&info.chain);
        let watch_list = config.watch_list();
        info!(
            "watching {} validator(s), alert cool-down {} blocks ({} throttle)",
            watch_list.len(),
            params.cooldown_blocks(),
            config.throttle_mode
        );
        let monitor = HeartbeatMonitor::with_throttle_mode(
            chain.clone(),
            params,
            watch_list,
            info,
            config.throttle_mode,
        )?;

        let sink = Arc::new(PrometheusSink::new()?);
        let alerts: Arc<dyn AlertTransport> = match &config.webhook {
            Some(url) => Arc::new(WebhookAlerter::new(url.as_str(), config.request_timeout())?),
            None => {
                info!("no webhook configured, alerting disabled");
                Arc::new(NoopAlerts)
            }
        };

        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let server = tokio::spawn(http::serve(listener, sink.clone(), shutdown.child_token()));

        let (heads_tx, heads_rx) = watch::channel(None);
        let outcome = tokio::select! {
            result = poll_heads(&chain, config.poll_interval(), config.max_head_failures, heads_tx) => result,
            result = run_passes(monitor, heads_rx, sink.as_ref(), alerts.as_ref(), shutdown.clone()) => result,
        };

        shutdown.cancel();
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("metrics server failed: {}", e),
            Err(e) => warn!("metrics server task failed: {}", e),
        }

        if let Err(e) = &outcome {
            error!("{}", e);
        }
        outcome.map_err(Into::into)
    }
}

/// Poll the chain head every `every`, publishing new block numbers.
///
/// Returns [`MonitorError::Disconnected`] after `max_failures` consecutive
/// failed polls; never returns otherwise.
pub async fn poll_heads<C>(
    chain: &C,
    every: Duration,
    max_failures: u32,
    heads: watch::Sender<Option<BlockNumber>>,
) -> MonitorResult<()>
where
    C: ChainQuery + ?Sized,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        ticker.tick().await;
        match chain.latest_block().await {
            Ok(block) => {
                failures = 0;
                heads.send_if_modified(|head| {
                    if *head == Some(block) {
                        false
                    } else {
                        *head = Some(block);
                        true
                    }
                });
            }
            Err(e) => {
                failures += 1;
                warn!("head poll failed ({}/{}): {}", failures, max_failures, e);
                if failures >= max_failures {
                    return Err(MonitorError::Disconnected(format!(
                        "{failures} consecutive head polls failed, last error: {e}"
                    )));
                }
            }
        }
    }
}

/// Run one pass per new head until `shutdown` fires.
///
/// A head that is not above the last evaluated one is skipped. Pass failures
/// are logged and the loop waits for the next head, except fatal ones which
/// are returned.
pub async fn run_passes<C: ChainQuery>(
    mut monitor: HeartbeatMonitor<C>,
    mut heads: watch::Receiver<Option<BlockNumber>>,
    sink: &dyn MetricsSink,
    alerts: &dyn AlertTransport,
    shutdown: CancellationToken,
) -> MonitorResult<()> {
    let mut last: Option<BlockNumber> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            changed = heads.changed() => {
                if changed.is_err() {
                    return Err(MonitorError::Disconnected("head poller stopped".to_string()));
                }
            }
        }

        let Some(block) = *heads.borrow_and_update() else {
            continue;
        };
        if last.is_some_and(|previous| block <= previous) {
            continue;
        }
        last = Some(block);

        match monitor.on_block(block, sink, alerts).await {
            Ok(report) => debug!(
                "block #{}: {} validator(s) checked, {} alert(s)",
                report.block,
                report.outcomes.len(),
                report.alerts_sent()
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("skipping block #{}: {}", block, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use heartbeat_core::{
        AuthIndex, Balance, ChainInfo, ChainParams, EraIndex, EraRewardPoints, HeartbeatStatus,
        SessionIndex, ValidatorId, WatchList,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Chain with scripted heads and an empty validator set
    #[derive(Default)]
    struct StubChain {
        heads: Mutex<VecDeque<MonitorResult<BlockNumber>>>,
        session_error: Option<MonitorError>,
        passes: AtomicUsize,
    }

    impl StubChain {
        fn with_heads(heads: Vec<MonitorResult<BlockNumber>>) -> Self {
            Self {
                heads: Mutex::new(heads.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChainQuery for StubChain {
        async fn chain_info(&self) -> MonitorResult<ChainInfo> {
            Ok(ChainInfo::default())
        }

        async fn latest_block(&self) -> MonitorResult<BlockNumber> {
            self.heads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MonitorError::Chain("script exhausted".to_string())))
        }

        async fn session_index(&self, _at: BlockNumber) -> MonitorResult<SessionIndex> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            match &self.session_error {
                Some(e) => Err(e.clone()),
                None => Ok(1),
            }
        }

        async fn session_progress_estimate(&self, _at: BlockNumber) -> MonitorResult<u64> {
            Ok(600)
        }

        async fn validators(&self, _at: BlockNumber) -> MonitorResult<Vec<ValidatorId>> {
            Ok(Vec::new())
        }

        async fn heartbeat(
            &self,
            _at: BlockNumber,
            _session: SessionIndex,
            _auth_index: AuthIndex,
        ) -> MonitorResult<HeartbeatStatus> {
            Ok(HeartbeatStatus::Received)
        }

        async fn active_era(&self, _at: BlockNumber) -> MonitorResult<Option<EraIndex>> {
            Ok(None)
        }

        async fn era_total_reward(&self, _era: EraIndex) -> MonitorResult<Option<Balance>> {
            Ok(None)
        }

        async fn era_reward_points(&self, _era: EraIndex) -> MonitorResult<Option<EraRewardPoints>> {
            Ok(None)
        }
    }

    fn monitor(chain: Arc<StubChain>) -> HeartbeatMonitor<Arc<StubChain>> {
        HeartbeatMonitor::new(
            chain,
            ChainParams::new(),
            WatchList::new(["alice"]),
            ChainInfo::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_poller_publishes_latest_head() {
        let chain = StubChain::with_heads(vec![
            Ok(5),
            Ok(5),
            Ok(6),
            Err(MonitorError::Chain("timeout".to_string())),
            Err(MonitorError::Chain("timeout".to_string())),
            Err(MonitorError::Chain("timeout".to_string())),
        ]);
        let (tx, rx) = watch::channel(None);

        let result = poll_heads(&chain, Duration::from_millis(1), 3, tx).await;
        assert!(matches!(result, Err(MonitorError::Disconnected(_))));
        assert_eq!(*rx.borrow(), Some(6));
    }

    #[tokio::test]
    async fn test_poller_failure_count_resets() {
        let timeout = || -> MonitorResult<BlockNumber> { Err(MonitorError::Chain("timeout".to_string())) };
        let chain = StubChain::with_heads(vec![
            timeout(),
            timeout(),
            Ok(7),
            timeout(),
            timeout(),
            Ok(8),
        ]);
        let (tx, rx) = watch::channel(None);

        // Script runs out after block 8, then three failures end the poll
        let result = poll_heads(&chain, Duration::from_millis(1), 3, tx).await;
        assert!(result.is_err());
        assert_eq!(*rx.borrow(), Some(8));
        assert!(chain.heads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poller_rides_out_a_refused_connection() {
        let refused = || -> MonitorResult<BlockNumber> {
            Err(MonitorError::Disconnected("connection refused".to_string()))
        };
        let chain = StubChain::with_heads(vec![Ok(3), refused(), refused(), Ok(4)]);
        let (tx, rx) = watch::channel(None);

        let result = poll_heads(&chain, Duration::from_millis(1), 3, tx).await;
        assert!(matches!(result, Err(MonitorError::Disconnected(_))));
        assert_eq!(*rx.borrow(), Some(4));
        assert!(chain.heads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_passes_are_coalesced_and_monotonic() {
        let chain = Arc::new(StubChain::default());
        let sink = PrometheusSink::new().unwrap();
        let (tx, rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let driver = async {
            tx.send(Some(10)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            // Same head again is not re-evaluated
            tx.send(Some(10)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            // Two heads before the consumer runs: only the newest is evaluated
            tx.send(Some(11)).unwrap();
            tx.send(Some(12)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(
            run_passes(monitor(chain.clone()), rx, &sink, &NoopAlerts, shutdown.clone()),
            driver
        );
        assert!(result.is_ok());
        assert_eq!(chain.passes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_pass_failure_keeps_running() {
        let chain = Arc::new(StubChain {
            session_error: Some(MonitorError::Chain("timeout".to_string())),
            ..Default::default()
        });
        let sink = PrometheusSink::new().unwrap();
        let (tx, rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let driver = async {
            tx.send(Some(1)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(Some(2)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(
            run_passes(monitor(chain.clone()), rx, &sink, &NoopAlerts, shutdown.clone()),
            driver
        );
        assert!(result.is_ok());
        assert_eq!(chain.passes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_pass_failure_stops() {
        let chain = Arc::new(StubChain {
            session_error: Some(MonitorError::Disconnected("socket closed".to_string())),
            ..Default::default()
        });
        let sink = PrometheusSink::new().unwrap();
        let (tx, rx) = watch::channel(None);
        tx.send(Some(1)).unwrap();

        let result = run_passes(
            monitor(chain),
            rx,
            &sink,
            &NoopAlerts,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(MonitorError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_poller_gone_is_a_disconnect() {
        let chain = Arc::new(StubChain::default());
        let sink = PrometheusSink::new().unwrap();
        let (tx, rx) = watch::channel(None);
        drop(tx);

        let result = run_passes(monitor(chain), rx, &sink, &NoopAlerts, CancellationToken::new()).await;
        assert!(matches!(result, Err(MonitorError::Disconnected(_))));
    }

    #[test]
    fn test_service_rejects_invalid_config() {
        let config = MonitorConfig::new("http://127.0.0.1:8080", Vec::new());
        assert!(Service::new(config).is_err());
    }
}
