//! Engine assembly
//!
//! Wires the three cooperative tasks of one symbol instance:
//! - depth task: WebSocket diffs -> synchronizer -> bucket aggregation ->
//!   signal detector (sole writer of book state)
//! - aggTrade task: trade stream -> trade router (sole writer of trade
//!   windows)
//! - volatility task: periodic kline refresh behind an atomic ratio
//!
//! The depth stream is opened before the REST snapshot so early diffs
//! buffer in the channel and the bridging rule picks the first applicable
//! one. Stopping the engine cancels all tasks at their next suspension
//! point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binance::{FuturesRestClient, SnapshotSource};
use crate::book::synchronizer::{BookObserver, OrderBookSynchronizer, SyncOutcome};
use crate::book::types::BookState;
use crate::book::websocket::DepthStreamClient;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::signal::buckets::aggregate;
use crate::signal::detector::SignalDetector;
use crate::signal::trade_stream::TradeStreamClient;
use crate::signal::trades::TradeRouter;
use crate::signal::types::Signal;
use crate::signal::volatility::VolatilityEstimator;
use crate::supervisor::{StreamLink, Supervisor};

/// Single-symbol pressure engine. Construct, optionally subscribe book
/// observers, then `start()`.
pub struct PressureEngine {
    config: EngineConfig,
    observers: Vec<Box<dyn BookObserver>>,
}

/// Running engine: the signal stream plus health and shutdown controls.
pub struct EngineHandle {
    /// Emitted pressure signals, in order
    pub signals: mpsc::UnboundedReceiver<Signal>,
    paused: Arc<AtomicBool>,
    book_rx: watch::Receiver<BookState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Engine-wide health flag; consumers should treat paused as
    /// "do not trade".
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Latest synchronized book.
    pub fn current_book(&self) -> BookState {
        self.book_rx.borrow().clone()
    }

    /// Cancel all tasks cooperatively and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl PressureEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            observers: Vec::new(),
        }
    }

    /// Register a sink invoked after every successfully applied diff.
    pub fn subscribe(&mut self, observer: Box<dyn BookObserver>) {
        self.observers.push(observer);
    }

    /// Validate configuration and launch against the live futures API.
    pub async fn start(self) -> Result<EngineHandle> {
        let rest = Arc::new(FuturesRestClient::new()?);
        self.start_with_source(rest).await
    }

    /// Launch with a custom REST source (tests, alternate endpoints).
    pub async fn start_with_source(
        mut self,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<EngineHandle> {
        self.config.validate()?;
        let symbol = self.config.symbol.to_uppercase();
        info!(symbol = %symbol, "Starting pressure engine");

        let cancel = CancellationToken::new();
        let link = Arc::new(StreamLink::new());
        let supervisor = Supervisor::new(self.config.staleness_threshold_ms, Arc::clone(&link));
        let paused = supervisor.paused_flag();
        let router = Arc::new(TradeRouter::new(self.config.confirm_window_sec));
        let volatility = Arc::new(VolatilityEstimator::new(
            &symbol,
            self.config.vol_scale,
            self.config.vol_candles,
        ));

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (book_tx, book_rx) = watch::channel(BookState::new(symbol.clone()));

        let mut tasks = Vec::new();

        // Volatility task: first tick fires immediately, so the ratio is
        // usually published before the first diff applies.
        tasks.push(tokio::spawn(Arc::clone(&volatility).run(
            Arc::clone(&source),
            Duration::from_secs(self.config.vol_refresh_sec),
            cancel.child_token(),
        )));

        // aggTrade task: stream client plus router feeder.
        let (trade_tx, mut trade_rx) = mpsc::unbounded_channel();
        let trade_ws = TradeStreamClient::new(&symbol, cancel.child_token());
        tasks.push(tokio::spawn(trade_ws.run(trade_tx)));
        tasks.push(tokio::spawn({
            let router = Arc::clone(&router);
            async move {
                while let Some(event) = trade_rx.recv().await {
                    if let Err(e) = router.record(&event) {
                        warn!(error = %e, "Dropping malformed trade");
                    }
                }
                debug!("Trade feeder stopped");
            }
        }));

        // Depth task: synchronizer, watchdog, aggregation, detection.
        let mut synchronizer = OrderBookSynchronizer::new(&symbol);
        for observer in self.observers.drain(..) {
            synchronizer.subscribe(observer);
        }
        synchronizer.subscribe(Box::new(move |book: &BookState| -> anyhow::Result<()> {
            let _ = book_tx.send(book.clone());
            Ok(())
        }));
        let detector = SignalDetector::new(&self.config, Arc::clone(&router), Arc::clone(&paused));

        tasks.push(tokio::spawn(run_depth_task(DepthTask {
            config: self.config,
            source,
            link,
            supervisor,
            router,
            volatility,
            synchronizer,
            detector,
            signal_tx,
            cancel: cancel.child_token(),
        })));

        Ok(EngineHandle {
            signals: signal_rx,
            paused,
            book_rx,
            cancel,
            tasks,
        })
    }
}

struct DepthTask {
    config: EngineConfig,
    source: Arc<dyn SnapshotSource>,
    link: Arc<StreamLink>,
    supervisor: Supervisor,
    router: Arc<TradeRouter>,
    volatility: Arc<VolatilityEstimator>,
    synchronizer: OrderBookSynchronizer,
    detector: SignalDetector,
    signal_tx: mpsc::UnboundedSender<Signal>,
    cancel: CancellationToken,
}

async fn run_depth_task(mut task: DepthTask) {
    let symbol = task.config.symbol.to_uppercase();

    // Open the stream first: diffs received while the snapshot is in
    // flight buffer in the channel for the bridging rule.
    let (ws, mut diffs) =
        DepthStreamClient::new(&symbol, Arc::clone(&task.link), task.cancel.child_token());
    let ws_task = ws.start();

    // Initial snapshot, retried until it lands or the engine stops.
    loop {
        if task.cancel.is_cancelled() {
            let _ = ws_task.await;
            return;
        }
        match task
            .synchronizer
            .resync(task.source.as_ref(), task.config.depth_limit)
            .await
        {
            Ok(()) => break,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Initial snapshot failed, retrying");
                tokio::select! {
                    _ = task.cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    let poll = Duration::from_millis(task.config.staleness_threshold_ms.max(50));
    let mut baseline_ratio: Option<f64> = None;
    let mut resnapshot_failures = 0u32;

    loop {
        if task.cancel.is_cancelled() {
            break;
        }

        match tokio::time::timeout(poll, diffs.recv()).await {
            Ok(Some(diff)) => match task.synchronizer.handle_diff(&diff) {
                Ok(SyncOutcome::Applied) => {
                    task.supervisor.mark_recovered();
                    resnapshot_failures = 0;
                    process_applied_snapshot(&mut task, &mut baseline_ratio);
                }
                Ok(SyncOutcome::Skipped) => {}
                Ok(SyncOutcome::NeedsResnapshot) => {
                    match task
                        .synchronizer
                        .resync(task.source.as_ref(), task.config.depth_limit)
                        .await
                    {
                        Ok(()) => resnapshot_failures = 0,
                        Err(e) => {
                            resnapshot_failures += 1;
                            warn!(
                                symbol = %symbol,
                                error = %e,
                                failures = resnapshot_failures,
                                "Resnapshot failed"
                            );
                            // Two consecutive failures escalate to a full
                            // transport reconnect.
                            if resnapshot_failures >= 2 {
                                task.supervisor.pause("repeated resnapshot failures");
                                task.link.request_reconnect();
                                task.link.wait_for_streaming().await;
                                resnapshot_failures = 0;
                            }
                        }
                    }
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Dropping malformed diff"),
            },
            Ok(None) => {
                if !task.cancel.is_cancelled() {
                    warn!(symbol = %symbol, "Depth diff channel closed");
                }
                break;
            }
            Err(_) => {} // receive timeout: fall through to the watchdog
        }

        task.supervisor.check(task.synchronizer.last_applied_at()).await;
    }

    let _ = ws_task.await;
    debug!(symbol = %symbol, "Depth task stopped");
}

/// After each applied diff: bucket the ladder, refresh the router keyset,
/// and run the detector. Skipped until a volatility ratio exists.
fn process_applied_snapshot(task: &mut DepthTask, baseline_ratio: &mut Option<f64>) {
    let ratio = task.volatility.current_ratio();
    if ratio <= 0.0 {
        return;
    }
    let baseline = *baseline_ratio.get_or_insert(ratio);

    let book = task.synchronizer.current_snapshot();
    let Some(bucketed) = aggregate(&book, ratio) else {
        return;
    };
    task.router.sync_buckets(&bucketed);

    let window = dynamic_window(&task.config, baseline, ratio);
    for signal in task.detector.on_snapshot(&bucketed, window) {
        if task.signal_tx.send(signal).is_err() {
            debug!("Signal receiver dropped");
            break;
        }
    }
}

/// Window size adapting to volatility: higher volatility than the
/// baseline shrinks the window, making the detector react faster.
fn dynamic_window(config: &EngineConfig, baseline: f64, current: f64) -> usize {
    let scaled = config.window_base as f64 * (baseline / current).powf(config.window_gamma);
    (scaled.round() as usize).clamp(config.window_min, config.window_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;

    #[test]
    fn test_dynamic_window_at_baseline() {
        let config = EngineConfig::new("BTCUSDT");
        assert_eq!(dynamic_window(&config, 0.002, 0.002), 10);
    }

    #[test]
    fn test_dynamic_window_shrinks_with_volatility() {
        let config = EngineConfig::new("BTCUSDT");
        // 4x baseline volatility: 10 * (1/4)^0.8 ~= 3.3, clamped to 4.
        assert_eq!(dynamic_window(&config, 0.002, 0.008), 4);
    }

    #[test]
    fn test_dynamic_window_grows_in_calm_markets() {
        let config = EngineConfig::new("BTCUSDT");
        // Quarter of baseline: 10 * 4^0.8 ~= 30.3.
        assert_eq!(dynamic_window(&config, 0.008, 0.002), 30);
    }

    #[test]
    fn test_dynamic_window_clamps_to_max() {
        let config = EngineConfig::new("BTCUSDT");
        assert_eq!(dynamic_window(&config, 1.0, 1e-6), config.window_max);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let engine = PressureEngine::new(EngineConfig::new(""));
        match engine.start().await {
            Err(FeedError::Config(_)) => {}
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }
}
