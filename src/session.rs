// ===============================
// src/session.rs
// ===============================
//
// One Session per process run: owns the window, the ledger and the spawned
// tasks (feed, trading loop, optional recorder). Nothing here is global;
// shutdown flips a watch channel every task listens on.
//
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, FeedMode};
use crate::domain::{Event, LedgerSnapshot};
use crate::feed::{self, FeedAdapter};
use crate::ledger::PositionLedger;
use crate::metrics::{self, CONFIG_FEED_MODE, CONFIG_SYMBOL};
use crate::recorder;
use crate::signal::SignalEngine;
use crate::trading::{LoopSettings, TradingLoop};
use crate::window::PriceWindow;

/// Resolves once shutdown is requested or the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

pub struct Session {
    cfg: Config,
    window: Arc<PriceWindow>,
    ledger: Arc<PositionLedger>,
    shutdown_tx: watch::Sender<bool>,
    feed: JoinHandle<()>,
    trading: JoinHandle<LedgerSnapshot>,
    recorder: Option<JoinHandle<()>>,
}

impl Session {
    /// Wire everything up and spawn the tasks. Resource failures here
    /// (metrics port, record file, first feed connection) are fatal.
    pub async fn start(cfg: Config) -> anyhow::Result<Self> {
        cfg.validate()?;

        metrics::init();
        CONFIG_FEED_MODE.with_label_values(&[cfg.feed_mode.as_str()]).set(1);
        CONFIG_SYMBOL.with_label_values(&[cfg.symbol.as_str()]).set(1);
        if let Some(port) = cfg.metrics_port {
            metrics::serve_metrics(port).with_context(|| format!("metrics bind on port {port}"))?;
        }

        let engine = SignalEngine::new(cfg.short_period, cfg.long_period)?;
        let window = Arc::new(PriceWindow::new(cfg.window_capacity));
        let ledger = Arc::new(PositionLedger::new(cfg.initial_capital));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // ---- Recorder (optional) ----
        let (events_tx, recorder) = match &cfg.record_file {
            Some(path) => {
                let writer = recorder::open_writer(path)
                    .await
                    .with_context(|| format!("open record file {path}"))?;
                let (tx, rx) = mpsc::channel::<Event>(1024);
                let _ = tx.try_send(Event::Note(format!(
                    "session start symbol={} capital={}",
                    cfg.symbol, cfg.initial_capital
                )));
                (Some(tx), Some(tokio::spawn(recorder::run(rx, writer, path.clone()))))
            }
            None => (None, None),
        };

        // ---- FEED (market data) ----
        let adapter = FeedAdapter::new(window.clone(), cfg.symbol.clone());
        let feed = match cfg.feed_mode {
            FeedMode::Mock => tokio::spawn(feed::run_mock(adapter, cfg.mock_tick, shutdown_rx.clone())),
            FeedMode::Finnhub => {
                let token = cfg.finnhub_token.as_deref().context("FINNHUB_TOKEN missing")?;
                let url = feed::finnhub_url(&cfg.finnhub_ws_url, token)?;
                let ws = feed::connect_finnhub(&url, &cfg.symbol)
                    .await
                    .context("cannot reach finnhub trade stream")?;
                tokio::spawn(feed::run_finnhub(ws, url, adapter, shutdown_rx.clone()))
            }
        };

        // ---- Trading loop ----
        let settings = LoopSettings {
            max_order_size: cfg.max_order_size,
            tick_interval: cfg.tick_interval,
            warmup_delay: cfg.warmup_delay,
        };
        let mut tl = TradingLoop::new(cfg.symbol.clone(), window.clone(), engine, ledger.clone(), settings);
        if let Some(tx) = events_tx {
            tl = tl.with_events(tx);
        }
        let trading = tokio::spawn(tl.run(shutdown_rx));

        info!(symbol = %cfg.symbol, feed = cfg.feed_mode.as_str(), "session started");
        Ok(Self { cfg, window, ledger, shutdown_tx, feed, trading, recorder })
    }

    pub fn config(&self) -> &Config { &self.cfg }
    pub fn window(&self) -> &Arc<PriceWindow> { &self.window }
    pub fn ledger(&self) -> &Arc<PositionLedger> { &self.ledger }

    /// Ask every task to stop without waiting for them.
    pub fn request_stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop all tasks and return the final ledger state.
    pub async fn shutdown(self) -> anyhow::Result<LedgerSnapshot> {
        self.request_stop();
        let snap = self.trading.await.context("trading loop task")?;
        self.feed.await.context("feed task")?;
        // the loop owned the only event sender; once it is gone the recorder drains and exits
        if let Some(rec) = self.recorder {
            rec.await.context("recorder task")?;
        }
        info!(trades = snap.trade_count, "session closed");
        Ok(snap)
    }
}
