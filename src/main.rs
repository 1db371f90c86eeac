// ===============================
// src/main.rs
// ===============================
/*
 # mock feed, metrics on :9898, trades to ./data/trades.jsonl
 FEED_MODE=mock METRICS_PORT=9898 RECORD_FILE=data/trades.jsonl cargo run

 # live Finnhub trades
 FEED_MODE=finnhub FINNHUB_TOKEN=... SYMBOL=AAPL cargo run -- --capital 10000

 curl -s localhost:9898/metrics | egrep '^(ledger_|position_qty|trades_total)'
*/
/*
=============================================================================
Project : macross_bot — async dual-SMA crossover paper-trading bot in Rust
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Streams trade prices for one symbol (mock/Finnhub), keeps a
          rolling price window, trades simulated capital on short/long SMA
          crossovers, exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use macross_bot::config::{self, Cli};
use macross_bot::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // ---- Logging ----
    let filter = std::env::var("LOG_FILTER")
        .ok()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Load config ----
    let cli = Cli::parse();
    let cfg = config::load(&cli)?;

    info!(
        symbol = %cfg.symbol,
        capital = %cfg.initial_capital,
        feed_mode = cfg.feed_mode.as_str(),
        short = cfg.short_period,
        long = cfg.long_period,
        window = cfg.window_capacity,
        max_order = cfg.max_order_size,
        tick_ms = cfg.tick_interval.as_millis() as u64,
        warmup_ms = cfg.warmup_delay.as_millis() as u64,
        record_file = ?cfg.record_file,
        metrics_port = ?cfg.metrics_port,
        "startup config"
    );

    let session = Session::start(cfg).await?;

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");

    let last = session.window().latest().map(|s| s.price);
    let ledger = session.ledger().clone();
    let snap = session.shutdown().await?;
    info!(
        capital = %snap.capital.round_dp(2),
        profit = %snap.cumulative_profit.round_dp(2),
        position = ?snap.position,
        equity = %last.map(|px| ledger.equity(px)).unwrap_or(snap.capital).round_dp(2),
        trades = snap.trade_count,
        "final"
    );
    Ok(())
}
