// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : macross_bot — async dual-SMA crossover paper-trading bot in Rust
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Streams trade prices for one symbol (mock/Finnhub), keeps a
          rolling price window, trades simulated capital on short/long SMA
          crossovers, exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
use std::env;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::signal::{DEFAULT_LONG_PERIOD, DEFAULT_SHORT_PERIOD};
use crate::window::DEFAULT_CAPACITY;

pub const DEFAULT_SYMBOL: &str = "AAPL";
pub const DEFAULT_FINNHUB_WS_URL: &str = "wss://ws.finnhub.io";

/// Sumber market data
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Finnhub,
}

impl FeedMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(FeedMode::Mock),
            "finnhub" | "live" => Some(FeedMode::Finnhub),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock => "mock",
            FeedMode::Finnhub => "finnhub",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Parse { key: &'static str, value: String },
    #[error("initial capital must be positive, got {0}")]
    Capital(Decimal),
    #[error("short period must be > 0 and < long period (short={short}, long={long})")]
    Periods { short: usize, long: usize },
    #[error("window capacity {capacity} is smaller than long period {long}")]
    Capacity { capacity: usize, long: usize },
    #[error("max order size must be > 0")]
    MaxOrderSize,
    #[error("{0} must be non-zero")]
    ZeroInterval(&'static str),
    #[error("FINNHUB_TOKEN is required when FEED_MODE=finnhub")]
    MissingToken,
    #[error("symbol must not be empty")]
    EmptySymbol,
}

/// CLI overrides; anything not given here comes from env / `.env`.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "macross_bot", version, about = "Dual SMA crossover paper-trading bot")]
pub struct Cli {
    /// Symbol to track (env SYMBOL)
    #[arg(long)]
    pub symbol: Option<String>,
    /// Initial simulated capital (env INITIAL_CAPITAL)
    #[arg(long)]
    pub capital: Option<String>,
    /// mock | finnhub (env FEED_MODE)
    #[arg(long)]
    pub feed: Option<String>,
    /// Append JSONL events here (env RECORD_FILE)
    #[arg(long)]
    pub record_file: Option<String>,
    /// Serve Prometheus metrics on this port (env METRICS_PORT)
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct Config {
    // instrument & money
    pub symbol: String,
    pub initial_capital: Decimal,

    // strategy
    pub short_period: usize,
    pub long_period: usize,
    pub window_capacity: usize,
    pub max_order_size: u64,

    // loop timing
    pub tick_interval: Duration,
    pub warmup_delay: Duration,

    // feed
    pub feed_mode: FeedMode,
    pub finnhub_ws_url: String,
    pub finnhub_token: Option<String>,
    pub mock_tick: Duration,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            initial_capital: Decimal::from(10_000),
            short_period: DEFAULT_SHORT_PERIOD,
            long_period: DEFAULT_LONG_PERIOD,
            window_capacity: DEFAULT_CAPACITY,
            max_order_size: 10,
            tick_interval: Duration::from_secs(1),
            warmup_delay: Duration::from_secs(5),
            feed_mode: FeedMode::Mock,
            finnhub_ws_url: DEFAULT_FINNHUB_WS_URL.to_string(),
            finnhub_token: None,
            mock_tick: Duration::from_millis(200),
            record_file: None,
            metrics_port: None,
        }
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Parse { key, value: v }),
        _ => Ok(default),
    }
}

fn parse_capital(key: &'static str, v: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(v.trim()).map_err(|_| ConfigError::Parse { key, value: v.to_string() })
}

impl Config {
    /// Build from an arbitrary key lookup (env in production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();

        let symbol = get("SYMBOL")
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or(d.symbol);
        let initial_capital = match get("INITIAL_CAPITAL") {
            Some(v) if !v.trim().is_empty() => parse_capital("INITIAL_CAPITAL", &v)?,
            _ => d.initial_capital,
        };
        let feed_mode = match get("FEED_MODE") {
            Some(v) => FeedMode::parse(&v).ok_or(ConfigError::Parse { key: "FEED_MODE", value: v })?,
            None => d.feed_mode,
        };

        let tick_ms = parse_or(&get, "TICK_INTERVAL_MS", d.tick_interval.as_millis() as u64)?;
        let warmup_ms = parse_or(&get, "WARMUP_DELAY_MS", d.warmup_delay.as_millis() as u64)?;
        let mock_ms = parse_or(&get, "MOCK_TICK_MS", d.mock_tick.as_millis() as u64)?;

        let metrics_port = match get("METRICS_PORT") {
            Some(v) if !v.trim().is_empty() => Some(
                v.trim()
                    .parse()
                    .map_err(|_| ConfigError::Parse { key: "METRICS_PORT", value: v })?,
            ),
            _ => None,
        };

        Ok(Self {
            symbol,
            initial_capital,
            short_period: parse_or(&get, "SHORT_PERIOD", d.short_period)?,
            long_period: parse_or(&get, "LONG_PERIOD", d.long_period)?,
            window_capacity: parse_or(&get, "WINDOW_CAPACITY", d.window_capacity)?,
            max_order_size: parse_or(&get, "MAX_ORDER_SIZE", d.max_order_size)?,
            tick_interval: Duration::from_millis(tick_ms),
            warmup_delay: Duration::from_millis(warmup_ms),
            feed_mode,
            finnhub_ws_url: get("FINNHUB_WS_URL").unwrap_or(d.finnhub_ws_url),
            finnhub_token: get("FINNHUB_TOKEN").filter(|t| !t.trim().is_empty()),
            mock_tick: Duration::from_millis(mock_ms),
            record_file: get("RECORD_FILE").filter(|p| !p.trim().is_empty()),
            metrics_port,
        })
    }

    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, ConfigError> {
        if let Some(s) = &cli.symbol {
            self.symbol = s.trim().to_ascii_uppercase();
        }
        if let Some(c) = &cli.capital {
            self.initial_capital = parse_capital("--capital", c)?;
        }
        if let Some(f) = &cli.feed {
            self.feed_mode = FeedMode::parse(f).ok_or(ConfigError::Parse { key: "--feed", value: f.clone() })?;
        }
        if cli.record_file.is_some() {
            self.record_file = cli.record_file.clone();
        }
        if cli.metrics_port.is_some() {
            self.metrics_port = cli.metrics_port;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::Capital(self.initial_capital));
        }
        if self.short_period == 0 || self.short_period >= self.long_period {
            return Err(ConfigError::Periods { short: self.short_period, long: self.long_period });
        }
        if self.window_capacity < self.long_period {
            return Err(ConfigError::Capacity { capacity: self.window_capacity, long: self.long_period });
        }
        if self.max_order_size == 0 {
            return Err(ConfigError::MaxOrderSize);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("TICK_INTERVAL_MS"));
        }
        if self.feed_mode == FeedMode::Mock && self.mock_tick.is_zero() {
            return Err(ConfigError::ZeroInterval("MOCK_TICK_MS"));
        }
        if self.feed_mode == FeedMode::Finnhub && self.finnhub_token.is_none() {
            return Err(ConfigError::MissingToken);
        }
        Ok(())
    }
}

/// Read `.env` + process env, apply CLI overrides, validate.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    // Pastikan .env dibaca (agar SYMBOL, FINNHUB_TOKEN, dll ter-load)
    let _ = dotenv();

    let cfg = Config::from_lookup(|k| env::var(k).ok())?.apply_cli(cli)?;
    cfg.validate()?;
    Ok(cfg)
}
