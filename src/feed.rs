// ===============================
// src/feed.rs
// ===============================
//
// Market data side:
// - FeedAdapter   : parses Finnhub-style messages and pushes trade prices
//                   into the PriceWindow. Never fails the pipeline; bad
//                   messages are logged, counted and dropped.
// - run_mock      : random-walk generator emitting Finnhub-shaped messages
// - run_finnhub   : Finnhub trade websocket (subscribe, read, reconnect)
//
// Message shapes:
//   {"type":"trade","data":[{"p":189.84,"s":"AAPL","t":1700000000000,"v":100}]}
//   {"type":"ping"}
//   {"type":"error","msg":"Invalid API key"}
//
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::PriceSample;
use crate::metrics::{FEED_CONNECTED, FEED_ERRORS, FEED_IGNORED, FEED_RECONNECTS, TICKS};
use crate::session::cancelled;
use crate::window::PriceWindow;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("bad feed url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FeedMessage {
    Trade {
        #[serde(default)]
        data: Vec<serde_json::Value>,
    },
    Error {
        #[serde(default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TradeEntry {
    p: serde_json::Number,
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    t: Option<i64>,
}

/// What one raw message turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    Trades { accepted: usize, skipped: usize },
    Ignored,
    FeedError(String),
    Malformed(String),
}

fn parse_price(n: &serde_json::Number) -> Option<Decimal> {
    let s = n.to_string();
    Decimal::from_str(&s).or_else(|_| Decimal::from_scientific(&s)).ok()
}

fn parse_ts(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone)]
pub struct FeedAdapter {
    window: Arc<PriceWindow>,
    symbol: String,
}

impl FeedAdapter {
    pub fn new(window: Arc<PriceWindow>, symbol: impl Into<String>) -> Self {
        Self { window, symbol: symbol.into() }
    }

    pub fn symbol(&self) -> &str { &self.symbol }
    pub fn window(&self) -> &Arc<PriceWindow> { &self.window }

    pub fn push_price(&self, price: Decimal, ts: DateTime<Utc>) {
        self.window.push(PriceSample::new(price, ts));
        TICKS.inc();
    }

    /// Handle one raw text frame from the feed.
    pub fn ingest(&self, raw: &str) -> Ingest {
        let msg = match serde_json::from_str::<FeedMessage>(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "feed: malformed message dropped");
                FEED_ERRORS.with_label_values(&["malformed"]).inc();
                return Ingest::Malformed(e.to_string());
            }
        };

        match msg {
            FeedMessage::Trade { data } => {
                let (mut accepted, mut skipped) = (0, 0);
                for v in data {
                    match self.accept_entry(v) {
                        Some(sample) => {
                            self.push_price(sample.price, sample.timestamp);
                            debug!(symbol = %self.symbol, price = %sample.price, "tick received");
                            accepted += 1;
                        }
                        None => {
                            FEED_IGNORED.inc();
                            skipped += 1;
                        }
                    }
                }
                Ingest::Trades { accepted, skipped }
            }
            FeedMessage::Error { msg } => {
                error!(%msg, "feed error event");
                FEED_ERRORS.with_label_values(&["remote"]).inc();
                Ingest::FeedError(msg)
            }
            FeedMessage::Other => {
                FEED_IGNORED.inc();
                Ingest::Ignored
            }
        }
    }

    fn accept_entry(&self, v: serde_json::Value) -> Option<PriceSample> {
        let entry: TradeEntry = match serde_json::from_value(v) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "feed: bad trade entry skipped");
                return None;
            }
        };
        if let Some(s) = &entry.s {
            if !s.eq_ignore_ascii_case(&self.symbol) {
                return None;
            }
        }
        let price = parse_price(&entry.p).filter(|p| *p > Decimal::ZERO)?;
        if price > self.price_ceiling() {
            warn!(symbol = %self.symbol, %price, "feed: price out of range, skipped");
            FEED_ERRORS.with_label_values(&["out_of_range"]).inc();
            return None;
        }
        Some(PriceSample::new(price, parse_ts(entry.t)))
    }

    /// Largest price for which a full window still sums inside `Decimal`.
    /// One extra slot of headroom absorbs rounding in the division.
    fn price_ceiling(&self) -> Decimal {
        Decimal::MAX / Decimal::from(self.window.capacity() + 1)
    }
}

/// Generator market data mock (random walk), emits Finnhub-shaped trade messages.
pub async fn run_mock(adapter: FeedAdapter, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut px = Decimal::new(100_00, 2); // 100.00
    let floor = Decimal::new(50_00, 2);
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(symbol = %adapter.symbol(), every_ms = every.as_millis() as u64, "mock feed started");
    loop {
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            _ = tick.tick() => {
                // jangan simpan ThreadRng melewati .await
                let step = rand::thread_rng().gen_range(-25..=25);
                px = (px + Decimal::new(step, 2)).max(floor);
                let msg = serde_json::json!({
                    "type": "trade",
                    "data": [{
                        "p": px.to_string().parse::<f64>().unwrap_or(100.0),
                        "s": adapter.symbol(),
                        "t": Utc::now().timestamp_millis(),
                        "v": 1,
                    }],
                });
                adapter.ingest(&msg.to_string());
            }
        }
    }
    info!("mock feed stopped");
}

pub fn finnhub_url(base: &str, token: &str) -> Result<Url, FeedError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Connect and subscribe. Errors here are returned, the caller decides if fatal.
pub async fn connect_finnhub(url: &Url, symbol: &str) -> Result<WsStream, FeedError> {
    // jangan log token
    info!(host = url.host_str().unwrap_or("?"), %symbol, "connecting finnhub trade stream");
    let (mut ws, _resp) = connect_async(url.as_str()).await?;
    let sub = serde_json::json!({ "type": "subscribe", "symbol": symbol });
    ws.send(Message::Text(sub.to_string())).await?;
    FEED_CONNECTED.set(1);
    info!(%symbol, "subscribed");
    Ok(ws)
}

/// Exponential backoff + jitter for the n-th retry (from 0): 0.5s, 1s, 2s ...
/// capped at 32s, plus up to 250ms.
pub fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.min(6);
    let base_ms = 500u64.saturating_mul(1u64 << shift);
    let jitter = rand::thread_rng().gen_range(0..=250);
    Duration::from_millis(base_ms + jitter)
}

/// Read trade frames until shutdown; reconnect on disconnect.
pub async fn run_finnhub(
    mut ws: WsStream,
    url: Url,
    adapter: FeedAdapter,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        loop {
            tokio::select! {
                _ = cancelled(&mut shutdown) => {
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "close handshake failed");
                    }
                    FEED_CONNECTED.set(0);
                    info!("finnhub feed closed");
                    return;
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(txt))) => {
                        adapter.ingest(&txt);
                    }
                    Some(Ok(Message::Close(cf))) => {
                        warn!(?cf, "server closed stream");
                        break;
                    }
                    Some(Ok(_)) => {
                        // ignore ping/pong/binary frames
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "ws read error");
                        FEED_ERRORS.with_label_values(&["transport"]).inc();
                        break;
                    }
                    None => break,
                }
            }
        }
        FEED_CONNECTED.set(0);
        info!("trade stream disconnected, will reconnect…");

        // reconnect sampai berhasil atau shutdown
        loop {
            let wait = backoff_delay(attempt);
            attempt = attempt.saturating_add(1);
            FEED_RECONNECTS.inc();
            tokio::select! {
                _ = cancelled(&mut shutdown) => return,
                _ = sleep(wait) => {}
            }
            match connect_finnhub(&url, adapter.symbol()).await {
                Ok(next) => {
                    ws = next;
                    attempt = 0;
                    break;
                }
                Err(e) => {
                    error!(error = %e, attempt, "reconnect failed");
                    FEED_ERRORS.with_label_values(&["connect"]).inc();
                }
            }
        }
    }
}
