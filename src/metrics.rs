// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "trade prices pushed into the window").unwrap());

pub static FEED_IGNORED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("feed_ignored_total", "feed messages or entries ignored (non-trade, other symbol)")
        .unwrap()
});

pub static FEED_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("feed_errors_total", "feed errors (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

pub static FEED_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("feed_connected", "1 if the websocket feed is connected, 0 otherwise").unwrap()
});

pub static FEED_RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("feed_reconnects_total", "websocket reconnect attempts").unwrap());

pub static WINDOW_LEN: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("window_len", "samples currently in the price window").unwrap());

// -------- Signals / trading --------
pub static EVALUATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "evaluations_total",
            "trading loop evaluations (label: result = insufficient_data|no_signal|bullish_cross|bearish_cross)",
        ),
        &["result"],
    )
    .unwrap()
});

pub static TRADES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("trades_total", "simulated trades (label: action)"), &["action"])
        .unwrap()
});

pub static TRADES_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trades_rejected_total", "ledger rejections (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

// -------- Ledger --------
pub static LEDGER_CAPITAL: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("ledger_capital", "available simulated capital").unwrap());

pub static LEDGER_REALIZED_PROFIT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("ledger_realized_profit", "cumulative realized profit").unwrap());

pub static POSITION_QTY: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("position_qty", "open position quantity").unwrap());

// ---- Config visibility ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "tracked symbol (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry (re-registration errors are ignored)
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(FEED_IGNORED.clone())),
        REGISTRY.register(Box::new(FEED_ERRORS.clone())),
        REGISTRY.register(Box::new(FEED_CONNECTED.clone())),
        REGISTRY.register(Box::new(FEED_RECONNECTS.clone())),
        REGISTRY.register(Box::new(WINDOW_LEN.clone())),
        REGISTRY.register(Box::new(EVALUATIONS.clone())),
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(TRADES_REJECTED.clone())),
        REGISTRY.register(Box::new(LEDGER_CAPITAL.clone())),
        REGISTRY.register(Box::new(LEDGER_REALIZED_PROFIT.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        let _ = m;
    }
}

/// Scrape body for the bot's registry. An empty registry still yields a
/// non-empty body so scrapers don't treat the target as broken.
pub fn encode_metrics() -> Vec<u8> {
    let mut body = Vec::new();
    if TextEncoder::new().encode(&REGISTRY.gather(), &mut body).is_err() || body.is_empty() {
        body.clear();
        body.extend_from_slice(b"# macross_bot: nothing recorded yet\n");
    }
    body
}

// Path of "GET /metrics HTTP/1.1" style request lines.
fn request_path(head: &[u8]) -> Option<&str> {
    let line = std::str::from_utf8(head).ok()?.lines().next()?;
    line.split_whitespace().nth(1)
}

// One request per connection; only / and /metrics are served.
fn handle_client(mut stream: TcpStream) {
    let mut head = [0u8; 1024];
    let n = stream.read(&mut head).unwrap_or(0);

    let (status, body) = match request_path(&head[..n]) {
        Some("/") | Some("/metrics") | None => ("200 OK", encode_metrics()),
        Some(_) => ("404 Not Found", b"not found\n".to_vec()),
    };
    let reply = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    if let Err(e) = stream.write_all(reply.as_bytes()).and_then(|_| stream.write_all(&body)) {
        tracing::debug!(error = %e, "metrics: client went away");
    }
}

/// Bind the metrics port, then answer scrapes from a dedicated OS thread
/// (keeps the Tokio runtime clean). Bind failure is returned to the caller.
pub fn serve_metrics(port: u16) -> std::io::Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    let bound = listener.local_addr()?.port();
    tracing::info!(port = bound, "metrics listening on /metrics");

    thread::spawn(move || {
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(error = %e, "metrics accept error"),
            }
        }
    });
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        init();
        TICKS.inc();
        let body = String::from_utf8(encode_metrics()).unwrap();
        assert!(body.contains("ticks_total"));
        assert!(body.contains("ledger_capital"));
    }

    #[test]
    fn test_serve_metrics_over_tcp() {
        init();
        let port = serve_metrics(0).unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"GET /metrics HTTP/1.1\r\n\r\n").unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).unwrap();
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
        assert!(resp.contains("window_len"));
    }

    #[test]
    fn test_unknown_path_is_404() {
        init();
        let port = serve_metrics(0).unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"GET /orders HTTP/1.1\r\n\r\n").unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).unwrap();
        assert!(resp.starts_with("HTTP/1.1 404 Not Found"));
        assert!(!resp.contains("window_len"));
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path(b"GET /metrics HTTP/1.1\r\nHost: x\r\n"), Some("/metrics"));
        assert_eq!(request_path(b""), None);
    }
}
