// ===============================
// src/trading.rs
// ===============================
//
// Periodic decision loop: snapshot window -> evaluate SMAs -> act on ledger.
//
//   WarmingUp  : window shorter than the long period, nothing happens
//   Evaluating : every tick, BullishCross + flat  -> buy
//                            BearishCross + long  -> sell everything
//   Stopped    : shutdown observed (at most one tick late), summary emitted
//
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{Event, LedgerSnapshot, Trade};
use crate::ledger::{LedgerError, PositionLedger};
use crate::metrics::{EVALUATIONS, TRADES_REJECTED};
use crate::session::cancelled;
use crate::signal::{Crossover, Evaluation, SignalEngine};
use crate::window::PriceWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    WarmingUp,
    Evaluating,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_order_size: u64,
    pub tick_interval: Duration,
    pub warmup_delay: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_order_size: 10,
            tick_interval: Duration::from_secs(1),
            warmup_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    WarmingUp { have: usize, need: usize },
    NoSignal,
    Bought(Trade),
    Sold(Trade),
    /// A cross fired but there was nothing sensible to do.
    Skipped(&'static str),
    Rejected(LedgerError),
}

/// `min(max_order_size, floor(capital / price))`, 0 when nothing is affordable.
pub fn order_quantity(capital: Decimal, price: Decimal, max_order_size: u64) -> u64 {
    if price <= Decimal::ZERO || capital <= Decimal::ZERO {
        return 0;
    }
    let affordable = (capital / price).floor().to_u64().unwrap_or(u64::MAX);
    affordable.min(max_order_size)
}

pub struct TradingLoop {
    symbol: String,
    window: Arc<PriceWindow>,
    engine: SignalEngine,
    ledger: Arc<PositionLedger>,
    settings: LoopSettings,
    state: LoopState,
    events: Option<mpsc::Sender<Event>>,
}

impl TradingLoop {
    pub fn new(
        symbol: impl Into<String>,
        window: Arc<PriceWindow>,
        engine: SignalEngine,
        ledger: Arc<PositionLedger>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            window,
            engine,
            ledger,
            settings,
            state: LoopState::WarmingUp,
            events: None,
        }
    }

    /// Forward trades and the final summary to the recorder.
    pub fn with_events(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn state(&self) -> LoopState { self.state }
    pub fn ledger(&self) -> &Arc<PositionLedger> { &self.ledger }

    fn emit(&self, ev: Event) {
        if let Some(tx) = &self.events {
            // recorder lambat -> drop, jangan blok loop
            if let Err(e) = tx.try_send(ev) {
                debug!(error = %e, "event not recorded");
            }
        }
    }

    /// One evaluation cycle.
    pub fn tick(&mut self) -> TickOutcome {
        let snap = self.window.snapshot();
        let sig = match self.engine.evaluate(&snap) {
            Evaluation::InsufficientData { have, need } => {
                self.state = LoopState::WarmingUp;
                EVALUATIONS.with_label_values(&["insufficient_data"]).inc();
                info!(symbol = %self.symbol, have, need, "not enough data yet");
                return TickOutcome::WarmingUp { have, need };
            }
            Evaluation::OutOfRange => {
                self.state = LoopState::Evaluating;
                EVALUATIONS.with_label_values(&["out_of_range"]).inc();
                warn!(symbol = %self.symbol, "window prices too large to average, skipping tick");
                return TickOutcome::NoSignal;
            }
            Evaluation::Ready(sig) => sig,
        };
        self.state = LoopState::Evaluating;

        let cross = sig.crossover();
        EVALUATIONS.with_label_values(&[cross.as_str()]).inc();
        info!(
            symbol = %self.symbol,
            short_ma = %sig.short_ma.round_dp(4),
            long_ma = %sig.long_ma.round_dp(4),
            prev_short_ma = %sig.prev_short_ma.round_dp(4),
            prev_long_ma = %sig.prev_long_ma.round_dp(4),
            %cross,
            "moving averages"
        );

        // evaluate() returned Ready, so the snapshot is non-empty
        let price = match snap.last() {
            Some(s) => s.price,
            None => return TickOutcome::NoSignal,
        };

        match cross {
            Crossover::NoSignal => TickOutcome::NoSignal,
            Crossover::BullishCross => self.enter(price),
            Crossover::BearishCross => self.exit(price),
        }
    }

    fn enter(&mut self, price: Decimal) -> TickOutcome {
        if self.ledger.has_position() {
            debug!(symbol = %self.symbol, "bullish cross while already long");
            return TickOutcome::Skipped("already holding a position");
        }
        let qty = order_quantity(self.ledger.capital(), price, self.settings.max_order_size);
        if qty == 0 {
            info!(symbol = %self.symbol, %price, "bullish cross but capital buys no shares");
            return TickOutcome::Skipped("capital below one share");
        }
        match self.ledger.buy(price, qty) {
            Ok(trade) => {
                info!(
                    symbol = %self.symbol, qty, %price,
                    capital = %trade.capital_after.round_dp(2),
                    "trade: bought"
                );
                self.emit(Event::Trade { symbol: self.symbol.clone(), trade: trade.clone() });
                TickOutcome::Bought(trade)
            }
            Err(e) => self.rejected(e),
        }
    }

    fn exit(&mut self, price: Decimal) -> TickOutcome {
        let Some(pos) = self.ledger.position() else {
            debug!(symbol = %self.symbol, "bearish cross with no position");
            return TickOutcome::Skipped("no open position");
        };
        match self.ledger.sell(price, pos.quantity) {
            Ok(trade) => {
                let profit = (price - pos.average_buy_price) * Decimal::from(pos.quantity);
                info!(
                    symbol = %self.symbol, qty = pos.quantity, %price,
                    profit = %profit.round_dp(2),
                    capital = %trade.capital_after.round_dp(2),
                    "trade: sold"
                );
                self.emit(Event::Trade { symbol: self.symbol.clone(), trade: trade.clone() });
                TickOutcome::Sold(trade)
            }
            Err(e) => self.rejected(e),
        }
    }

    fn rejected(&self, e: LedgerError) -> TickOutcome {
        warn!(symbol = %self.symbol, error = %e, "trade failed");
        TRADES_REJECTED.with_label_values(&[e.reason()]).inc();
        TickOutcome::Rejected(e)
    }

    /// Drive the loop until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LedgerSnapshot {
        let start = self.ledger.snapshot();
        info!(
            symbol = %self.symbol,
            capital = %start.capital.round_dp(2),
            warmup_ms = self.settings.warmup_delay.as_millis() as u64,
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            "trading loop started"
        );

        tokio::select! {
            _ = cancelled(&mut shutdown) => return self.stop(),
            _ = sleep(self.settings.warmup_delay) => {}
        }

        let mut tick = interval(self.settings.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = tick.tick() => { self.tick(); }
            }
        }
        self.stop()
    }

    fn stop(&mut self) -> LedgerSnapshot {
        self.state = LoopState::Stopped;
        let snap = self.ledger.snapshot();
        let mark = self.window.latest().map(|s| s.price);
        info!(
            symbol = %self.symbol,
            capital = %snap.capital.round_dp(2),
            profit = %snap.cumulative_profit.round_dp(2),
            position = ?snap.position,
            unrealized = %mark.map(|m| self.ledger.unrealized_profit(m)).unwrap_or_default().round_dp(2),
            trades = snap.trade_count,
            "stopped"
        );
        self.emit(Event::Summary { symbol: self.symbol.clone(), ts: Utc::now(), ledger: snap.clone() });
        snap
    }
}
