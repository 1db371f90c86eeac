// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }

impl Side {
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One observed trade price. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample { pub price: Decimal, pub timestamp: DateTime<Utc> }

impl PriceSample {
    pub fn new(price: Decimal, timestamp: DateTime<Utc>) -> Self { Self { price, timestamp } }
    pub fn now(price: Decimal) -> Self { Self::new(price, Utc::now()) }
}

/// Open holding of the tracked instrument. Never exists with quantity 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position { pub quantity: u64, pub average_buy_price: Decimal }

impl Position {
    pub fn cost_basis(&self) -> Decimal { self.average_buy_price.saturating_mul(Decimal::from(self.quantity)) }
}

/// Append-only trade log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub action: Side,
    pub price: Decimal,
    pub shares: u64,
    pub capital_after: Decimal,
    pub cumulative_profit_after: Decimal,
}

/// Consistent read of the ledger, taken under the ledger lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub capital: Decimal,
    pub position: Option<Position>,
    pub cumulative_profit: Decimal,
    pub trade_count: usize,
}

impl LedgerSnapshot {
    pub fn has_position(&self) -> bool { self.position.is_some() }
}

/// Records handed to the recorder (JSONL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Trade { symbol: String, trade: Trade },
    Summary { symbol: String, ts: DateTime<Utc>, ledger: LedgerSnapshot },
    Note(String),
}
