// ===============================
// src/ledger.rs (capital, position & realized PnL)
// ===============================
//
// The ledger is the only writer of capital / position / profit. Every
// operation validates first and mutates second, inside one lock scope, so a
// failed buy/sell leaves the state untouched and readers never observe a
// half-applied trade.
//
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{LedgerSnapshot, Position, Side, Trade};
use crate::metrics::{LEDGER_CAPITAL, LEDGER_REALIZED_PROFIT, POSITION_QTY, TRADES};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),
    #[error("insufficient capital: need {required}, have {available}")]
    InsufficientCapital { required: Decimal, available: Decimal },
    #[error("insufficient position: requested {requested}, held {held}")]
    InsufficientPosition { requested: u64, held: u64 },
    #[error("amount out of range: {0}")]
    Overflow(&'static str),
}

impl LedgerError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            LedgerError::InvalidQuantity => "invalid_quantity",
            LedgerError::InvalidPrice(_) => "invalid_price",
            LedgerError::InsufficientCapital { .. } => "insufficient_capital",
            LedgerError::InsufficientPosition { .. } => "insufficient_position",
            LedgerError::Overflow(_) => "overflow",
        }
    }
}

#[derive(Debug)]
struct LedgerState {
    capital: Decimal,
    position: Option<Position>,
    cumulative_profit: Decimal,
    trades: Vec<Trade>,
}

#[derive(Debug)]
pub struct PositionLedger {
    state: Mutex<LedgerState>,
}

impl PositionLedger {
    pub fn new(initial_capital: Decimal) -> Self {
        publish(initial_capital, Decimal::ZERO, None);
        Self {
            state: Mutex::new(LedgerState {
                capital: initial_capital,
                position: None,
                cumulative_profit: Decimal::ZERO,
                trades: Vec::new(),
            }),
        }
    }

    // Mutations happen only after all checks pass, so poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn buy(&self, price: Decimal, quantity: u64) -> Result<Trade, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice(price));
        }

        let mut st = self.lock();
        let cost = price
            .checked_mul(Decimal::from(quantity))
            .ok_or(LedgerError::Overflow("order cost"))?;
        if st.capital < cost {
            return Err(LedgerError::InsufficientCapital { required: cost, available: st.capital });
        }

        let next = match st.position {
            Some(cur) => {
                // arah sama -> update avg cost
                let total_qty = cur.quantity.checked_add(quantity).ok_or(LedgerError::Overflow("position size"))?;
                let avg = cur
                    .average_buy_price
                    .checked_mul(Decimal::from(cur.quantity))
                    .and_then(|basis| basis.checked_add(cost))
                    .and_then(|basis| basis.checked_div(Decimal::from(total_qty)))
                    .ok_or(LedgerError::Overflow("cost basis"))?;
                Position { quantity: total_qty, average_buy_price: avg }
            }
            None => Position { quantity, average_buy_price: price },
        };

        st.capital -= cost;
        st.position = Some(next);

        let trade = record(&mut st, Side::Buy, price, quantity);
        publish(st.capital, st.cumulative_profit, st.position.as_ref());
        Ok(trade)
    }

    pub fn sell(&self, price: Decimal, quantity: u64) -> Result<Trade, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice(price));
        }

        let mut st = self.lock();
        let pos = match st.position {
            Some(p) if p.quantity >= quantity => p,
            Some(p) => return Err(LedgerError::InsufficientPosition { requested: quantity, held: p.quantity }),
            None => return Err(LedgerError::InsufficientPosition { requested: quantity, held: 0 }),
        };

        let qty = Decimal::from(quantity);
        let proceeds = price.checked_mul(qty).ok_or(LedgerError::Overflow("sale proceeds"))?;
        let realized = price
            .checked_sub(pos.average_buy_price)
            .and_then(|diff| diff.checked_mul(qty))
            .ok_or(LedgerError::Overflow("realized profit"))?;
        let capital = st.capital.checked_add(proceeds).ok_or(LedgerError::Overflow("capital"))?;
        let profit = st
            .cumulative_profit
            .checked_add(realized)
            .ok_or(LedgerError::Overflow("cumulative profit"))?;

        st.capital = capital;
        st.cumulative_profit = profit;

        let remaining = pos.quantity - quantity;
        st.position = if remaining == 0 {
            None
        } else {
            Some(Position { quantity: remaining, ..pos })
        };

        let trade = record(&mut st, Side::Sell, price, quantity);
        publish(st.capital, st.cumulative_profit, st.position.as_ref());
        tracing::debug!(%realized, remaining, "realized");
        Ok(trade)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let st = self.lock();
        LedgerSnapshot {
            capital: st.capital,
            position: st.position,
            cumulative_profit: st.cumulative_profit,
            trade_count: st.trades.len(),
        }
    }

    /// Full ordered trade log, for the persistence side.
    pub fn trades(&self) -> Vec<Trade> { self.lock().trades.clone() }

    pub fn capital(&self) -> Decimal { self.lock().capital }
    pub fn position(&self) -> Option<Position> { self.lock().position }
    pub fn has_position(&self) -> bool { self.lock().position.is_some() }

    /// Mark-to-market PnL of the open position.
    pub fn unrealized_profit(&self, mark: Decimal) -> Decimal {
        self.lock()
            .position
            .map(|p| (mark - p.average_buy_price).saturating_mul(Decimal::from(p.quantity)))
            .unwrap_or(Decimal::ZERO)
    }

    /// Capital plus the open position valued at `mark`.
    pub fn equity(&self, mark: Decimal) -> Decimal {
        let st = self.lock();
        let held = st.position.map(|p| mark.saturating_mul(Decimal::from(p.quantity)));
        st.capital.saturating_add(held.unwrap_or(Decimal::ZERO))
    }
}

fn record(st: &mut LedgerState, action: Side, price: Decimal, shares: u64) -> Trade {
    let trade = Trade {
        timestamp: Utc::now(),
        action,
        price,
        shares,
        capital_after: st.capital,
        cumulative_profit_after: st.cumulative_profit,
    };
    st.trades.push(trade.clone());
    TRADES.with_label_values(&[action.as_str()]).inc();
    trade
}

fn publish(capital: Decimal, profit: Decimal, pos: Option<&Position>) {
    LEDGER_CAPITAL.set(capital.to_f64().unwrap_or(0.0));
    LEDGER_REALIZED_PROFIT.set(profit.to_f64().unwrap_or(0.0));
    POSITION_QTY.set(pos.map(|p| p.quantity as i64).unwrap_or(0));
}
