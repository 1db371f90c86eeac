// ===============================
// src/signal.rs
// ===============================
//
// Dual SMA crossover (trend-following)
//   Ide: SMA pendek menembus ke atas SMA panjang  -> BullishCross (golden cross)
//        SMA pendek menembus ke bawah SMA panjang -> BearishCross (dead cross)
//
// evaluate() is a pure function of the window snapshot: the "previous" MAs
// are recomputed with the newest sample dropped instead of being carried
// between calls, so the engine holds no state besides its periods.
//
// Warm-up edge: if the snapshot is one sample too short to build a previous
// MA, the current MA stands in for it. With exactly `long` samples that means
// prev_long == long while prev_short is still real.
//
use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::PriceSample;

pub const DEFAULT_SHORT_PERIOD: usize = 5;
pub const DEFAULT_LONG_PERIOD: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("invalid MA periods: short={short} long={long} (need 0 < short < long)")]
    InvalidPeriods { short: usize, long: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    BullishCross,
    BearishCross,
    NoSignal,
}

impl Crossover {
    pub fn as_str(&self) -> &'static str {
        match self {
            Crossover::BullishCross => "bullish_cross",
            Crossover::BearishCross => "bearish_cross",
            Crossover::NoSignal => "no_signal",
        }
    }
}

impl fmt::Display for Crossover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovingAverageSignal {
    pub short_ma: Decimal,
    pub long_ma: Decimal,
    pub prev_short_ma: Decimal,
    pub prev_long_ma: Decimal,
}

impl MovingAverageSignal {
    pub fn crossover(&self) -> Crossover {
        if self.short_ma > self.long_ma && self.prev_short_ma <= self.prev_long_ma {
            Crossover::BullishCross
        } else if self.short_ma < self.long_ma && self.prev_short_ma >= self.prev_long_ma {
            Crossover::BearishCross
        } else {
            Crossover::NoSignal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Not enough history yet. A normal warm-up state, not an error.
    InsufficientData { have: usize, need: usize },
    /// Prices too large to average; treated as no signal.
    OutOfRange,
    Ready(MovingAverageSignal),
}

impl Evaluation {
    pub fn crossover(&self) -> Crossover {
        match self {
            Evaluation::Ready(sig) => sig.crossover(),
            Evaluation::InsufficientData { .. } | Evaluation::OutOfRange => Crossover::NoSignal,
        }
    }

    pub fn signal(&self) -> Option<&MovingAverageSignal> {
        match self {
            Evaluation::Ready(sig) => Some(sig),
            Evaluation::InsufficientData { .. } | Evaluation::OutOfRange => None,
        }
    }
}

/// Simple moving average of the last `period` prices. `None` when there are
/// too few prices or their sum does not fit in a `Decimal`.
pub fn sma(prices: &[PriceSample], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let sum = prices[prices.len() - period..]
        .iter()
        .try_fold(Decimal::ZERO, |acc, s| acc.checked_add(s.price))?;
    sum.checked_div(Decimal::from(period))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEngine {
    short_period: usize,
    long_period: usize,
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self { short_period: DEFAULT_SHORT_PERIOD, long_period: DEFAULT_LONG_PERIOD }
    }
}

impl SignalEngine {
    pub fn new(short_period: usize, long_period: usize) -> Result<Self, SignalError> {
        if short_period == 0 || short_period >= long_period {
            return Err(SignalError::InvalidPeriods { short: short_period, long: long_period });
        }
        Ok(Self { short_period, long_period })
    }

    pub fn short_period(&self) -> usize { self.short_period }
    pub fn long_period(&self) -> usize { self.long_period }

    pub fn evaluate(&self, window: &[PriceSample]) -> Evaluation {
        let have = window.len();
        if have < self.long_period {
            return Evaluation::InsufficientData { have, need: self.long_period };
        }

        // have >= long > short, so None below only means overflow
        let (Some(short_ma), Some(long_ma)) = (sma(window, self.short_period), sma(window, self.long_period))
        else {
            return Evaluation::OutOfRange;
        };

        let previous = &window[..have - 1];
        let prev_short_ma = if have > self.short_period {
            match sma(previous, self.short_period) {
                Some(ma) => ma,
                None => return Evaluation::OutOfRange,
            }
        } else {
            short_ma
        };
        let prev_long_ma = if have > self.long_period {
            match sma(previous, self.long_period) {
                Some(ma) => ma,
                None => return Evaluation::OutOfRange,
            }
        } else {
            long_ma
        };

        Evaluation::Ready(MovingAverageSignal { short_ma, long_ma, prev_short_ma, prev_long_ma })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn series(prices: &[i64]) -> Vec<PriceSample> {
        let ts = Utc::now();
        prices.iter().map(|&p| PriceSample::new(Decimal::from(p), ts)).collect()
    }

    fn flat(n: usize, px: i64) -> Vec<i64> { vec![px; n] }

    #[test]
    fn test_rejects_bad_periods() {
        assert!(SignalEngine::new(0, 20).is_err());
        assert_eq!(
            SignalEngine::new(20, 20),
            Err(SignalError::InvalidPeriods { short: 20, long: 20 })
        );
        assert!(SignalEngine::new(5, 20).is_ok());
    }

    #[test]
    fn test_sma() {
        let s = series(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(sma(&s, 3), Some(Decimal::from(5)));
        assert_eq!(sma(&s, 6), Some(Decimal::new(35, 1)));
        assert_eq!(sma(&s, 7), None);
        assert_eq!(sma(&s, 0), None);
    }

    #[test]
    fn test_insufficient_data_below_long_period() {
        let engine = SignalEngine::default();
        let s = series(&flat(19, 100));
        assert_eq!(engine.evaluate(&s), Evaluation::InsufficientData { have: 19, need: 20 });
        assert_eq!(engine.evaluate(&[]), Evaluation::InsufficientData { have: 0, need: 20 });
        assert_eq!(engine.evaluate(&s).crossover(), Crossover::NoSignal);
    }

    #[test]
    fn test_moving_averages_are_exact_means() {
        let engine = SignalEngine::default();
        let prices: Vec<i64> = (1..=30).collect();
        let ev = engine.evaluate(&series(&prices));
        let sig = ev.signal().copied().unwrap();
        // last 5: 26..=30, last 20: 11..=30
        assert_eq!(sig.short_ma, Decimal::from(28));
        assert_eq!(sig.long_ma, Decimal::new(205, 1));
        // one tick earlier: 25..=29 and 10..=29
        assert_eq!(sig.prev_short_ma, Decimal::from(27));
        assert_eq!(sig.prev_long_ma, Decimal::new(195, 1));
    }

    #[test]
    fn test_prev_long_falls_back_on_first_qualifying_tick() {
        let engine = SignalEngine::default();
        let prices: Vec<i64> = (1..=20).collect();
        let sig = *engine.evaluate(&series(&prices)).signal().unwrap();
        assert_eq!(sig.long_ma, Decimal::new(105, 1));
        assert_eq!(sig.prev_long_ma, sig.long_ma);
        // 21 samples exist for neither; the short one is computed normally
        assert_eq!(sig.prev_short_ma, Decimal::from(17));
    }

    #[test]
    fn test_flat_window_is_no_signal() {
        let engine = SignalEngine::default();
        let s = series(&flat(25, 100));
        assert_eq!(engine.evaluate(&s).crossover(), Crossover::NoSignal);
    }

    #[test]
    fn test_bullish_cross_fires_once() {
        let engine = SignalEngine::default();
        let mut prices = flat(25, 100);
        let mut seen = Vec::new();
        for _ in 0..5 {
            prices.push(110);
            seen.push(engine.evaluate(&series(&prices)).crossover());
        }
        assert_eq!(
            seen,
            vec![
                Crossover::BullishCross,
                Crossover::NoSignal,
                Crossover::NoSignal,
                Crossover::NoSignal,
                Crossover::NoSignal,
            ]
        );
    }

    #[test]
    fn test_bearish_cross_after_rally() {
        let engine = SignalEngine::default();
        let mut prices = flat(20, 100);
        prices.extend(flat(5, 120)); // short well above long
        assert_eq!(engine.evaluate(&series(&prices)).crossover(), Crossover::NoSignal);

        let mut crosses = Vec::new();
        for _ in 0..10 {
            prices.push(80);
            crosses.push(engine.evaluate(&series(&prices)).crossover());
        }
        let bearish = crosses.iter().filter(|c| **c == Crossover::BearishCross).count();
        assert_eq!(bearish, 1);
        assert!(!crosses.contains(&Crossover::BullishCross));
    }

    #[test]
    fn test_touching_lines_then_crossing() {
        // prev_short == prev_long counts as "at or below"
        let sig = MovingAverageSignal {
            short_ma: Decimal::from(101),
            long_ma: Decimal::from(100),
            prev_short_ma: Decimal::from(100),
            prev_long_ma: Decimal::from(100),
        };
        assert_eq!(sig.crossover(), Crossover::BullishCross);

        let sig = MovingAverageSignal { short_ma: Decimal::from(99), ..sig };
        assert_eq!(sig.crossover(), Crossover::BearishCross);

        let sig = MovingAverageSignal { short_ma: Decimal::from(100), ..sig };
        assert_eq!(sig.crossover(), Crossover::NoSignal);
    }

    #[test]
    fn test_sum_overflow_is_not_a_signal() {
        let huge = Decimal::from_i128_with_scale(10_i128.pow(28), 0);
        let s: Vec<PriceSample> = (0..20).map(|_| PriceSample::now(huge)).collect();
        assert_eq!(sma(&s, 20), None);
        assert_eq!(sma(&s, 3), Some(huge));

        let ev = SignalEngine::default().evaluate(&s);
        assert_eq!(ev, Evaluation::OutOfRange);
        assert_eq!(ev.crossover(), Crossover::NoSignal);
        assert!(ev.signal().is_none());
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let engine = SignalEngine::new(3, 7).unwrap();
        let s = series(&[5, 9, 2, 8, 3, 7, 4, 6, 1, 10]);
        let first = engine.evaluate(&s);
        for _ in 0..10 {
            assert_eq!(engine.evaluate(&s), first);
        }
    }
}
