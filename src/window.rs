// ===============================
// src/window.rs
// ===============================
//
// Rolling price window shared by the feed task (push) and the trading loop
// (snapshot). One mutex guards the whole buffer, so a snapshot never sees
// an append without its matching eviction.
//
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::domain::PriceSample;
use crate::metrics::WINDOW_LEN;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct PriceWindow {
    buf: Mutex<VecDeque<PriceSample>>,
    cap: usize,
}

impl Default for PriceWindow {
    fn default() -> Self { Self::new(DEFAULT_CAPACITY) }
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self { buf: Mutex::new(VecDeque::with_capacity(cap + 1)), cap }
    }

    // Every critical section leaves the deque valid, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<PriceSample>> {
        self.buf.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a sample, dropping the oldest ones while over capacity.
    pub fn push(&self, sample: PriceSample) {
        let mut buf = self.lock();
        buf.push_back(sample);
        while buf.len() > self.cap {
            buf.pop_front();
        }
        WINDOW_LEN.set(buf.len() as i64);
    }

    /// Owned copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<PriceSample> {
        self.lock().iter().copied().collect()
    }

    pub fn latest(&self) -> Option<PriceSample> { self.lock().back().copied() }
    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }
    pub fn capacity(&self) -> usize { self.cap }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use std::thread;

    fn sample(px: i64) -> PriceSample { PriceSample::now(Decimal::from(px)) }

    fn prices(w: &PriceWindow) -> Vec<i64> {
        w.snapshot().iter().map(|s| s.price.to_i64().unwrap()).collect()
    }

    #[test]
    fn test_push_keeps_arrival_order() {
        let w = PriceWindow::new(10);
        for px in [3, 1, 2] { w.push(sample(px)); }
        assert_eq!(prices(&w), vec![3, 1, 2]);
        assert_eq!(w.latest().map(|s| s.price), Some(Decimal::from(2)));
    }

    #[test]
    fn test_evicts_oldest_over_capacity() {
        let w = PriceWindow::new(5);
        for px in 0..12 { w.push(sample(px)); }
        assert_eq!(w.len(), 5);
        assert_eq!(prices(&w), vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let w = PriceWindow::new(3);
        for px in 0..20 {
            w.push(sample(px));
            assert!(w.len() <= 3);
            let expected: Vec<i64> = ((px - 2).max(0)..=px).collect();
            assert_eq!(prices(&w), expected);
        }
    }

    #[test]
    fn test_default_capacity_and_zero_clamp() {
        assert_eq!(PriceWindow::default().capacity(), 50);
        let w = PriceWindow::new(0);
        assert_eq!(w.capacity(), 1);
        w.push(sample(1));
        w.push(sample(2));
        assert_eq!(prices(&w), vec![2]);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let w = PriceWindow::new(4);
        w.push(sample(1));
        let snap = w.snapshot();
        w.push(sample(2));
        assert_eq!(snap.len(), 1);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn test_concurrent_push_and_snapshot() {
        let w = Arc::new(PriceWindow::new(50));
        let writer = {
            let w = w.clone();
            thread::spawn(move || {
                for px in 0..5_000 { w.push(sample(px)); }
            })
        };

        for _ in 0..500 {
            let snap = w.snapshot();
            assert!(snap.len() <= 50);
            // contiguous run of increasing prices, nothing half-evicted
            for pair in snap.windows(2) {
                assert_eq!(pair[1].price - pair[0].price, Decimal::ONE);
            }
        }
        writer.join().unwrap();

        assert_eq!(w.len(), 50);
        assert_eq!(prices(&w).first(), Some(&4_950));
    }
}
