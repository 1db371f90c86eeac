// ===============================
// src/lib.rs
// ===============================
pub mod config;
pub mod domain;
pub mod feed;
pub mod ledger;
pub mod metrics;
pub mod recorder;
pub mod session;
pub mod signal;
pub mod trading;
pub mod window;

pub use config::Config;
pub use domain::{LedgerSnapshot, Position, PriceSample, Side, Trade};
pub use ledger::{LedgerError, PositionLedger};
pub use session::Session;
pub use signal::{Crossover, Evaluation, MovingAverageSignal, SignalEngine};
pub use trading::{LoopState, TickOutcome, TradingLoop};
pub use window::PriceWindow;
