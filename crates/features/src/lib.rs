//! Feature computation for the replay engine.
//!
//! This crate handles:
//! - Rolling log-return statistics (volatility, trend strength)
//! - Per-bar market-state snapshots and regime classification

pub mod detector;
pub mod volatility;

pub use detector::{MarketStateDetector, RegimeDetector};
pub use volatility::RollingReturns;
