//! Deterministic backtesting for the tick replay engine.
//!
//! This crate provides:
//! - Position tracking and P&L calculation
//! - Bar-close fills and rollover leg pricing
//! - Futures contract rollover (strict and carry)
//! - Write-ahead audit log
//! - Invariant checks, performance metrics and reproducibility signatures
//! - The strategy boundary and the replay engine

pub mod execution;
pub mod fill_model;
pub mod invariants;
pub mod metrics;
pub mod position;
pub mod report;
pub mod rollover;
pub mod signature;
pub mod simulator;
pub mod strategy;
pub mod wal;

pub use fill_model::{Fill, FillModel};
pub use metrics::PerformanceSummary;
pub use position::{compute_unrealized, PnlSnapshot, PositionBook, PositionState};
pub use report::{DeterministicReport, ReplayReport};
pub use rollover::{RolloverAction, RolloverEvent, RolloverManager};
pub use signature::Signatures;
pub use simulator::ReplayEngine;
pub use strategy::{Strategy, StrategyCapabilities, StrategyHandle, StrategyRegistry};
pub use wal::WalRecorder;
