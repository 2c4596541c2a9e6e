//! Backtest performance metrics.
//!
//! Builds a per-bar equity curve of total P&L and summarizes a run.

use std::collections::BTreeMap;

use replay_core::{OrderStatus, TimestampNs};
use serde::{Deserialize, Serialize};

use crate::position::PositionBook;

/// Equity curve point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts_ns: TimestampNs,
    /// Total P&L (realized + unrealized) across instruments.
    pub equity: f64,
    /// Distance below the running peak.
    pub drawdown: f64,
}

/// Running equity curve.
#[derive(Debug, Clone, Default)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
    peak: f64,
    max_drawdown: f64,
}

impl EquityCurve {
    /// Create an empty curve. The peak starts at zero P&L.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point.
    pub fn record(&mut self, ts_ns: TimestampNs, equity: f64) {
        self.peak = self.peak.max(equity);
        let drawdown = self.peak - equity;
        self.max_drawdown = self.max_drawdown.max(drawdown);
        self.points.push(EquityPoint {
            ts_ns,
            equity,
            drawdown,
        });
    }

    /// Largest peak-to-trough decline so far.
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Order-status histogram keyed by status label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    counts: BTreeMap<OrderStatus, u64>,
}

impl StatusCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, status: OrderStatus) {
        *self.counts.entry(status).or_insert(0) += 1;
    }

    pub fn get(&self, status: OrderStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Sum over all statuses.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Histogram with upper-case labels.
    pub fn to_labels(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(status, count)| (status.as_str().to_string(), *count))
            .collect()
    }
}

/// Run-level performance summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Realized + unrealized P&L at the end of the run.
    pub total_pnl: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    /// Maximum drawdown of the per-bar equity curve (absolute).
    pub max_drawdown: f64,
    /// Number of equity curve points.
    pub equity_points: usize,
    /// Order-status histogram.
    pub order_status: BTreeMap<String, u64>,
    /// Strategy fills (rollover legs excluded).
    pub fill_count: u64,
    /// Total rollover slippage cost.
    pub rollover_slippage_total: f64,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Summarize a finished run.
    pub fn calculate(
        positions: &PositionBook,
        curve: &EquityCurve,
        statuses: &StatusCounts,
        rollover_slippage_total: f64,
    ) -> PerformanceSummary {
        let realized_pnl = positions.realized_total();
        let unrealized_pnl = positions.unrealized_total();
        PerformanceSummary {
            total_pnl: realized_pnl + unrealized_pnl,
            realized_pnl,
            unrealized_pnl,
            max_drawdown: curve.max_drawdown(),
            equity_points: curve.len(),
            order_status: statuses.to_labels(),
            fill_count: statuses.get(OrderStatus::Filled),
            rollover_slippage_total,
        }
    }
}
