//! Position tracking for the replay engine.
//!
//! Net-position accounting per instrument: weighted average open price,
//! realized PnL on reductions, reversal through flat.

use std::collections::BTreeMap;

use replay_core::{Lots, Side};
use serde::{Deserialize, Serialize};

/// Position in one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    /// Signed net position (positive = long).
    pub net_position: Lots,
    /// Volume-weighted average open price (0 when flat).
    pub avg_open_price: f64,
    /// Cumulative realized P&L.
    pub realized_pnl: f64,
}

impl PositionState {
    /// Whether there is no open position.
    #[inline]
    pub fn is_flat(&self) -> bool {
        self.net_position == 0
    }

    /// Apply a fill. Returns the P&L realized by this fill.
    ///
    /// Same-direction (or from flat) fills blend the average price. Opposite
    /// fills first close against the average price; any remainder opens a new
    /// position at `fill_price`. `volume <= 0` is a no-op.
    pub fn apply_trade(&mut self, side: Side, volume: Lots, fill_price: f64) -> f64 {
        if volume <= 0 {
            return 0.0;
        }
        let sign = side.sign();

        if self.net_position == 0 || self.net_position.signum() == sign {
            let old_abs = self.net_position.abs() as f64;
            let new_position = self.net_position + sign * volume;
            let new_abs = new_position.abs() as f64;
            self.avg_open_price = (self.avg_open_price * old_abs + fill_price * volume as f64) / new_abs;
            self.net_position = new_position;
            return 0.0;
        }

        let closing = volume.min(self.net_position.abs());
        let pnl = if self.net_position > 0 {
            (fill_price - self.avg_open_price) * closing as f64
        } else {
            (self.avg_open_price - fill_price) * closing as f64
        };
        self.realized_pnl += pnl;
        self.net_position += sign * closing;

        let remaining = volume - closing;
        if self.net_position == 0 {
            self.avg_open_price = 0.0;
        }
        if remaining > 0 {
            self.net_position = sign * remaining;
            self.avg_open_price = fill_price;
        }
        pnl
    }

    /// Unrealized P&L at a mark price.
    #[inline]
    pub fn unrealized(&self, mark_price: f64) -> f64 {
        compute_unrealized(self.net_position, self.avg_open_price, mark_price)
    }

    /// Snapshot at a mark price.
    pub fn snapshot(&self, mark_price: f64) -> PnlSnapshot {
        let unrealized_pnl = self.unrealized(mark_price);
        PnlSnapshot {
            net_position: self.net_position,
            avg_open_price: self.avg_open_price,
            realized_pnl: self.realized_pnl,
            unrealized_pnl,
            mark_price,
            total_pnl: self.realized_pnl + unrealized_pnl,
        }
    }
}

/// Unrealized P&L of `position` lots opened at `avg_price`, marked at `mark_price`.
#[inline]
pub fn compute_unrealized(position: Lots, avg_price: f64, mark_price: f64) -> f64 {
    if position > 0 {
        (mark_price - avg_price) * position as f64
    } else if position < 0 {
        (avg_price - mark_price) * position.unsigned_abs() as f64
    } else {
        0.0
    }
}

/// Per-instrument P&L snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlSnapshot {
    pub net_position: Lots,
    pub avg_open_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub mark_price: f64,
    pub total_pnl: f64,
}

/// Positions and mark prices of one run, keyed by instrument.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: BTreeMap<String, PositionState>,
    marks: BTreeMap<String, f64>,
}

impl PositionBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Position in an instrument, if it ever traded.
    pub fn get(&self, instrument: &str) -> Option<&PositionState> {
        self.positions.get(instrument)
    }

    /// Mutable position, created flat on first use.
    pub fn entry(&mut self, instrument: &str) -> &mut PositionState {
        self.positions.entry(instrument.to_string()).or_default()
    }

    /// Net position (0 if never traded).
    pub fn net_position(&self, instrument: &str) -> Lots {
        self.positions.get(instrument).map_or(0, |p| p.net_position)
    }

    /// Record the latest trade price of an instrument.
    pub fn update_mark(&mut self, instrument: &str, price: f64) {
        match self.marks.get_mut(instrument) {
            Some(mark) => *mark = price,
            None => {
                self.marks.insert(instrument.to_string(), price);
            }
        }
    }

    /// Latest trade price of an instrument.
    pub fn mark(&self, instrument: &str) -> Option<f64> {
        self.marks.get(instrument).copied()
    }

    fn mark_or_avg(&self, instrument: &str, position: &PositionState) -> f64 {
        self.mark(instrument).unwrap_or(position.avg_open_price)
    }

    /// Sum of realized P&L.
    pub fn realized_total(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Sum of unrealized P&L at current marks.
    pub fn unrealized_total(&self) -> f64 {
        self.positions
            .iter()
            .map(|(instrument, p)| p.unrealized(self.mark_or_avg(instrument, p)))
            .sum()
    }

    /// Realized plus unrealized.
    pub fn total_pnl(&self) -> f64 {
        self.realized_total() + self.unrealized_total()
    }

    /// Snapshots of every instrument that has a position record.
    pub fn snapshots(&self) -> BTreeMap<String, PnlSnapshot> {
        self.positions
            .iter()
            .map(|(instrument, p)| (instrument.clone(), p.snapshot(self.mark_or_avg(instrument, p))))
            .collect()
    }
}
