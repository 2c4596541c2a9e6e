//! Run reports.

use std::collections::BTreeMap;

use replay_core::Result;
use replay_ingestion::ScanMetrics;
use serde::{Deserialize, Serialize};

use crate::metrics::PerformanceSummary;
use crate::position::PnlSnapshot;
use crate::rollover::{RolloverAction, RolloverEvent};
use crate::signature::Signatures;

/// Outcome of one replay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Tick source that was read.
    pub source: String,
    #[serde(flatten)]
    pub signatures: Signatures,
    pub ticks_read: u64,
    pub bars_emitted: u64,
    pub intents_emitted: u64,
    /// Order-status transitions recorded.
    pub order_events: u64,
    pub wal_records: u64,
    /// Instruments seen, in order.
    pub instruments: Vec<String>,
    pub scan: ScanMetrics,
    /// Present when deterministic fills were enabled.
    pub deterministic: Option<DeterministicReport>,
}

/// Position and P&L results of a deterministic run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterministicReport {
    pub snapshots: BTreeMap<String, PnlSnapshot>,
    pub performance: PerformanceSummary,
    pub rollover_events: Vec<RolloverEvent>,
    pub rollover_actions: Vec<RolloverAction>,
    pub rollover_slippage_total: f64,
    pub violations: Vec<String>,
}

impl ReplayReport {
    /// No invariant violations.
    pub fn is_clean(&self) -> bool {
        self.deterministic
            .as_ref()
            .map_or(true, |d| d.violations.is_empty())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
