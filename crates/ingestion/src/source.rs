//! Tick source boundary.
//!
//! A source yields one internally time-ordered tick sequence per partition,
//! together with the scan counters the report surfaces.

use std::path::PathBuf;

use replay_core::{Result, Tick, TimestampNs};
use serde::{Deserialize, Serialize};

/// Parameters of a partition scan.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Inclusive lower timestamp bound.
    pub start_ns: Option<TimestampNs>,
    /// Exclusive upper timestamp bound.
    pub end_ns: Option<TimestampNs>,
    /// Maximum ticks any single partition needs to return.
    pub max_rows: Option<u64>,
}

impl ScanRequest {
    /// Whether a timestamp falls inside the requested window.
    #[inline]
    pub fn contains(&self, ts_ns: TimestampNs) -> bool {
        self.start_ns.map_or(true, |s| ts_ns >= s) && self.end_ns.map_or(true, |e| ts_ns < e)
    }

    /// Whether a `[min, max]` partition range can contain requested ticks.
    pub fn overlaps(&self, min_ts: TimestampNs, max_ts: TimestampNs) -> bool {
        self.start_ns.map_or(true, |s| max_ts >= s) && self.end_ns.map_or(true, |e| min_ts < e)
    }
}

/// Result of scanning one partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionScan {
    /// Partition index (position in the source's deterministic ordering).
    pub partition: usize,
    /// Origin of the partition, if file backed.
    pub path: Option<PathBuf>,
    /// Ticks ordered by `(ts_ns, instrument)`.
    pub ticks: Vec<Tick>,
    /// Raw rows read, including skipped ones.
    pub rows_scanned: u64,
    /// Row groups (file chunks) actually read.
    pub row_groups_scanned: u64,
    /// Bytes consumed from storage.
    pub bytes_read: u64,
    /// Scan stopped before the partition was exhausted.
    pub early_stop: bool,
    /// Skipped entirely because its metadata range missed the request.
    pub pruned: bool,
}

/// Aggregated scan counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub partitions_scanned: u64,
    pub partitions_pruned: u64,
    pub rows_scanned: u64,
    pub row_groups_scanned: u64,
    pub bytes_read: u64,
    pub early_stop: bool,
}

impl ScanMetrics {
    /// Sum counters over partition scans.
    pub fn from_scans(scans: &[PartitionScan]) -> Self {
        let mut metrics = Self::default();
        for scan in scans {
            if scan.pruned {
                metrics.partitions_pruned += 1;
            } else {
                metrics.partitions_scanned += 1;
            }
            metrics.rows_scanned += scan.rows_scanned;
            metrics.row_groups_scanned += scan.row_groups_scanned;
            metrics.bytes_read += scan.bytes_read;
            metrics.early_stop |= scan.early_stop;
        }
        metrics
    }
}

/// A provider of partitioned tick data.
pub trait TickSource {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Scan every partition, in partition-index order.
    fn scan(&self, request: &ScanRequest) -> Result<Vec<PartitionScan>>;
}

/// Tick source over pre-built partitions.
pub struct MemoryTickSource {
    partitions: Vec<Vec<Tick>>,
}

impl MemoryTickSource {
    /// Create a source; each inner vector is one partition.
    pub fn new(partitions: Vec<Vec<Tick>>) -> Self {
        Self { partitions }
    }
}

impl TickSource for MemoryTickSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<PartitionScan>> {
        let cap = request.max_rows.map(|n| n as usize).unwrap_or(usize::MAX);
        let scans = self
            .partitions
            .iter()
            .enumerate()
            .map(|(partition, ticks)| {
                let mut selected: Vec<Tick> =
                    ticks.iter().filter(|t| request.contains(t.ts_ns)).cloned().collect();
                normalize_order(&mut selected);
                let early_stop = selected.len() > cap;
                selected.truncate(cap);
                PartitionScan {
                    partition,
                    path: None,
                    rows_scanned: ticks.len() as u64,
                    row_groups_scanned: 1,
                    bytes_read: 0,
                    early_stop,
                    pruned: false,
                    ticks: selected,
                }
            })
            .collect();
        Ok(scans)
    }
}

/// Ensure a partition is ordered by `(ts_ns, instrument)`, stable otherwise.
///
/// Returns true if reordering was needed.
pub fn normalize_order(ticks: &mut [Tick]) -> bool {
    let ordered = ticks
        .windows(2)
        .all(|w| (w[0].ts_ns, &w[0].instrument) <= (w[1].ts_ns, &w[1].instrument));
    if !ordered {
        ticks.sort_by(|a, b| (a.ts_ns, &a.instrument).cmp(&(b.ts_ns, &b.instrument)));
    }
    !ordered
}
