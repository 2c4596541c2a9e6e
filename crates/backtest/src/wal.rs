//! Write-ahead audit log.
//!
//! One JSON object per line, each carrying a contiguous `seq` starting at 1.
//! A recorder without a path is a no-op. Opening the file is fatal on error;
//! a failed append is logged and does not consume a sequence number.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use replay_core::config::RolloverMode;
use replay_core::{Lots, Offset, OrderStatus, Side, TimestampNs};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rollover::RolloverLeg;

/// A state transition worth auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WalEvent {
    /// Order status change.
    Order {
        ts_ns: TimestampNs,
        instrument: String,
        side: Side,
        offset: Offset,
        volume: Lots,
        price: f64,
        status: OrderStatus,
        trace_id: String,
    },
    /// Position change from a strategy fill.
    Trade {
        ts_ns: TimestampNs,
        instrument: String,
        side: Side,
        offset: Offset,
        volume: Lots,
        price: f64,
        net_position: Lots,
        avg_open_price: f64,
        realized_pnl: f64,
        trace_id: String,
    },
    /// One leg of a contract rollover.
    Rollover {
        ts_ns: TimestampNs,
        symbol: String,
        instrument: String,
        leg: RolloverLeg,
        mode: RolloverMode,
        side: Side,
        volume: Lots,
        price: f64,
        slippage_cost: f64,
        realized_pnl: f64,
    },
}

/// A sequenced WAL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub event: WalEvent,
}

/// Appends sequenced records to a JSON-lines file.
#[derive(Debug)]
pub struct WalRecorder {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    next_seq: u64,
}

impl WalRecorder {
    /// A recorder that writes nothing.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            path: None,
            next_seq: 1,
        }
    }

    /// Create (or truncate) the WAL file.
    pub fn open(path: &Path) -> replay_core::Result<Self> {
        let file = File::create(path)
            .map_err(|e| std::io::Error::new(e.kind(), format!("WAL {}: {e}", path.display())))?;
        debug!(path = %path.display(), "WAL opened");
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: Some(path.to_path_buf()),
            next_seq: 1,
        })
    }

    /// Open when a path is configured, otherwise disabled.
    pub fn from_path(path: Option<&Path>) -> replay_core::Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::disabled()),
        }
    }

    /// Whether records are being written.
    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Target file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of records successfully written.
    pub fn records_written(&self) -> u64 {
        self.next_seq - 1
    }

    /// Append an event. Returns its sequence number when written.
    pub fn append(&mut self, event: WalEvent) -> Option<u64> {
        let writer = self.writer.as_mut()?;
        let record = WalRecord {
            seq: self.next_seq,
            event,
        };
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(seq = record.seq, error = %e, "WAL record serialization failed");
                return None;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line) {
            warn!(seq = record.seq, error = %e, "WAL write failed");
            return None;
        }
        self.next_seq += 1;
        Some(record.seq)
    }

    /// Flush buffered records. Failures are logged.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "WAL flush failed");
            }
        }
    }
}

impl Drop for WalRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_event(status: OrderStatus) -> WalEvent {
        WalEvent::Order {
            ts_ns: 1,
            instrument: "rb2405".to_string(),
            side: Side::Buy,
            offset: Offset::Open,
            volume: 1,
            price: 100.0,
            status,
            trace_id: "t".to_string(),
        }
    }

    #[test]
    fn test_disabled_is_noop() {
        let mut wal = WalRecorder::disabled();
        assert!(!wal.is_enabled());
        assert_eq!(wal.append(order_event(OrderStatus::Accepted)), None);
        assert_eq!(wal.records_written(), 0);
    }

    #[test]
    fn test_sequence_is_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.wal");
        let mut wal = WalRecorder::open(&path).unwrap();
        assert_eq!(wal.append(order_event(OrderStatus::Accepted)), Some(1));
        assert_eq!(wal.append(order_event(OrderStatus::Filled)), Some(2));
        assert_eq!(wal.append(order_event(OrderStatus::Rejected)), Some(3));
        drop(wal);

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<WalRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(records[1].event, order_event(OrderStatus::Filled));
    }

    #[test]
    fn test_record_shape() {
        let record = WalRecord {
            seq: 7,
            event: order_event(OrderStatus::Deferred),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["seq"], 7);
        assert_eq!(value["kind"], "order");
        assert_eq!(value["status"], "DEFERRED");
        assert_eq!(value["side"], "buy");
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.wal");
        let err = WalRecorder::open(&path).unwrap_err();
        assert!(matches!(err, replay_core::Error::Io(_)));
    }
}
