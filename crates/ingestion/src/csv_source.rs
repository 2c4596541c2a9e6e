//! CSV tick files.
//!
//! Expected header:
//! `InstrumentID,ts_ns,LastPrice,Volume,BidPrice1,BidVolume1,AskPrice1,AskVolume1`.
//! Extra columns are ignored. Malformed rows are skipped.

use std::fs::File;
use std::path::{Path, PathBuf};

use replay_core::{Error, Result, Tick};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::source::{normalize_order, PartitionScan, ScanRequest, TickSource};

/// Columns a tick file must carry.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "InstrumentID",
    "ts_ns",
    "LastPrice",
    "Volume",
    "BidPrice1",
    "BidVolume1",
    "AskPrice1",
    "AskVolume1",
];

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "InstrumentID")]
    instrument: String,
    ts_ns: i64,
    #[serde(rename = "LastPrice")]
    last_price: f64,
    #[serde(rename = "Volume")]
    volume: f64,
    #[serde(rename = "BidPrice1")]
    bid_px: f64,
    #[serde(rename = "BidVolume1")]
    bid_sz: f64,
    #[serde(rename = "AskPrice1")]
    ask_px: f64,
    #[serde(rename = "AskVolume1")]
    ask_sz: f64,
}

impl CsvRow {
    fn into_tick(self) -> Option<Tick> {
        let instrument = self.instrument.trim();
        if instrument.is_empty() || !self.last_price.is_finite() || self.last_price <= 0.0 {
            return None;
        }
        let finite = [self.volume, self.bid_px, self.bid_sz, self.ask_px, self.ask_sz]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return None;
        }
        Some(Tick {
            instrument: instrument.to_string(),
            ts_ns: self.ts_ns,
            last_price: self.last_price,
            volume: self.volume,
            bid_px: self.bid_px,
            bid_sz: self.bid_sz,
            ask_px: self.ask_px,
            ask_sz: self.ask_sz,
        })
    }
}

/// Read one tick file as a partition.
pub fn read_tick_file(path: &Path, partition: usize, request: &ScanRequest) -> Result<PartitionScan> {
    let file = File::open(path)
        .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(Error::data(format!(
            "{}: missing columns {}",
            path.display(),
            missing.join(",")
        )));
    }

    let cap = request.max_rows.map(|n| n as usize).unwrap_or(usize::MAX);
    let mut ticks = Vec::new();
    let mut rows_scanned = 0u64;
    let mut skipped = 0u64;
    let mut early_stop = false;

    for record in reader.records() {
        rows_scanned += 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                trace!(path = %path.display(), error = %e, "skipping unreadable row");
                skipped += 1;
                continue;
            }
        };
        let tick = match record.deserialize::<CsvRow>(Some(&headers)) {
            Ok(row) => row.into_tick(),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "skipping malformed row");
                None
            }
        };
        let Some(tick) = tick else {
            skipped += 1;
            continue;
        };
        if request.contains(tick.ts_ns) {
            ticks.push(tick);
        }
    }

    if normalize_order(&mut ticks) {
        debug!(path = %path.display(), "partition was not time-ordered; sorted");
    }
    // Capped after sorting so the earliest ticks survive.
    if ticks.len() > cap {
        ticks.truncate(cap);
        early_stop = true;
    }

    let bytes_read = reader.position().byte();
    debug!(
        path = %path.display(),
        partition,
        rows = rows_scanned,
        ticks = ticks.len(),
        skipped,
        early_stop,
        "scanned tick file"
    );

    Ok(PartitionScan {
        partition,
        path: Some(path.to_path_buf()),
        ticks,
        rows_scanned,
        row_groups_scanned: 1,
        bytes_read,
        early_stop,
        pruned: false,
    })
}

/// A single CSV file treated as one partition.
pub struct CsvTickSource {
    path: PathBuf,
    name: String,
}

impl CsvTickSource {
    /// Create a source for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("csv:{}", path.display());
        Self { path, name }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TickSource for CsvTickSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<PartitionScan>> {
        Ok(vec![read_tick_file(&self.path, 0, request)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "InstrumentID,ts_ns,LastPrice,Volume,BidPrice1,BidVolume1,AskPrice1,AskVolume1";

    fn write_csv(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_rows() {
        let file = write_csv(&[
            "rb2405,1704067200000000000,100,1000,99,5,101,6",
            "rb2405,1704067201000000000,101,1001,100,5,102,6",
        ]);
        let scans = CsvTickSource::new(file.path()).scan(&ScanRequest::default()).unwrap();
        assert_eq!(scans.len(), 1);
        let scan = &scans[0];
        assert_eq!(scan.ticks.len(), 2);
        assert_eq!(scan.rows_scanned, 2);
        assert_eq!(scan.ticks[0].instrument, "rb2405");
        assert!((scan.ticks[1].last_price - 101.0).abs() < 1e-12);
        assert!((scan.ticks[1].ask_sz - 6.0).abs() < 1e-12);
        assert!(scan.bytes_read > 0);
        assert!(!scan.early_stop);
    }

    #[test]
    fn test_skips_malformed_rows() {
        let file = write_csv(&[
            "rb2405,1704067200000000000,100,1000,99,5,101,6",
            "rb2405,not-a-number,100,1000,99,5,101,6",
            "rb2405,1704067202000000000",
            ",1704067203000000000,100,1000,99,5,101,6",
            "rb2405,1704067204000000000,102,1002,101,5,103,6",
        ]);
        let scan = read_tick_file(file.path(), 0, &ScanRequest::default()).unwrap();
        assert_eq!(scan.rows_scanned, 5);
        assert_eq!(scan.ticks.len(), 2);
    }

    #[test]
    fn test_missing_column_is_data_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "InstrumentID,ts_ns,LastPrice").unwrap();
        writeln!(file, "rb2405,1,100").unwrap();
        file.flush().unwrap();
        let err = read_tick_file(file.path(), 0, &ScanRequest::default()).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert!(err.to_string().contains("Volume"));
    }

    #[test]
    fn test_date_window_and_cap() {
        let file = write_csv(&[
            "rb2405,10,100,1000,99,5,101,6",
            "rb2405,20,101,1001,100,5,102,6",
            "rb2405,30,102,1002,101,5,103,6",
            "rb2405,40,103,1003,102,5,104,6",
        ]);
        let request = ScanRequest {
            start_ns: Some(20),
            end_ns: Some(40),
            max_rows: None,
        };
        let scan = read_tick_file(file.path(), 0, &request).unwrap();
        let ts: Vec<i64> = scan.ticks.iter().map(|t| t.ts_ns).collect();
        assert_eq!(ts, vec![20, 30]);

        let request = ScanRequest {
            max_rows: Some(3),
            ..Default::default()
        };
        let scan = read_tick_file(file.path(), 0, &request).unwrap();
        assert_eq!(scan.ticks.len(), 3);
        assert!(scan.early_stop);
    }

    #[test]
    fn test_cap_keeps_earliest_ticks_of_unordered_file() {
        let file = write_csv(&[
            "rb2405,30,102,1002,101,5,103,6",
            "rb2405,40,103,1003,102,5,104,6",
            "rb2405,10,100,1000,99,5,101,6",
            "rb2405,20,101,1001,100,5,102,6",
        ]);
        let request = ScanRequest {
            max_rows: Some(2),
            ..Default::default()
        };
        let scan = read_tick_file(file.path(), 0, &request).unwrap();
        let ts: Vec<i64> = scan.ticks.iter().map(|t| t.ts_ns).collect();
        assert_eq!(ts, vec![10, 20]);
        assert!(scan.early_stop);
        assert_eq!(scan.rows_scanned, 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = CsvTickSource::new("/no/such/ticks.csv")
            .scan(&ScanRequest::default())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("ticks.csv"));
    }
}
