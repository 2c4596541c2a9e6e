//! Partitioned tick datasets.
//!
//! A dataset root holds any number of `<stem>.csv` tick files (nested
//! directories allowed), each an independently time-ordered partition. Every
//! partition carries a `<stem>.meta.json` sidecar describing its contents.

use std::fs;
use std::path::{Path, PathBuf};

use replay_core::config::ValidationMode;
use replay_core::{Error, Result, TimestampNs};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::csv_source::read_tick_file;
use crate::source::{PartitionScan, ScanRequest, TickSource};

/// Schema version a sidecar must declare.
pub const SCHEMA_VERSION: &str = "v2";

/// Extension of partition data files.
pub const DATA_EXTENSION: &str = "csv";

/// Metadata sidecar for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    /// Smallest tick timestamp in the partition.
    pub min_ts_ns: TimestampNs,
    /// Largest tick timestamp in the partition.
    pub max_ts_ns: TimestampNs,
    /// Number of data rows.
    pub row_count: u64,
    /// Must be [`SCHEMA_VERSION`].
    pub schema_version: String,
    /// Fingerprint of the upstream source the partition was cut from.
    pub source_fingerprint: String,
}

impl PartitionMetadata {
    /// Check required field semantics.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "schema_version {:?}, expected {SCHEMA_VERSION:?}",
                self.schema_version
            ));
        }
        if self.min_ts_ns > self.max_ts_ns {
            return Err(format!(
                "min_ts_ns {} greater than max_ts_ns {}",
                self.min_ts_ns, self.max_ts_ns
            ));
        }
        if self.source_fingerprint.trim().is_empty() {
            return Err("empty source_fingerprint".to_string());
        }
        Ok(())
    }
}

/// Sidecar path for a data file: `a/b/part.csv` -> `a/b/part.meta.json`.
pub fn sidecar_path(data_file: &Path) -> PathBuf {
    data_file.with_extension("meta.json")
}

/// Load and validate the sidecar of a data file.
pub fn load_metadata(data_file: &Path) -> Result<PartitionMetadata> {
    let path = sidecar_path(data_file);
    let text = fs::read_to_string(&path).map_err(|e| {
        Error::data(format!("{}: cannot read metadata sidecar: {e}", data_file.display()))
    })?;
    let meta: PartitionMetadata = serde_json::from_str(&text).map_err(|e| {
        Error::data(format!("{}: invalid metadata sidecar: {e}", data_file.display()))
    })?;
    meta.validate()
        .map_err(|msg| Error::data(format!("{}: invalid metadata sidecar: {msg}", data_file.display())))?;
    Ok(meta)
}

/// Every data file under `root`, as root-relative paths in lexicographic order.
///
/// Ordering uses `/`-joined path strings so it does not depend on the
/// platform or on directory iteration order.
pub fn list_data_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(DATA_EXTENSION)
            {
                if let Ok(relative) = path.strip_prefix(root) {
                    found.push(relative.to_path_buf());
                }
            }
        }
    }
    found.sort_by_key(|p| relative_key(p));
    Ok(found)
}

/// Canonical `/`-separated form of a relative path.
pub fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory of partitioned tick files.
pub struct PartitionedTickSource {
    root: PathBuf,
    validation: ValidationMode,
    name: String,
}

impl PartitionedTickSource {
    /// Create a source over `root`.
    pub fn new(root: impl Into<PathBuf>, validation: ValidationMode) -> Self {
        let root = root.into();
        let name = format!("partitioned:{}", root.display());
        Self {
            root,
            validation,
            name,
        }
    }

    /// Dataset root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_for(&self, file: &Path) -> Result<Option<PartitionMetadata>> {
        match load_metadata(file) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => match self.validation {
                ValidationMode::Strict => Err(e),
                ValidationMode::Lenient => {
                    warn!(error = %e, "reading partition without valid metadata");
                    Ok(None)
                }
            },
        }
    }
}

impl TickSource for PartitionedTickSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<PartitionScan>> {
        let files = list_data_files(&self.root)?;
        info!(root = %self.root.display(), partitions = files.len(), "scanning dataset");

        let mut scans = Vec::with_capacity(files.len());
        for (partition, relative) in files.iter().enumerate() {
            let file = self.root.join(relative);
            let meta = self.metadata_for(&file)?;

            if let Some(meta) = &meta {
                if !request.overlaps(meta.min_ts_ns, meta.max_ts_ns) {
                    debug!(path = %file.display(), "partition outside date range; pruned");
                    scans.push(PartitionScan {
                        partition,
                        path: Some(file),
                        pruned: true,
                        ..Default::default()
                    });
                    continue;
                }
            }

            let scan = read_tick_file(&file, partition, request)?;
            if let Some(meta) = &meta {
                if request.start_ns.is_none() && request.end_ns.is_none() && !scan.early_stop {
                    let parsed = scan.ticks.len() as u64;
                    if parsed != meta.row_count {
                        debug!(
                            path = %file.display(),
                            expected = meta.row_count,
                            parsed,
                            "row count differs from metadata"
                        );
                    }
                }
            }
            scans.push(scan);
        }
        Ok(scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "InstrumentID,ts_ns,LastPrice,Volume,BidPrice1,BidVolume1,AskPrice1,AskVolume1";

    fn write_partition(dir: &Path, name: &str, rows: &[(&str, i64)], meta: Option<&str>) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for (instrument, ts) in rows {
            writeln!(file, "{instrument},{ts},100,1,99,1,101,1").unwrap();
        }
        if let Some(meta) = meta {
            fs::write(sidecar_path(&path), meta).unwrap();
        }
    }

    fn meta_json(min: i64, max: i64, rows: u64) -> String {
        format!(
            r#"{{"min_ts_ns":{min},"max_ts_ns":{max},"row_count":{rows},"schema_version":"v2","source_fingerprint":"abc"}}"#
        )
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("2024/01/rb.csv")),
            PathBuf::from("2024/01/rb.meta.json")
        );
    }

    #[test]
    fn test_list_data_files_sorted_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "b.csv", &[], None);
        write_partition(dir.path(), "a/z.csv", &[], None);
        write_partition(dir.path(), "a/c.csv", &[], None);
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = list_data_files(dir.path()).unwrap();
        let keys: Vec<String> = files.iter().map(|p| relative_key(p)).collect();
        assert_eq!(keys, vec!["a/c.csv", "a/z.csv", "b.csv"]);
    }

    #[test]
    fn test_strict_rejects_missing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "p0.csv", &[("rb2405", 1)], Some(&meta_json(1, 1, 1)));
        write_partition(dir.path(), "p1.csv", &[("rb2405", 2)], None);

        let source = PartitionedTickSource::new(dir.path(), ValidationMode::Strict);
        let err = source.scan(&ScanRequest::default()).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert!(err.to_string().contains("p1.csv"));

        let lenient = PartitionedTickSource::new(dir.path(), ValidationMode::Lenient);
        let scans = lenient.scan(&ScanRequest::default()).unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[1].ticks.len(), 1);
    }

    #[test]
    fn test_strict_rejects_wrong_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let meta = r#"{"min_ts_ns":1,"max_ts_ns":1,"row_count":1,"schema_version":"v1","source_fingerprint":"abc"}"#;
        write_partition(dir.path(), "p0.csv", &[("rb2405", 1)], Some(meta));
        let source = PartitionedTickSource::new(dir.path(), ValidationMode::Strict);
        let err = source.scan(&ScanRequest::default()).unwrap_err();
        assert!(err.to_string().contains("schema_version"));
    }

    #[test]
    fn test_prunes_partitions_outside_range() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "p0.csv", &[("rb2405", 10)], Some(&meta_json(10, 10, 1)));
        write_partition(dir.path(), "p1.csv", &[("rb2405", 50)], Some(&meta_json(50, 50, 1)));

        let source = PartitionedTickSource::new(dir.path(), ValidationMode::Strict);
        let request = ScanRequest {
            start_ns: Some(40),
            ..Default::default()
        };
        let scans = source.scan(&request).unwrap();
        assert!(scans[0].pruned);
        assert_eq!(scans[0].row_groups_scanned, 0);
        assert!(!scans[1].pruned);
        assert_eq!(scans[1].partition, 1);
        assert_eq!(scans[1].ticks[0].ts_ns, 50);
    }
}
