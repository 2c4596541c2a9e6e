//! Reproducibility signatures.
//!
//! 64-bit FNV-1a digests rendered as 16 lowercase hex digits. The input
//! signature covers the configuration, the data signature covers the tick
//! data a run reads.

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use replay_core::{Config, Error, Result};
use replay_ingestion::{list_data_files, PartitionScan};
use serde::{Deserialize, Serialize};

/// FNV-1a offset basis.
pub const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
/// FNV-1a prime.
pub const FNV_PRIME: u64 = 0x100000001b3;

/// Incremental 64-bit FNV-1a.
#[derive(Debug, Clone, Copy)]
pub struct Fnv64 {
    state: u64,
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl Fnv64 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest rendered as 16 lowercase hex digits.
    pub fn hex(&self) -> String {
        to_hex(self.state)
    }
}

impl Hasher for Fnv64 {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.state
    }
}

/// Render a digest as 16 lowercase hex digits.
pub fn to_hex(digest: u64) -> String {
    format!("{digest:016x}")
}

/// Signatures attached to every report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signatures {
    pub input_signature: String,
    pub data_signature: String,
}

impl Signatures {
    /// Compute both signatures for a file-backed configuration.
    pub fn compute(config: &Config) -> Result<Self> {
        Ok(Self {
            input_signature: input_signature(config)?,
            data_signature: data_signature(config)?,
        })
    }
}

/// FNV-1a over the canonical JSON form of the configuration.
///
/// Struct fields serialize in declaration order and JSON objects in key
/// order, so equal configurations always hash equally.
pub fn input_signature(config: &Config) -> Result<String> {
    let canonical = serde_json::to_vec(config)?;
    let mut hasher = Fnv64::new();
    hasher.write(&canonical);
    Ok(hasher.hex())
}

/// Signature of the configured data source.
///
/// CSV mode digests the file content. Partitioned mode folds the relative
/// path, size and modification time of every data file in path order.
pub fn data_signature(config: &Config) -> Result<String> {
    match (&config.data.csv_path, &config.data.dataset_root) {
        (Some(path), _) => Ok(to_hex(file_digest(path)?)),
        (None, Some(root)) => Ok(to_hex(dataset_fingerprint(root)?)),
        (None, None) => Err(Error::config("no data source configured")),
    }
}

/// FNV-1a of a file's bytes.
pub fn file_digest(path: &Path) -> Result<u64> {
    let file = File::open(path)
        .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Fnv64::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Fold `(relative path, size, mtime ns)` of every data file under `root`.
pub fn dataset_fingerprint(root: &Path) -> Result<u64> {
    let mut hasher = Fnv64::new();
    for relative in list_data_files(root)? {
        let meta = std::fs::metadata(root.join(&relative))?;
        let mtime_ns: i128 = match meta.modified()?.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i128,
            Err(e) => -(e.duration().as_nanos() as i128),
        };
        hasher.write(replay_ingestion::partition::relative_key(&relative).as_bytes());
        hasher.write(&[0]);
        hasher.write(&meta.len().to_le_bytes());
        hasher.write(&mtime_ns.to_le_bytes());
    }
    Ok(hasher.finish())
}

/// Fold the content of already scanned partitions.
///
/// Used for sources that are not backed by configured files.
pub fn scan_fingerprint(scans: &[PartitionScan]) -> u64 {
    let mut hasher = Fnv64::new();
    for scan in scans {
        hasher.write(&(scan.partition as u64).to_le_bytes());
        for tick in &scan.ticks {
            hasher.write(tick.instrument.as_bytes());
            hasher.write(&[0]);
            hasher.write(&tick.ts_ns.to_le_bytes());
            for value in [
                tick.last_price,
                tick.volume,
                tick.bid_px,
                tick.bid_sz,
                tick.ask_px,
                tick.ask_sz,
            ] {
                hasher.write(&value.to_bits().to_le_bytes());
            }
        }
    }
    hasher.finish()
}
