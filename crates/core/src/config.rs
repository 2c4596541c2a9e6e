//! Configuration structures for a replay run.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{TimestampNs, DEFAULT_BUCKET_WIDTH_NS};

/// Main configuration for a replay run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tick data location and scan limits.
    pub data: DataConfig,
    /// Bar aggregation configuration.
    pub bars: BarConfig,
    /// Market-state detector configuration.
    pub detector: DetectorConfig,
    /// Contract rollover configuration.
    pub rollover: RolloverConfig,
    /// Simulation configuration.
    pub backtest: BacktestConfig,
}

impl Config {
    /// Parse a configuration from JSON text.
    ///
    /// Unknown enum values (e.g. an unsupported rollover mode) surface as
    /// configuration errors.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Validate every section. Performs no I/O.
    pub fn validate(&self) -> Result<()> {
        self.data.validate()?;
        self.bars.validate()?;
        self.detector.validate()?;
        self.rollover.validate()?;
        self.backtest.validate()?;
        Ok(())
    }
}

/// Partition metadata validation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Missing or invalid sidecar rejects the partition (and the run).
    #[default]
    Strict,
    /// Missing or invalid sidecar is logged and the partition is read anyway.
    Lenient,
}

/// Tick data configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Single CSV tick file.
    pub csv_path: Option<PathBuf>,
    /// Root directory of partitioned tick files.
    pub dataset_root: Option<PathBuf>,
    /// Sidecar validation mode for partitioned data.
    pub validation: ValidationMode,
    /// First trading date to replay (inclusive, UTC).
    pub start_date: Option<NaiveDate>,
    /// Last trading date to replay (inclusive, UTC).
    pub end_date: Option<NaiveDate>,
    /// Global cap on merged ticks.
    pub max_rows: Option<u64>,
    /// Use concatenate-then-sort instead of the heap merge up to this many rows.
    pub preload_max_rows: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            csv_path: None,
            dataset_root: None,
            validation: ValidationMode::Strict,
            start_date: None,
            end_date: None,
            max_rows: None,
            preload_max_rows: 1_000_000,
        }
    }
}

impl DataConfig {
    fn validate(&self) -> Result<()> {
        match (&self.csv_path, &self.dataset_root) {
            (None, None) => {
                return Err(Error::config("one of data.csv_path or data.dataset_root is required"))
            }
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "data.csv_path and data.dataset_root are mutually exclusive",
                ))
            }
            _ => {}
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(Error::config(format!(
                    "invalid date range: start {start} is after end {end}"
                )));
            }
        }
        self.time_range_ns()?;
        if self.max_rows == Some(0) {
            return Err(Error::config("data.max_rows must be positive when set"));
        }
        Ok(())
    }

    /// Date range as a half-open nanosecond interval `[start, end)`.
    pub fn time_range_ns(&self) -> Result<(Option<TimestampNs>, Option<TimestampNs>)> {
        let start = self.start_date.map(day_start_ns).transpose()?;
        let end = match self.end_date {
            Some(end) => {
                let next = end
                    .succ_opt()
                    .ok_or_else(|| Error::config(format!("end date {end} out of range")))?;
                Some(day_start_ns(next)?)
            }
            None => None,
        };
        Ok((start, end))
    }
}

fn day_start_ns(date: NaiveDate) -> Result<TimestampNs> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
        .ok_or_else(|| Error::config(format!("date {date} not representable in nanoseconds")))
}

/// Bar aggregation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    /// Bucket width in nanoseconds.
    pub bucket_width_ns: i64,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            bucket_width_ns: DEFAULT_BUCKET_WIDTH_NS,
        }
    }
}

impl BarConfig {
    fn validate(&self) -> Result<()> {
        if self.bucket_width_ns <= 0 {
            return Err(Error::config(format!(
                "bars.bucket_width_ns must be positive, got {}",
                self.bucket_width_ns
            )));
        }
        Ok(())
    }
}

/// Market-state detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Rolling window in bars.
    pub window: usize,
    /// |trend_strength| above this classifies as trending.
    pub trend_threshold: f64,
    /// Volatility above this classifies as volatile.
    pub volatility_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: 20,
            trend_threshold: 2.0,
            volatility_threshold: 0.01,
        }
    }
}

impl DetectorConfig {
    /// Validate detector parameters.
    pub fn validate(&self) -> Result<()> {
        if self.window < 2 {
            return Err(Error::config(format!(
                "detector.window must be at least 2, got {}",
                self.window
            )));
        }
        if !(self.trend_threshold > 0.0) {
            return Err(Error::config("detector.trend_threshold must be positive"));
        }
        if !(self.volatility_threshold > 0.0) {
            return Err(Error::config("detector.volatility_threshold must be positive"));
        }
        Ok(())
    }
}

/// How an open position is moved to the new contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloverMode {
    /// Close on the old contract, open on the new one.
    #[default]
    Strict,
    /// Transfer position and average price without trading.
    Carry,
}

/// Price used for strict rollover legs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloverPriceMode {
    /// Ask for buys, bid for sells.
    #[default]
    Bbo,
    /// (bid + ask) / 2.
    Mid,
    /// Last trade price.
    Last,
}

/// Contract rollover configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloverConfig {
    /// Track active contracts and roll positions.
    pub enabled: bool,
    /// Rollover mode.
    pub mode: RolloverMode,
    /// Leg pricing mode.
    pub price_mode: RolloverPriceMode,
    /// Slippage per leg in basis points.
    #[serde(alias = "rollover_slippage_bps")]
    pub slippage_bps: f64,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RolloverMode::Strict,
            price_mode: RolloverPriceMode::Bbo,
            slippage_bps: 0.0,
        }
    }
}

impl RolloverConfig {
    /// Validate rollover parameters.
    pub fn validate(&self) -> Result<()> {
        if !self.slippage_bps.is_finite() || self.slippage_bps < 0.0 {
            return Err(Error::config(format!(
                "rollover_slippage_bps must be a non-negative number, got {}",
                self.slippage_bps
            )));
        }
        Ok(())
    }
}

/// Strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Registry name.
    pub name: String,
    /// Free-form parameters passed to the factory.
    pub params: serde_json::Value,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "noop".to_string(),
            params: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Fill every intent at its bar close and track positions.
    pub deterministic: bool,
    /// JSON-lines audit log target.
    pub wal_path: Option<PathBuf>,
    /// Strategy to run.
    pub strategy: StrategyConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            deterministic: true,
            wal_path: None,
            strategy: StrategyConfig::default(),
        }
    }
}

impl BacktestConfig {
    fn validate(&self) -> Result<()> {
        if self.strategy.name.trim().is_empty() {
            return Err(Error::config("backtest.strategy.name must not be empty"));
        }
        Ok(())
    }
}
