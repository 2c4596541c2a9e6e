//! Core data types for the tick replay engine.

use serde::{Deserialize, Serialize};

/// Timestamp in nanoseconds since Unix epoch (UTC).
pub type TimestampNs = i64;

/// Volume in contracts (lots). Signed where it represents a position.
pub type Lots = i64;

/// Nanoseconds in one second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Default bar bucket width: one minute.
pub const DEFAULT_BUCKET_WIDTH_NS: i64 = 60 * NANOS_PER_SECOND;

/// Bucket index of a timestamp for the given bucket width.
#[inline]
pub fn bucket_index(ts_ns: TimestampNs, width_ns: i64) -> i64 {
    ts_ns.div_euclid(width_ns)
}

/// Underlying symbol of a futures instrument: its leading alphabetic run.
///
/// `rb2405` -> `rb`, `IF2406` -> `IF`.
#[inline]
pub fn symbol_of(instrument: &str) -> &str {
    let end = instrument
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(instrument.len());
    &instrument[..end]
}

/// A single market update for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument identifier (e.g. "rb2405").
    pub instrument: String,
    /// Exchange timestamp in nanoseconds.
    pub ts_ns: TimestampNs,
    /// Last trade price.
    pub last_price: f64,
    /// Cumulative traded volume.
    pub volume: f64,
    /// Best bid price.
    pub bid_px: f64,
    /// Best bid size.
    pub bid_sz: f64,
    /// Best ask price.
    pub ask_px: f64,
    /// Best ask size.
    pub ask_sz: f64,
}

impl Tick {
    /// Calculate mid price.
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid_px + self.ask_px) / 2.0
    }
}

/// OHLCV bar for one (instrument, time bucket) pair with L1 snapshot at close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument identifier.
    pub instrument: String,
    /// Bucket index (`floor(ts / width)`).
    pub bucket_index: i64,
    /// Bucket start timestamp (ns).
    pub bucket_start_ns: TimestampNs,
    /// Timestamp of the last tick in the bucket.
    pub last_ts_ns: TimestampNs,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Volume traded inside the bucket (cumulative-volume delta).
    pub volume: f64,
    /// Number of ticks aggregated.
    pub tick_count: u32,
    /// L1 bid price at close.
    pub bid_px_close: f64,
    /// L1 ask price at close.
    pub ask_px_close: f64,
    /// L1 bid size at close.
    pub bid_sz_close: f64,
    /// L1 ask size at close.
    pub ask_sz_close: f64,
}

impl Bar {
    /// Calculate mid price at close.
    #[inline]
    pub fn mid_close(&self) -> f64 {
        (self.bid_px_close + self.ask_px_close) / 2.0
    }

    /// Calculate spread at close.
    #[inline]
    pub fn spread_close(&self) -> f64 {
        self.ask_px_close - self.bid_px_close
    }

    /// Calculate quote imbalance at close.
    #[inline]
    pub fn qimb_close(&self) -> f64 {
        let total = self.bid_sz_close + self.ask_sz_close;
        if total > 0.0 {
            (self.bid_sz_close - self.ask_sz_close) / total
        } else {
            0.0
        }
    }
}

/// Coarse market regime attached to each bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Not enough history yet.
    Warmup,
    /// Persistent upward drift.
    TrendUp,
    /// Persistent downward drift.
    TrendDown,
    /// No clear direction, normal volatility.
    Ranging,
    /// Volatility above threshold.
    Volatile,
}

/// 7-dimensional market-state snapshot for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    /// Log return close-over-previous-close.
    pub ret: f64,
    /// Rolling stdev of log returns.
    pub volatility: f64,
    /// (high - low) / close.
    pub range_pct: f64,
    /// Bar volume over rolling mean volume.
    pub volume_ratio: f64,
    /// Spread at close in basis points of mid.
    pub spread_bps: f64,
    /// Quote imbalance at close.
    pub imbalance: f64,
    /// Mean return over its standard error.
    pub trend_strength: f64,
    /// Regime classification.
    pub regime: Regime,
}

impl MarketState {
    /// Neutral state used before a detector has history.
    pub fn warmup() -> Self {
        Self {
            ret: 0.0,
            volatility: 0.0,
            range_pct: 0.0,
            volume_ratio: 0.0,
            spread_bps: 0.0,
            imbalance: 0.0,
            trend_strength: 0.0,
            regime: Regime::Warmup,
        }
    }
}

/// Snapshot handed to the strategy once per closed bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarState {
    /// The closed bar.
    pub bar: Bar,
    /// Market state derived for the bar.
    pub state: MarketState,
    /// Net position held in the bar's instrument when the strategy is called,
    /// after deferred opens for this bar have settled.
    pub net_position: Lots,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buy, -1 for sell.
    #[inline]
    pub fn sign(self) -> Lots {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// The other side.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Side that increases a position with the given sign.
    #[inline]
    pub fn for_position(net_position: Lots) -> Self {
        if net_position >= 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Open/close flag of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Offset {
    Open,
    Close,
}

/// Trade intent emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Instrument to trade.
    pub instrument: String,
    /// Buy or sell.
    pub side: Side,
    /// Open or close.
    pub offset: Offset,
    /// Requested volume in lots.
    pub volume: Lots,
    /// Reference price seen by the strategy.
    pub reference_price: f64,
    /// Strategy-assigned trace id.
    pub trace_id: String,
}

/// Lifecycle status of a simulated order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Accepted,
    Filled,
    Deferred,
    Rejected,
    Canceled,
}

impl OrderStatus {
    /// Upper-case label used in histograms and the WAL.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Deferred => "DEFERRED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Canceled => "CANCELED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        // 2024-01-01 00:00:00 UTC
        let ts = 1_704_067_200_000_000_000i64;
        assert_eq!(bucket_index(ts, DEFAULT_BUCKET_WIDTH_NS), 28_401_120);
        assert_eq!(
            bucket_index(ts + 59 * NANOS_PER_SECOND, DEFAULT_BUCKET_WIDTH_NS),
            bucket_index(ts, DEFAULT_BUCKET_WIDTH_NS)
        );
        assert_eq!(
            bucket_index(ts + 60 * NANOS_PER_SECOND, DEFAULT_BUCKET_WIDTH_NS),
            bucket_index(ts, DEFAULT_BUCKET_WIDTH_NS) + 1
        );
        assert_eq!(bucket_index(-1, DEFAULT_BUCKET_WIDTH_NS), -1);
    }

    #[test]
    fn test_symbol_of() {
        assert_eq!(symbol_of("rb2405"), "rb");
        assert_eq!(symbol_of("IF2406"), "IF");
        assert_eq!(symbol_of("SR405"), "SR");
        assert_eq!(symbol_of("abc"), "abc");
        assert_eq!(symbol_of("2405"), "");
    }

    #[test]
    fn test_tick_mid() {
        let tick = Tick {
            instrument: "rb2405".to_string(),
            ts_ns: 0,
            last_price: 3500.0,
            volume: 10.0,
            bid_px: 3499.0,
            bid_sz: 30.0,
            ask_px: 3501.0,
            ask_sz: 10.0,
        };
        assert!((tick.mid() - 3500.0).abs() < 1e-10);
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Buy.sign(), 1);
        assert_eq!(Side::Sell.sign(), -1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::for_position(-3), Side::Sell);
        assert_eq!(Side::for_position(2), Side::Buy);
    }

    #[test]
    fn test_order_status_serde_label() {
        let json = serde_json::to_string(&OrderStatus::Accepted).unwrap();
        assert_eq!(json, "\"ACCEPTED\"");
        assert_eq!(OrderStatus::Filled.as_str(), "FILLED");
    }
}
