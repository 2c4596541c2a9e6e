//! Bar building from the merged tick stream.
//!
//! Builds one OHLCV bar per (instrument, time bucket) with an L1 snapshot at
//! close. Ticks must arrive grouped by instrument within a bucket, which the
//! merge tie-break on instrument guarantees for equal timestamps.

use replay_core::{bucket_index, Bar, Tick, TimestampNs};

/// A bar that's currently being built.
#[derive(Debug, Clone)]
struct BarInProgress {
    instrument: String,
    bucket_index: i64,
    bucket_start_ns: TimestampNs,
    last_ts_ns: TimestampNs,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    first_volume: f64,
    last_volume: f64,
    tick_count: u32,
    bid_px: f64,
    bid_sz: f64,
    ask_px: f64,
    ask_sz: f64,
}

impl BarInProgress {
    fn new(tick: &Tick, bucket_index: i64, width_ns: i64) -> Self {
        Self {
            instrument: tick.instrument.clone(),
            bucket_index,
            bucket_start_ns: bucket_index * width_ns,
            last_ts_ns: tick.ts_ns,
            open: tick.last_price,
            high: tick.last_price,
            low: tick.last_price,
            close: tick.last_price,
            first_volume: tick.volume,
            last_volume: tick.volume,
            tick_count: 1,
            bid_px: tick.bid_px,
            bid_sz: tick.bid_sz,
            ask_px: tick.ask_px,
            ask_sz: tick.ask_sz,
        }
    }

    fn add_tick(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.last_price);
        self.low = self.low.min(tick.last_price);
        self.close = tick.last_price;
        self.last_volume = tick.volume;
        self.last_ts_ns = tick.ts_ns;
        self.tick_count += 1;
        self.bid_px = tick.bid_px;
        self.bid_sz = tick.bid_sz;
        self.ask_px = tick.ask_px;
        self.ask_sz = tick.ask_sz;
    }

    fn matches(&self, instrument: &str, bucket_index: i64) -> bool {
        self.bucket_index == bucket_index && self.instrument == instrument
    }

    fn into_bar(self) -> Bar {
        Bar {
            instrument: self.instrument,
            bucket_index: self.bucket_index,
            bucket_start_ns: self.bucket_start_ns,
            last_ts_ns: self.last_ts_ns,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: (self.last_volume - self.first_volume).max(0.0),
            tick_count: self.tick_count,
            bid_px_close: self.bid_px,
            ask_px_close: self.ask_px,
            bid_sz_close: self.bid_sz,
            ask_sz_close: self.ask_sz,
        }
    }
}

/// Builder for fixed-width bars from a merged tick stream.
pub struct BarBuilder {
    width_ns: i64,
    active: Option<BarInProgress>,
    bars_emitted: u64,
}

impl BarBuilder {
    /// Create a new bar builder. `width_ns` must be positive.
    pub fn new(width_ns: i64) -> Self {
        debug_assert!(width_ns > 0);
        Self {
            width_ns,
            active: None,
            bars_emitted: 0,
        }
    }

    /// Add a tick. Returns the previous bar if this tick closed it.
    pub fn push(&mut self, tick: &Tick) -> Option<Bar> {
        let index = bucket_index(tick.ts_ns, self.width_ns);
        if let Some(active) = self.active.as_mut() {
            if active.matches(&tick.instrument, index) {
                active.add_tick(tick);
                return None;
            }
        }
        let closed = self.active.replace(BarInProgress::new(tick, index, self.width_ns));
        closed.map(|b| self.emit(b))
    }

    /// Close the in-flight bar at end of stream.
    pub fn flush(&mut self) -> Option<Bar> {
        self.active.take().map(|b| self.emit(b))
    }

    fn emit(&mut self, bar: BarInProgress) -> Bar {
        self.bars_emitted += 1;
        bar.into_bar()
    }

    /// Whether a bar is currently open.
    pub fn has_pending(&self) -> bool {
        self.active.is_some()
    }

    /// Bars emitted so far.
    pub fn bars_emitted(&self) -> u64 {
        self.bars_emitted
    }

    /// Bucket width in nanoseconds.
    pub fn width_ns(&self) -> i64 {
        self.width_ns
    }
}
