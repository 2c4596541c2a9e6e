//! Fill model for deterministic replay.
//!
//! Strategy intents fill at the close of the bar that produced them.
//! Rollover legs fill off a tick, priced by the configured price mode with
//! basis-point slippage against the trader.

use replay_core::config::{RolloverConfig, RolloverPriceMode};
use replay_core::{Bar, Lots, Offset, Side, Tick, TimestampNs, TradeIntent};
use serde::{Deserialize, Serialize};

/// A simulated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Execution timestamp (ns).
    pub ts_ns: TimestampNs,
    /// Instrument traded.
    pub instrument: String,
    /// Buy or sell.
    pub side: Side,
    /// Open or close.
    pub offset: Offset,
    /// Executed volume.
    pub volume: Lots,
    /// Execution price.
    pub price: f64,
    /// Slippage cost in price units times volume.
    pub slippage: f64,
    /// Trace id of the originating intent.
    pub trace_id: String,
}

/// Configuration for the fill model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillModelConfig {
    /// Price used for tick-priced legs.
    pub price_mode: RolloverPriceMode,
    /// Slippage per leg in basis points.
    pub slippage_bps: f64,
}

impl Default for FillModelConfig {
    fn default() -> Self {
        Self {
            price_mode: RolloverPriceMode::Bbo,
            slippage_bps: 0.0,
        }
    }
}

impl From<&RolloverConfig> for FillModelConfig {
    fn from(config: &RolloverConfig) -> Self {
        Self {
            price_mode: config.price_mode,
            slippage_bps: config.slippage_bps,
        }
    }
}

/// Fill model for simulating order execution.
#[derive(Debug, Clone)]
pub struct FillModel {
    config: FillModelConfig,
}

impl FillModel {
    /// Create a new fill model.
    pub fn new(config: FillModelConfig) -> Self {
        Self { config }
    }

    /// Fill `volume` of an intent at the bar's close. No slippage.
    pub fn bar_close(&self, intent: &TradeIntent, bar: &Bar, volume: Lots) -> Fill {
        Fill {
            ts_ns: bar.last_ts_ns,
            instrument: bar.instrument.clone(),
            side: intent.side,
            offset: intent.offset,
            volume,
            price: bar.close,
            slippage: 0.0,
            trace_id: intent.trace_id.clone(),
        }
    }

    /// Unadjusted reference price of a tick for a side.
    ///
    /// `Bbo` falls back to the last price when the quote side is missing.
    pub fn reference_price(&self, side: Side, tick: &Tick) -> f64 {
        match self.config.price_mode {
            RolloverPriceMode::Last => tick.last_price,
            RolloverPriceMode::Mid => {
                if tick.bid_px > 0.0 && tick.ask_px > 0.0 {
                    tick.mid()
                } else {
                    tick.last_price
                }
            }
            RolloverPriceMode::Bbo => {
                let quote = match side {
                    Side::Buy => tick.ask_px,
                    Side::Sell => tick.bid_px,
                };
                if quote > 0.0 {
                    quote
                } else {
                    tick.last_price
                }
            }
        }
    }

    /// Apply slippage to a base price. Returns `(price, per-lot slippage)`.
    ///
    /// Buys pay up, sells receive less.
    pub fn with_slippage(&self, side: Side, base: f64) -> (f64, f64) {
        let adjustment = base * self.config.slippage_bps / 10_000.0;
        match side {
            Side::Buy => (base + adjustment, adjustment),
            Side::Sell => (base - adjustment, adjustment),
        }
    }

    /// Price one tick-priced leg. Returns `(price, per-lot slippage)`.
    pub fn leg_price(&self, side: Side, tick: &Tick) -> (f64, f64) {
        self.with_slippage(side, self.reference_price(side, tick))
    }
}
