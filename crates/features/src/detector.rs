//! Market-state detection.
//!
//! Turns each closed bar into a 7-dimensional [`MarketState`] plus a regime
//! label. The engine takes the detector as an injected dependency, so
//! alternative detectors only need to implement [`MarketStateDetector`].

use std::collections::{HashMap, VecDeque};

use replay_core::config::DetectorConfig;
use replay_core::{Bar, MarketState, Regime, Result};
use statrs::statistics::Statistics;
use tracing::trace;

use crate::volatility::RollingReturns;

/// Produces a market-state snapshot per closed bar.
pub trait MarketStateDetector: Send {
    /// Observe a closed bar and describe the market after it.
    fn observe(&mut self, bar: &Bar) -> MarketState;
}

/// Per-instrument rolling state.
struct InstrumentWindow {
    returns: RollingReturns,
    volumes: VecDeque<f64>,
}

impl InstrumentWindow {
    fn new(window: usize) -> Self {
        Self {
            returns: RollingReturns::new(window),
            volumes: VecDeque::with_capacity(window),
        }
    }
}

/// Default detector: rolling volatility and trend per instrument.
pub struct RegimeDetector {
    config: DetectorConfig,
    windows: HashMap<String, InstrumentWindow>,
}

impl RegimeDetector {
    /// Create a detector, rejecting invalid parameters.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            windows: HashMap::new(),
        })
    }
}

fn classify(config: &DetectorConfig, returns: &RollingReturns, volatility: f64, trend: f64) -> Regime {
    if !returns.is_ready() {
        Regime::Warmup
    } else if volatility > config.volatility_threshold {
        Regime::Volatile
    } else if trend >= config.trend_threshold {
        Regime::TrendUp
    } else if trend <= -config.trend_threshold {
        Regime::TrendDown
    } else {
        Regime::Ranging
    }
}

impl MarketStateDetector for RegimeDetector {
    fn observe(&mut self, bar: &Bar) -> MarketState {
        let window_len = self.config.window;
        let window = self
            .windows
            .entry(bar.instrument.clone())
            .or_insert_with(|| InstrumentWindow::new(window_len));

        window.returns.add_price(bar.close);

        let volume_ratio = if window.volumes.is_empty() {
            0.0
        } else {
            let mean = window.volumes.iter().mean();
            if mean > 0.0 {
                bar.volume / mean
            } else {
                0.0
            }
        };
        if window.volumes.len() >= window_len {
            window.volumes.pop_front();
        }
        window.volumes.push_back(bar.volume);

        let mid = bar.mid_close();
        let spread_bps = if mid > 0.0 {
            bar.spread_close() / mid * 10_000.0
        } else {
            0.0
        };
        let range_pct = if bar.close > 0.0 {
            (bar.high - bar.low) / bar.close
        } else {
            0.0
        };

        let volatility = window.returns.volatility().unwrap_or(0.0);
        let trend_strength = window.returns.trend_strength();
        let ret = window.returns.last_return();
        let regime = classify(&self.config, &window.returns, volatility, trend_strength);

        trace!(instrument = %bar.instrument, ?regime, volatility, trend_strength, "market state");

        MarketState {
            ret,
            volatility,
            range_pct,
            volume_ratio,
            spread_bps,
            imbalance: bar.qimb_close(),
            trend_strength,
            regime,
        }
    }
}
