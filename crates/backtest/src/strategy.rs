//! Strategy boundary and registry.
//!
//! A strategy sees one [`BarState`] per closed bar and answers with trade
//! intents. Factories are registered by name on an explicit
//! [`StrategyRegistry`] that the engine borrows; each run gets a fresh
//! instance together with a [`StrategyCapabilities`] descriptor.

use std::collections::BTreeMap;

use replay_core::config::StrategyConfig;
use replay_core::{BarState, Error, Lots, Offset, Regime, Result, Side, TradeIntent};
use serde::Deserialize;
use tracing::debug;

use crate::fill_model::Fill;

/// Trading strategy driven by closed bars.
pub trait Strategy: Send {
    /// Called once per closed bar.
    fn on_state(&mut self, state: &BarState) -> Vec<TradeIntent>;

    /// Called for each fill of this strategy's intents when the strategy is
    /// order-aware.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// Called once after the last bar.
    fn shutdown(&mut self) {}
}

/// Optional behaviors a strategy declares. The engine acts on each flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyCapabilities {
    /// May open positions. `Open` intents from other strategies are REJECTED.
    pub opening: bool,
    /// Wants [`Strategy::on_fill`] callbacks.
    pub order_aware: bool,
    /// Sets its own trace ids; otherwise the engine assigns `<name>-<n>`.
    pub trace_provider: bool,
}

/// A strategy instance and what it can do.
pub struct StrategyHandle {
    pub strategy: Box<dyn Strategy>,
    pub capabilities: StrategyCapabilities,
}

impl StrategyHandle {
    pub fn new(strategy: impl Strategy + 'static, capabilities: StrategyCapabilities) -> Self {
        Self {
            strategy: Box::new(strategy),
            capabilities,
        }
    }
}

/// Builds a strategy from its JSON parameters.
pub type StrategyFactory = Box<dyn Fn(&serde_json::Value) -> Result<StrategyHandle> + Send + Sync>;

/// Name to factory map.
#[derive(Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `noop` and `regime_follow`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(NoopStrategy::NAME, |_| {
            Ok(StrategyHandle::new(NoopStrategy, StrategyCapabilities::default()))
        });
        registry.insert(RegimeFollowStrategy::NAME, |params| {
            let strategy = RegimeFollowStrategy::from_params(params)?;
            Ok(StrategyHandle::new(
                strategy,
                StrategyCapabilities {
                    opening: true,
                    order_aware: true,
                    trace_provider: true,
                    ..Default::default()
                },
            ))
        });
        registry
    }

    fn insert<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<StrategyHandle> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Register a factory. Names must be unique and non-empty.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&serde_json::Value) -> Result<StrategyHandle> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(Error::strategy("strategy name must not be empty"));
        }
        if self.factories.contains_key(name) {
            return Err(Error::strategy(format!("strategy '{name}' already registered")));
        }
        self.insert(name, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a fresh strategy for a run.
    pub fn create(&self, config: &StrategyConfig) -> Result<StrategyHandle> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| Error::config(format!("unknown strategy '{}'", config.name)))?;
        debug!(strategy = %config.name, "creating strategy");
        factory(&config.params)
    }
}

/// Emits nothing.
pub struct NoopStrategy;

impl NoopStrategy {
    pub const NAME: &'static str = "noop";
}

impl Strategy for NoopStrategy {
    fn on_state(&mut self, _state: &BarState) -> Vec<TradeIntent> {
        Vec::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RegimeFollowParams {
    volume: Lots,
}

impl Default for RegimeFollowParams {
    fn default() -> Self {
        Self { volume: 1 }
    }
}

/// Follows the detected regime: long in an uptrend, short in a downtrend,
/// flat when volatile, holds otherwise.
pub struct RegimeFollowStrategy {
    volume: Lots,
    next_trace: u64,
    fills: u64,
}

impl RegimeFollowStrategy {
    pub const NAME: &'static str = "regime_follow";

    pub fn new(volume: Lots) -> Result<Self> {
        if volume <= 0 {
            return Err(Error::config(format!(
                "regime_follow volume must be positive, got {volume}"
            )));
        }
        Ok(Self {
            volume,
            next_trace: 1,
            fills: 0,
        })
    }

    /// Build from JSON parameters (`{"volume": n}`).
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params = if params.is_null() {
            RegimeFollowParams::default()
        } else {
            RegimeFollowParams::deserialize(params)
                .map_err(|e| Error::config(format!("invalid regime_follow params: {e}")))?
        };
        Self::new(params.volume)
    }

    /// Fills received so far.
    pub fn fills(&self) -> u64 {
        self.fills
    }

    fn intent(&mut self, state: &BarState, side: Side, offset: Offset, volume: Lots) -> TradeIntent {
        let trace_id = format!("{}-{}", Self::NAME, self.next_trace);
        self.next_trace += 1;
        TradeIntent {
            instrument: state.bar.instrument.clone(),
            side,
            offset,
            volume,
            reference_price: state.bar.close,
            trace_id,
        }
    }
}

impl Strategy for RegimeFollowStrategy {
    fn on_state(&mut self, state: &BarState) -> Vec<TradeIntent> {
        let target = match state.state.regime {
            Regime::TrendUp => self.volume,
            Regime::TrendDown => -self.volume,
            Regime::Volatile => 0,
            Regime::Warmup | Regime::Ranging => return Vec::new(),
        };
        let current = state.net_position;
        if target == current {
            return Vec::new();
        }

        let mut intents = Vec::with_capacity(2);
        if current != 0 && target.signum() != current.signum() {
            let side = Side::for_position(current).opposite();
            intents.push(self.intent(state, side, Offset::Close, current.abs()));
        }
        if target != 0 && target.signum() != current.signum() {
            let side = Side::for_position(target);
            intents.push(self.intent(state, side, Offset::Open, target.abs()));
        }
        intents
    }

    fn on_fill(&mut self, _fill: &Fill) {
        self.fills += 1;
    }

    fn shutdown(&mut self) {
        debug!(fills = self.fills, "regime_follow finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::{Bar, MarketState};

    fn state(regime: Regime, net_position: Lots) -> BarState {
        let mut market = MarketState::warmup();
        market.regime = regime;
        BarState {
            bar: Bar {
                instrument: "rb2405".to_string(),
                bucket_index: 0,
                bucket_start_ns: 0,
                last_ts_ns: 0,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 0.0,
                tick_count: 1,
                bid_px_close: 99.0,
                ask_px_close: 101.0,
                bid_sz_close: 1.0,
                ask_sz_close: 1.0,
            },
            state: market,
            net_position,
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StrategyRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["noop", "regime_follow"]);
        let handle = registry.create(&StrategyConfig::default()).unwrap();
        assert!(!handle.capabilities.order_aware);

        let config = StrategyConfig {
            name: "regime_follow".to_string(),
            ..Default::default()
        };
        let caps = registry.create(&config).unwrap().capabilities;
        assert!(caps.opening && caps.order_aware && caps.trace_provider);
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        let registry = StrategyRegistry::with_builtins();
        let config = StrategyConfig {
            name: "martingale".to_string(),
            ..Default::default()
        };
        assert!(registry.create(&config).err().unwrap().is_config());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = StrategyRegistry::with_builtins();
        let result = registry.register("noop", |_| {
            Ok(StrategyHandle::new(NoopStrategy, StrategyCapabilities::default()))
        });
        assert!(result.is_err());
        assert!(registry
            .register("custom", |_| Ok(StrategyHandle::new(NoopStrategy, StrategyCapabilities::default())))
            .is_ok());
        assert!(registry.contains("custom"));
    }

    #[test]
    fn test_regime_follow_params() {
        let strategy = RegimeFollowStrategy::from_params(&serde_json::json!({"volume": 3})).unwrap();
        assert_eq!(strategy.volume, 3);
        assert!(RegimeFollowStrategy::from_params(&serde_json::json!({"volume": 0})).is_err());
        assert!(RegimeFollowStrategy::from_params(&serde_json::json!({"size": 1})).is_err());
        assert_eq!(RegimeFollowStrategy::from_params(&serde_json::json!({})).unwrap().volume, 1);
    }

    #[test]
    fn test_regime_follow_intents() {
        let mut strategy = RegimeFollowStrategy::new(2).unwrap();
        assert!(strategy.on_state(&state(Regime::Warmup, 0)).is_empty());

        let open = strategy.on_state(&state(Regime::TrendUp, 0));
        assert_eq!(open.len(), 1);
        assert_eq!((open[0].side, open[0].offset, open[0].volume), (Side::Buy, Offset::Open, 2));
        assert_eq!(open[0].trace_id, "regime_follow-1");

        assert!(strategy.on_state(&state(Regime::TrendUp, 2)).is_empty());
        assert!(strategy.on_state(&state(Regime::Ranging, 2)).is_empty());

        let flip = strategy.on_state(&state(Regime::TrendDown, 2));
        assert_eq!(flip.len(), 2);
        assert_eq!((flip[0].side, flip[0].offset, flip[0].volume), (Side::Sell, Offset::Close, 2));
        assert_eq!((flip[1].side, flip[1].offset, flip[1].volume), (Side::Sell, Offset::Open, 2));

        let flatten = strategy.on_state(&state(Regime::Volatile, -2));
        assert_eq!(flatten.len(), 1);
        assert_eq!((flatten[0].side, flatten[0].offset), (Side::Buy, Offset::Close));
    }
}
