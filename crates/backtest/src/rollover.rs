//! Futures contract rollover.
//!
//! Tracks the active contract per underlying symbol. When a tick arrives for
//! a different contract of the same symbol and the old contract holds a
//! position, the position is moved across:
//!
//! - `strict`: close on the old contract at its last tick, open on the new
//!   contract at the current tick, both priced by the fill model.
//! - `carry`: transfer net position and average price without trading.
//!   Downgraded to `strict` when the new contract already holds a position.
//!
//! Flat switches just move the active contract.

use std::collections::HashMap;

use replay_core::config::{RolloverConfig, RolloverMode};
use replay_core::{symbol_of, Lots, Result, Side, Tick, TimestampNs};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::fill_model::{FillModel, FillModelConfig};
use crate::position::PositionBook;
use crate::wal::{WalEvent, WalRecorder};

/// Kind of rollover leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloverLeg {
    /// Flatten the old contract.
    Close,
    /// Re-establish on the new contract.
    Open,
    /// Position transferred without trading.
    Carry,
}

/// One executed rollover leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloverAction {
    pub ts_ns: TimestampNs,
    pub symbol: String,
    pub instrument: String,
    pub leg: RolloverLeg,
    pub side: Side,
    pub volume: Lots,
    pub price: f64,
    pub slippage_cost: f64,
    pub realized_pnl: f64,
}

/// Summary of one contract switch that moved a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloverEvent {
    pub ts_ns: TimestampNs,
    pub symbol: String,
    pub from_instrument: String,
    pub to_instrument: String,
    pub requested_mode: RolloverMode,
    pub applied_mode: RolloverMode,
    /// Signed position on the old contract before the switch.
    pub net_position: Lots,
    pub close_price: Option<f64>,
    pub open_price: Option<f64>,
    pub slippage_cost: f64,
    /// Deferred orders on the old contract canceled by the switch.
    pub canceled_orders: usize,
}

/// A detected switch that still has to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRollover {
    pub symbol: String,
    pub from: String,
    pub to: String,
}

/// Tracks active contracts and rolls positions.
#[derive(Debug)]
pub struct RolloverManager {
    mode: RolloverMode,
    fill_model: FillModel,
    active: HashMap<String, String>,
    last_ticks: HashMap<String, Tick>,
    events: Vec<RolloverEvent>,
    actions: Vec<RolloverAction>,
    slippage_total: f64,
}

impl RolloverManager {
    /// Create a manager, rejecting invalid parameters.
    pub fn new(config: &RolloverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            mode: config.mode,
            fill_model: FillModel::new(FillModelConfig::from(config)),
            active: HashMap::new(),
            last_ticks: HashMap::new(),
            events: Vec::new(),
            actions: Vec::new(),
            slippage_total: 0.0,
        })
    }

    /// Active contract of a symbol.
    pub fn active_contract(&self, symbol: &str) -> Option<&str> {
        self.active.get(symbol).map(String::as_str)
    }

    /// Observe a tick. Returns a switch that needs a position move.
    ///
    /// Flat switches and first sightings update the active contract directly.
    pub fn detect(&mut self, tick: &Tick, positions: &PositionBook) -> Option<PendingRollover> {
        match self.last_ticks.get_mut(&tick.instrument) {
            Some(last) => *last = tick.clone(),
            None => {
                self.last_ticks.insert(tick.instrument.clone(), tick.clone());
            }
        }

        let symbol = symbol_of(&tick.instrument);
        let from = match self.active.get(symbol) {
            None => {
                self.active.insert(symbol.to_string(), tick.instrument.clone());
                return None;
            }
            Some(active) if *active == tick.instrument => return None,
            Some(active) => active.clone(),
        };

        if positions.net_position(&from) == 0 {
            trace!(symbol, from = %from, to = %tick.instrument, "active contract switched");
            self.active.insert(symbol.to_string(), tick.instrument.clone());
            return None;
        }
        Some(PendingRollover {
            symbol: symbol.to_string(),
            from,
            to: tick.instrument.clone(),
        })
    }

    /// Move the position of a detected switch onto the new contract.
    ///
    /// `tick` is the first tick of the new contract.
    pub fn execute(
        &mut self,
        pending: PendingRollover,
        tick: &Tick,
        positions: &mut PositionBook,
        canceled_orders: usize,
        wal: &mut WalRecorder,
    ) -> &RolloverEvent {
        let PendingRollover { symbol, from, to } = pending;
        let net = positions.net_position(&from);
        let volume = net.abs();
        let direction = Side::for_position(net);

        let mut applied = self.mode;
        if applied == RolloverMode::Carry && positions.net_position(&to) != 0 {
            debug!(symbol = %symbol, to = %to, "target contract holds a position, carry downgraded to strict");
            applied = RolloverMode::Strict;
        }

        let mut event = RolloverEvent {
            ts_ns: tick.ts_ns,
            symbol: symbol.clone(),
            from_instrument: from.clone(),
            to_instrument: to.clone(),
            requested_mode: self.mode,
            applied_mode: applied,
            net_position: net,
            close_price: None,
            open_price: None,
            slippage_cost: 0.0,
            canceled_orders,
        };

        let mut legs = Vec::with_capacity(2);
        match applied {
            RolloverMode::Strict => {
                let close_side = direction.opposite();
                let (close_price, close_slip) = match self.last_ticks.get(&from) {
                    Some(last) => self.fill_model.leg_price(close_side, last),
                    None => {
                        let avg = positions.get(&from).map_or(0.0, |p| p.avg_open_price);
                        let base = positions.mark(&from).unwrap_or(avg);
                        self.fill_model.with_slippage(close_side, base)
                    }
                };
                let close_realized = positions.entry(&from).apply_trade(close_side, volume, close_price);

                let (open_price, open_slip) = self.fill_model.leg_price(direction, tick);
                let open_realized = positions.entry(&to).apply_trade(direction, volume, open_price);

                event.close_price = Some(close_price);
                event.open_price = Some(open_price);
                event.slippage_cost = (close_slip + open_slip) * volume as f64;

                legs.push(RolloverAction {
                    ts_ns: tick.ts_ns,
                    symbol: symbol.clone(),
                    instrument: from.clone(),
                    leg: RolloverLeg::Close,
                    side: close_side,
                    volume,
                    price: close_price,
                    slippage_cost: close_slip * volume as f64,
                    realized_pnl: close_realized,
                });
                legs.push(RolloverAction {
                    ts_ns: tick.ts_ns,
                    symbol: symbol.clone(),
                    instrument: to.clone(),
                    leg: RolloverLeg::Open,
                    side: direction,
                    volume,
                    price: open_price,
                    slippage_cost: open_slip * volume as f64,
                    realized_pnl: open_realized,
                });
            }
            RolloverMode::Carry => {
                let old = std::mem::take(positions.entry(&from));
                let new = positions.entry(&to);
                new.net_position = old.net_position;
                new.avg_open_price = old.avg_open_price;
                new.realized_pnl += old.realized_pnl;
                event.open_price = Some(old.avg_open_price);

                legs.push(RolloverAction {
                    ts_ns: tick.ts_ns,
                    symbol: symbol.clone(),
                    instrument: to.clone(),
                    leg: RolloverLeg::Carry,
                    side: direction,
                    volume,
                    price: old.avg_open_price,
                    slippage_cost: 0.0,
                    realized_pnl: 0.0,
                });
            }
        }

        for action in &legs {
            wal.append(WalEvent::Rollover {
                ts_ns: action.ts_ns,
                symbol: action.symbol.clone(),
                instrument: action.instrument.clone(),
                leg: action.leg,
                mode: applied,
                side: action.side,
                volume: action.volume,
                price: action.price,
                slippage_cost: action.slippage_cost,
                realized_pnl: action.realized_pnl,
            });
        }

        info!(
            symbol = %symbol,
            from = %from,
            to = %to,
            mode = ?applied,
            net_position = net,
            slippage = event.slippage_cost,
            "contract rolled"
        );

        self.active.insert(symbol, to);
        self.slippage_total += event.slippage_cost;
        self.actions.extend(legs);
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    /// Switches that moved a position, in order.
    pub fn events(&self) -> &[RolloverEvent] {
        &self.events
    }

    /// Executed legs, in order.
    pub fn actions(&self) -> &[RolloverAction] {
        &self.actions
    }

    /// Total slippage cost of all legs.
    pub fn slippage_total(&self) -> f64 {
        self.slippage_total
    }

    /// Consume the manager, returning events and actions.
    pub fn into_parts(self) -> (Vec<RolloverEvent>, Vec<RolloverAction>) {
        (self.events, self.actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use replay_core::config::RolloverPriceMode;

    fn tick(instrument: &str, ts_ns: i64, last: f64, bid: f64, ask: f64) -> Tick {
        Tick {
            instrument: instrument.to_string(),
            ts_ns,
            last_price: last,
            volume: 0.0,
            bid_px: bid,
            bid_sz: 5.0,
            ask_px: ask,
            ask_sz: 5.0,
        }
    }

    fn manager(mode: RolloverMode, slippage_bps: f64) -> RolloverManager {
        RolloverManager::new(&RolloverConfig {
            enabled: true,
            mode,
            price_mode: RolloverPriceMode::Bbo,
            slippage_bps,
        })
        .unwrap()
    }

    fn feed(
        mgr: &mut RolloverManager,
        positions: &mut PositionBook,
        wal: &mut WalRecorder,
        tick: &Tick,
    ) -> Option<RolloverEvent> {
        positions.update_mark(&tick.instrument, tick.last_price);
        let pending = mgr.detect(tick, positions)?;
        Some(mgr.execute(pending, tick, positions, 0, wal).clone())
    }

    #[test]
    fn test_rejects_negative_slippage() {
        let result = RolloverManager::new(&RolloverConfig {
            slippage_bps: -0.5,
            ..Default::default()
        });
        assert!(result.unwrap_err().is_config());
    }

    #[test]
    fn test_flat_switch_is_silent() {
        let mut mgr = manager(RolloverMode::Strict, 0.0);
        let mut positions = PositionBook::new();
        let mut wal = WalRecorder::disabled();
        assert!(feed(&mut mgr, &mut positions, &mut wal, &tick("rb2405", 1, 100.0, 99.0, 101.0)).is_none());
        assert!(feed(&mut mgr, &mut positions, &mut wal, &tick("rb2410", 2, 110.0, 109.0, 111.0)).is_none());
        assert_eq!(mgr.active_contract("rb"), Some("rb2410"));
        assert!(mgr.events().is_empty());
    }

    #[test]
    fn test_strict_rollover_conserves_position() {
        let mut mgr = manager(RolloverMode::Strict, 10.0);
        let mut positions = PositionBook::new();
        let mut wal = WalRecorder::disabled();

        feed(&mut mgr, &mut positions, &mut wal, &tick("rb2405", 1, 105.0, 104.0, 106.0));
        positions.entry("rb2405").apply_trade(Side::Buy, 2, 100.0);

        let event = feed(&mut mgr, &mut positions, &mut wal, &tick("rb2410", 2, 110.0, 109.0, 111.0))
            .expect("rollover expected");
        assert_eq!(event.applied_mode, RolloverMode::Strict);
        assert_eq!(event.net_position, 2);
        assert_eq!(positions.net_position("rb2405"), 0);
        assert_eq!(positions.net_position("rb2410"), 2);

        // Close sells at bid 104 less 10bps, open buys at ask 111 plus 10bps.
        assert_relative_eq!(event.close_price.unwrap(), 103.896, epsilon = 1e-9);
        assert_relative_eq!(event.open_price.unwrap(), 111.111, epsilon = 1e-9);
        assert_relative_eq!(event.slippage_cost, (0.104 + 0.111) * 2.0, epsilon = 1e-9);
        assert_relative_eq!(mgr.slippage_total(), event.slippage_cost);

        let old = positions.get("rb2405").unwrap();
        assert_relative_eq!(old.realized_pnl, 3.896 * 2.0, epsilon = 1e-9);
        assert_eq!(old.avg_open_price, 0.0);

        let legs: Vec<RolloverLeg> = mgr.actions().iter().map(|a| a.leg).collect();
        assert_eq!(legs, vec![RolloverLeg::Close, RolloverLeg::Open]);
        assert_eq!(mgr.active_contract("rb"), Some("rb2410"));
    }

    #[test]
    fn test_carry_transfers_position() {
        let mut mgr = manager(RolloverMode::Carry, 25.0);
        let mut positions = PositionBook::new();
        let mut wal = WalRecorder::disabled();

        feed(&mut mgr, &mut positions, &mut wal, &tick("rb2405", 1, 105.0, 104.0, 106.0));
        {
            let pos = positions.entry("rb2405");
            pos.apply_trade(Side::Sell, 3, 100.0);
            pos.apply_trade(Side::Buy, 1, 90.0);
        }
        let realized_before = positions.realized_total();

        let event = feed(&mut mgr, &mut positions, &mut wal, &tick("rb2410", 2, 110.0, 109.0, 111.0))
            .expect("rollover expected");
        assert_eq!(event.applied_mode, RolloverMode::Carry);
        assert_eq!(event.slippage_cost, 0.0);

        let new = positions.get("rb2410").unwrap();
        assert_eq!(new.net_position, -2);
        assert_relative_eq!(new.avg_open_price, 100.0);
        assert_relative_eq!(positions.realized_total(), realized_before);
        assert!(positions.get("rb2405").unwrap().is_flat());
        assert_eq!(mgr.actions().len(), 1);
        assert_eq!(mgr.actions()[0].leg, RolloverLeg::Carry);
    }

    #[test]
    fn test_carry_downgrades_when_target_held() {
        let mut mgr = manager(RolloverMode::Carry, 0.0);
        let mut positions = PositionBook::new();
        let mut wal = WalRecorder::disabled();

        feed(&mut mgr, &mut positions, &mut wal, &tick("rb2405", 1, 105.0, 104.0, 106.0));
        positions.entry("rb2405").apply_trade(Side::Buy, 1, 100.0);
        positions.entry("rb2410").apply_trade(Side::Buy, 1, 108.0);

        let event = feed(&mut mgr, &mut positions, &mut wal, &tick("rb2410", 2, 110.0, 109.0, 111.0))
            .expect("rollover expected");
        assert_eq!(event.requested_mode, RolloverMode::Carry);
        assert_eq!(event.applied_mode, RolloverMode::Strict);
        assert_eq!(positions.net_position("rb2405"), 0);
        assert_eq!(positions.net_position("rb2410"), 2);
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut mgr = manager(RolloverMode::Strict, 0.0);
        let mut positions = PositionBook::new();
        let mut wal = WalRecorder::disabled();

        feed(&mut mgr, &mut positions, &mut wal, &tick("rb2405", 1, 105.0, 104.0, 106.0));
        positions.entry("rb2405").apply_trade(Side::Buy, 1, 100.0);
        assert!(feed(&mut mgr, &mut positions, &mut wal, &tick("ag2406", 2, 5000.0, 4999.0, 5001.0)).is_none());
        assert_eq!(mgr.active_contract("rb"), Some("rb2405"));
        assert_eq!(mgr.active_contract("ag"), Some("ag2406"));
    }

    #[test]
    fn test_legs_written_to_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roll.wal");
        let mut wal = WalRecorder::open(&path).unwrap();
        let mut mgr = manager(RolloverMode::Strict, 0.0);
        let mut positions = PositionBook::new();

        feed(&mut mgr, &mut positions, &mut wal, &tick("rb2405", 1, 105.0, 104.0, 106.0));
        positions.entry("rb2405").apply_trade(Side::Buy, 1, 100.0);
        feed(&mut mgr, &mut positions, &mut wal, &tick("rb2410", 2, 110.0, 109.0, 111.0));
        assert_eq!(wal.records_written(), 2);
        drop(wal);

        let text = std::fs::read_to_string(&path).unwrap();
        let kinds: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["leg"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["close", "open"]);
    }
}
