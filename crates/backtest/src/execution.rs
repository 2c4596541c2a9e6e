//! Deterministic order handling.
//!
//! Every accepted intent fills at the close of the bar that produced it.
//! Order rules:
//! - non-positive volume, non-positive fill price or a foreign instrument: REJECTED
//! - `Close` is capped to the opposite position; nothing to close: REJECTED
//! - `Open` against a non-flat opposite position: DEFERRED to the next bar of
//!   the instrument, filled there if flat, REJECTED otherwise
//!
//! Each fill appends an `order` record (ACCEPTED) then a `trade` record
//! (FILLED) to the WAL. Other transitions append one `order` record.

use std::collections::BTreeMap;

use replay_core::{Bar, Lots, Offset, OrderStatus, TimestampNs, TradeIntent};
use tracing::{debug, trace};

use crate::fill_model::{Fill, FillModel, FillModelConfig};
use crate::metrics::StatusCounts;
use crate::position::PositionBook;
use crate::wal::{WalEvent, WalRecorder};

/// An opening intent waiting for the position to go flat.
#[derive(Debug, Clone)]
struct DeferredOpen {
    intent: TradeIntent,
    deferred_at: TimestampNs,
}

/// Fills intents at bar close and tracks order statuses.
pub struct DeterministicExecutor {
    fill_model: FillModel,
    pending: BTreeMap<String, Vec<DeferredOpen>>,
    statuses: StatusCounts,
}

impl Default for DeterministicExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeterministicExecutor {
    pub fn new() -> Self {
        Self {
            fill_model: FillModel::new(FillModelConfig::default()),
            pending: BTreeMap::new(),
            statuses: StatusCounts::new(),
        }
    }

    /// Order-status histogram.
    pub fn statuses(&self) -> &StatusCounts {
        &self.statuses
    }

    /// Deferred opens still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Settle deferred opens of the bar's instrument. Call before the
    /// strategy sees the bar.
    pub fn on_bar(&mut self, bar: &Bar, positions: &mut PositionBook, wal: &mut WalRecorder) -> Vec<Fill> {
        let Some(waiting) = self.pending.remove(&bar.instrument) else {
            return Vec::new();
        };
        let mut fills = Vec::new();
        for deferred in waiting {
            let intent = deferred.intent;
            if positions.net_position(&intent.instrument) == 0 && bar.close > 0.0 {
                debug!(
                    instrument = %intent.instrument,
                    trace_id = %intent.trace_id,
                    deferred_at = deferred.deferred_at,
                    "filling deferred open"
                );
                fills.push(self.fill(&intent, bar, intent.volume, positions, wal));
            } else {
                self.transition(&intent, bar.last_ts_ns, bar.close, OrderStatus::Rejected, wal);
            }
        }
        fills
    }

    /// Process one strategy intent against its bar.
    pub fn submit(
        &mut self,
        intent: &TradeIntent,
        bar: &Bar,
        positions: &mut PositionBook,
        wal: &mut WalRecorder,
    ) -> Option<Fill> {
        if intent.volume <= 0 || !(bar.close > 0.0) || intent.instrument != bar.instrument {
            trace!(trace_id = %intent.trace_id, "intent rejected");
            self.transition(intent, bar.last_ts_ns, bar.close, OrderStatus::Rejected, wal);
            return None;
        }

        let net = positions.net_position(&intent.instrument);
        let sign = intent.side.sign();
        let volume = match intent.offset {
            Offset::Close => {
                let closable: Lots = if net != 0 && net.signum() == -sign { net.abs() } else { 0 };
                if closable == 0 {
                    trace!(trace_id = %intent.trace_id, net, "nothing to close");
                    self.transition(intent, bar.last_ts_ns, bar.close, OrderStatus::Rejected, wal);
                    return None;
                }
                intent.volume.min(closable)
            }
            Offset::Open => {
                if net != 0 && net.signum() != sign {
                    self.transition(intent, bar.last_ts_ns, bar.close, OrderStatus::Deferred, wal);
                    self.pending
                        .entry(intent.instrument.clone())
                        .or_default()
                        .push(DeferredOpen {
                            intent: intent.clone(),
                            deferred_at: bar.last_ts_ns,
                        });
                    return None;
                }
                intent.volume
            }
        };
        Some(self.fill(intent, bar, volume, positions, wal))
    }

    /// Reject an intent without looking at positions.
    pub fn reject(&mut self, intent: &TradeIntent, bar: &Bar, wal: &mut WalRecorder) {
        self.transition(intent, bar.last_ts_ns, bar.close, OrderStatus::Rejected, wal);
    }

    /// Cancel deferred opens of an instrument. Returns how many.
    pub fn cancel_pending(&mut self, instrument: &str, ts_ns: TimestampNs, wal: &mut WalRecorder) -> usize {
        let Some(waiting) = self.pending.remove(instrument) else {
            return 0;
        };
        for deferred in &waiting {
            self.transition(
                &deferred.intent,
                ts_ns,
                deferred.intent.reference_price,
                OrderStatus::Canceled,
                wal,
            );
        }
        waiting.len()
    }

    /// Cancel everything still waiting. Returns how many.
    pub fn cancel_all(&mut self, ts_ns: TimestampNs, wal: &mut WalRecorder) -> usize {
        let instruments: Vec<String> = self.pending.keys().cloned().collect();
        instruments
            .iter()
            .map(|instrument| self.cancel_pending(instrument, ts_ns, wal))
            .sum()
    }

    fn fill(
        &mut self,
        intent: &TradeIntent,
        bar: &Bar,
        volume: Lots,
        positions: &mut PositionBook,
        wal: &mut WalRecorder,
    ) -> Fill {
        let fill = self.fill_model.bar_close(intent, bar, volume);
        self.statuses.increment(OrderStatus::Accepted);
        wal.append(WalEvent::Order {
            ts_ns: fill.ts_ns,
            instrument: fill.instrument.clone(),
            side: fill.side,
            offset: fill.offset,
            volume,
            price: fill.price,
            status: OrderStatus::Accepted,
            trace_id: fill.trace_id.clone(),
        });

        let position = positions.entry(&fill.instrument);
        position.apply_trade(fill.side, volume, fill.price);
        self.statuses.increment(OrderStatus::Filled);
        wal.append(WalEvent::Trade {
            ts_ns: fill.ts_ns,
            instrument: fill.instrument.clone(),
            side: fill.side,
            offset: fill.offset,
            volume,
            price: fill.price,
            net_position: position.net_position,
            avg_open_price: position.avg_open_price,
            realized_pnl: position.realized_pnl,
            trace_id: fill.trace_id.clone(),
        });
        fill
    }

    fn transition(
        &mut self,
        intent: &TradeIntent,
        ts_ns: TimestampNs,
        price: f64,
        status: OrderStatus,
        wal: &mut WalRecorder,
    ) {
        self.statuses.increment(status);
        wal.append(WalEvent::Order {
            ts_ns,
            instrument: intent.instrument.clone(),
            side: intent.side,
            offset: intent.offset,
            volume: intent.volume,
            price,
            status,
            trace_id: intent.trace_id.clone(),
        });
    }
}
