//! Replay engine.
//!
//! Scans the configured tick source, merges partitions chronologically,
//! aggregates bars and drives the strategy. In deterministic mode every
//! intent fills at its bar close, positions roll across futures contracts
//! and the run ends with an invariant check.
//!
//! All mutable state of a run lives in a private run context, so one
//! engine (or several) can run concurrently on separate threads.

use std::collections::BTreeSet;

use replay_core::{Bar, BarState, Config, Error, Offset, Result, Tick, TimestampNs, TradeIntent};
use replay_features::{MarketStateDetector, RegimeDetector};
use replay_ingestion::{
    kmerge, merge_by_sort, BarBuilder, CsvTickSource, PartitionedTickSource, ScanMetrics, ScanRequest,
    TickSource,
};
use tracing::{debug, info, warn};

use crate::execution::DeterministicExecutor;
use crate::fill_model::Fill;
use crate::invariants::validate_snapshots;
use crate::metrics::{EquityCurve, MetricsCalculator};
use crate::position::PositionBook;
use crate::report::{DeterministicReport, ReplayReport};
use crate::rollover::RolloverManager;
use crate::signature::{input_signature, scan_fingerprint, to_hex, Signatures};
use crate::strategy::{Strategy, StrategyCapabilities, StrategyRegistry};
use crate::wal::WalRecorder;

/// Replays one configuration.
pub struct ReplayEngine<'r> {
    config: Config,
    registry: &'r StrategyRegistry,
}

impl<'r> ReplayEngine<'r> {
    /// Validate the configuration and strategy name. Performs no I/O.
    pub fn new(config: Config, registry: &'r StrategyRegistry) -> Result<Self> {
        config.validate()?;
        let name = &config.backtest.strategy.name;
        if !registry.contains(name) {
            return Err(Error::config(format!(
                "unknown strategy '{name}', registered: {}",
                registry.names().join(", ")
            )));
        }
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run against the configured CSV file or partitioned dataset.
    pub fn run(&self) -> Result<ReplayReport> {
        let source = self.open_source()?;
        let signatures = Signatures::compute(&self.config)?;
        self.execute(source.as_ref(), Some(signatures))
    }

    /// Run against an explicit source.
    ///
    /// The data signature is folded from the scanned tick content.
    pub fn run_with_source(&self, source: &dyn TickSource) -> Result<ReplayReport> {
        self.execute(source, None)
    }

    fn open_source(&self) -> Result<Box<dyn TickSource>> {
        let data = &self.config.data;
        match (&data.csv_path, &data.dataset_root) {
            (Some(path), _) => Ok(Box::new(CsvTickSource::new(path))),
            (None, Some(root)) => Ok(Box::new(PartitionedTickSource::new(root, data.validation))),
            (None, None) => Err(Error::config("no data source configured")),
        }
    }

    fn execute(&self, source: &dyn TickSource, signatures: Option<Signatures>) -> Result<ReplayReport> {
        let config = &self.config;
        let (start_ns, end_ns) = config.data.time_range_ns()?;
        let request = ScanRequest {
            start_ns,
            end_ns,
            max_rows: config.data.max_rows,
        };

        let mut ctx = RunContext::new(config, self.registry)?;

        info!(
            source = source.name(),
            strategy = %config.backtest.strategy.name,
            deterministic = config.backtest.deterministic,
            "replay started"
        );

        let scans = source.scan(&request)?;
        let mut scan = ScanMetrics::from_scans(&scans);
        let signatures = match signatures {
            Some(signatures) => signatures,
            None => Signatures {
                input_signature: input_signature(config)?,
                data_signature: to_hex(scan_fingerprint(&scans)),
            },
        };

        let total_rows: u64 = scans.iter().map(|s| s.ticks.len() as u64).sum();
        let partitions: Vec<Vec<Tick>> = scans.into_iter().map(|s| s.ticks).collect();
        let merge_early_stop = if total_rows <= config.data.preload_max_rows {
            debug!(total_rows, partitions = partitions.len(), "merging by sort");
            let merged = merge_by_sort(partitions, config.data.max_rows);
            for tick in merged.ticks {
                ctx.on_tick(tick);
            }
            merged.early_stop
        } else {
            debug!(total_rows, partitions = partitions.len(), "merging by heap");
            let mut merger = kmerge(partitions, config.data.max_rows);
            for tick in merger.by_ref() {
                ctx.on_tick(tick);
            }
            merger.early_stopped()
        };
        scan.early_stop |= merge_early_stop;

        let report = ctx.finish(source.name(), signatures, scan);
        info!(
            ticks = report.ticks_read,
            bars = report.bars_emitted,
            intents = report.intents_emitted,
            wal_records = report.wal_records,
            input_signature = %report.signatures.input_signature,
            data_signature = %report.signatures.data_signature,
            "replay finished"
        );
        Ok(report)
    }
}

/// Mutable state of one run.
struct RunContext {
    deterministic: bool,
    bars: BarBuilder,
    detector: Box<dyn MarketStateDetector>,
    strategy: Box<dyn Strategy>,
    strategy_name: String,
    capabilities: StrategyCapabilities,
    next_trace: u64,
    positions: PositionBook,
    executor: DeterministicExecutor,
    rollover: Option<RolloverManager>,
    wal: WalRecorder,
    equity: EquityCurve,
    instruments: BTreeSet<String>,
    ticks_read: u64,
    bars_emitted: u64,
    intents_emitted: u64,
    last_ts_ns: TimestampNs,
}

impl RunContext {
    fn new(config: &Config, registry: &StrategyRegistry) -> Result<Self> {
        let handle = registry.create(&config.backtest.strategy)?;
        let detector = RegimeDetector::new(config.detector.clone())?;
        let deterministic = config.backtest.deterministic;
        let rollover = if deterministic && config.rollover.enabled {
            Some(RolloverManager::new(&config.rollover)?)
        } else {
            None
        };
        let wal = WalRecorder::from_path(config.backtest.wal_path.as_deref())?;

        Ok(Self {
            deterministic,
            bars: BarBuilder::new(config.bars.bucket_width_ns),
            detector: Box::new(detector),
            strategy: handle.strategy,
            strategy_name: config.backtest.strategy.name.clone(),
            capabilities: handle.capabilities,
            next_trace: 1,
            positions: PositionBook::new(),
            executor: DeterministicExecutor::new(),
            rollover,
            wal,
            equity: EquityCurve::new(),
            instruments: BTreeSet::new(),
            ticks_read: 0,
            bars_emitted: 0,
            intents_emitted: 0,
            last_ts_ns: 0,
        })
    }

    fn on_tick(&mut self, tick: Tick) {
        self.ticks_read += 1;
        self.last_ts_ns = tick.ts_ns;
        if !self.instruments.contains(&tick.instrument) {
            self.instruments.insert(tick.instrument.clone());
        }

        // Close the previous bar before any rollover this tick triggers.
        if let Some(bar) = self.bars.push(&tick) {
            self.on_bar(bar);
        }

        if self.deterministic {
            self.positions.update_mark(&tick.instrument, tick.last_price);
            if let Some(rollover) = self.rollover.as_mut() {
                if let Some(pending) = rollover.detect(&tick, &self.positions) {
                    let canceled = self.executor.cancel_pending(&pending.from, tick.ts_ns, &mut self.wal);
                    rollover.execute(pending, &tick, &mut self.positions, canceled, &mut self.wal);
                }
            }
        }
    }

    fn on_bar(&mut self, bar: Bar) {
        self.bars_emitted += 1;
        let state = self.detector.observe(&bar);

        if self.deterministic {
            let fills = self.executor.on_bar(&bar, &mut self.positions, &mut self.wal);
            self.notify(&fills);
        }

        let snapshot = BarState {
            net_position: self.positions.net_position(&bar.instrument),
            bar,
            state,
        };
        let intents = self.strategy.on_state(&snapshot);
        self.intents_emitted += intents.len() as u64;

        if self.deterministic {
            for mut intent in intents {
                self.assign_trace_id(&mut intent);
                if intent.offset == Offset::Open && !self.capabilities.opening {
                    debug!(strategy = %self.strategy_name, trace_id = %intent.trace_id, "open from non-opening strategy");
                    self.executor.reject(&intent, &snapshot.bar, &mut self.wal);
                    continue;
                }
                let fill = self
                    .executor
                    .submit(&intent, &snapshot.bar, &mut self.positions, &mut self.wal);
                if let Some(fill) = fill {
                    self.notify(std::slice::from_ref(&fill));
                }
            }
            self.equity
                .record(snapshot.bar.last_ts_ns, self.positions.total_pnl());
        }
    }

    /// Strategies that do not provide trace ids get `<strategy>-<n>`.
    fn assign_trace_id(&mut self, intent: &mut TradeIntent) {
        if !self.capabilities.trace_provider {
            intent.trace_id = format!("{}-{}", self.strategy_name, self.next_trace);
            self.next_trace += 1;
        }
    }

    fn notify(&mut self, fills: &[Fill]) {
        if self.capabilities.order_aware {
            for fill in fills {
                self.strategy.on_fill(fill);
            }
        }
    }

    fn finish(mut self, source: &str, signatures: Signatures, scan: ScanMetrics) -> ReplayReport {
        if let Some(bar) = self.bars.flush() {
            self.on_bar(bar);
        }
        self.strategy.shutdown();

        let deterministic = if self.deterministic {
            let canceled = self.executor.cancel_all(self.last_ts_ns, &mut self.wal);
            if canceled > 0 {
                debug!(canceled, "deferred opens canceled at end of run");
            }

            let snapshots = self.positions.snapshots();
            let violations = validate_snapshots(&snapshots);
            for violation in &violations {
                warn!(%violation, "invariant violated");
            }

            let slippage = self.rollover.as_ref().map_or(0.0, RolloverManager::slippage_total);
            let performance =
                MetricsCalculator::calculate(&self.positions, &self.equity, self.executor.statuses(), slippage);
            let (rollover_events, rollover_actions) = self
                .rollover
                .take()
                .map(RolloverManager::into_parts)
                .unwrap_or_default();

            Some(DeterministicReport {
                snapshots,
                performance,
                rollover_events,
                rollover_actions,
                rollover_slippage_total: slippage,
                violations,
            })
        } else {
            None
        };

        self.wal.flush();
        ReplayReport {
            source: source.to_string(),
            signatures,
            ticks_read: self.ticks_read,
            bars_emitted: self.bars_emitted,
            intents_emitted: self.intents_emitted,
            order_events: self.executor.statuses().total(),
            wal_records: self.wal.records_written(),
            instruments: self.instruments.into_iter().collect(),
            scan,
            deterministic,
        }
    }
}
