// =============================================================================
// Signal Router -- one bar in, one allocation vector out
// =============================================================================
//
// Per bar:
//   1. ingest the slice into the market context (single writer)
//   2. reconcile positions against fills, mark equity, update the breaker
//   3. evaluate every symbol slot: indicator -> regime -> decision
//      (sequential in symbol order, or concurrently across symbols)
//   4. single-writer portfolio step in symbol order: exits, sizing, breaker
//      gate, rank cut, hedge, exposure caps, order deltas, stops, diagnostics
//
// Step 3 is the only part that may run in parallel; both entry points feed
// the same step 4 and produce identical output.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::diagnostics::{
    BarOutput, DiagnosticRecord, OrderDelta, ReasonTag, StopOrderSpec, TargetAllocation, TelemetrySink,
};
use crate::exit::{ExitReason, RiskOverlay};
use crate::market_data::MarketContext;
use crate::position_engine::{FillOutcome, Position, PositionBook, SIZE_EPSILON};
use crate::reconcile::{self, ReconcileAlert, ReconcileConfig, ReconcileKind};
use crate::regime::{RegimeClassifier, RegimeState, RegimeZone};
use crate::risk::{DrawdownBreaker, PortfolioState};
use crate::router::portfolio::{apply_constraints, PortfolioConstraints, Proposal};
use crate::router::slot::{SlotPolicy, SymbolEvaluation, SymbolSlot};
use crate::runtime_config::RuntimeConfig;
use crate::strategy::{IssuedTarget, PositionSizer, TradeAction};
use crate::types::{BarSlice, Fill, Side};

/// Per-symbol outcome of the portfolio step, kept for diagnostics.
struct SymbolOutcome {
    zone: Option<RegimeZone>,
    confidence: f64,
    /// Indicator value when this bar's reading is valid.
    value: Option<f64>,
    exit: Option<ExitReason>,
    entry_blocked: bool,
    reason: ReasonTag,
}

pub struct SignalRouter {
    strategy: String,
    ctx: Arc<MarketContext>,
    /// Sorted by symbol; this order is the deterministic evaluation order.
    slots: Vec<Arc<Mutex<SymbolSlot>>>,
    policy: Arc<SlotPolicy>,
    sizer: PositionSizer,
    overlay: RiskOverlay,
    breaker: DrawdownBreaker,
    constraints: PortfolioConstraints,
    reconcile_cfg: ReconcileConfig,
    book: PositionBook,
    issued: BTreeMap<String, IssuedTarget>,
    pending_alerts: Vec<ReconcileAlert>,
    telemetry: TelemetrySink,
    bars_processed: u64,
}

impl SignalRouter {
    /// Build a router from a validated configuration.
    pub fn new(cfg: &RuntimeConfig, initial_equity: f64) -> Result<Self> {
        cfg.validate()?;
        if !(initial_equity > 0.0 && initial_equity.is_finite()) {
            anyhow::bail!("initial equity must be positive, got {initial_equity}");
        }

        let mut universe = cfg.universe.clone();
        universe.sort();
        universe.dedup();

        let capacity = cfg
            .indicator
            .required_history()
            .max(cfg.features.lookback + 1);
        let mut ctx = MarketContext::new(capacity, cfg.max_bar_gap_secs);
        for symbol in &universe {
            ctx.track(symbol);
        }
        for symbol in cfg.indicator.reference_symbols() {
            ctx.track(&symbol);
        }
        if let Some(h) = &cfg.portfolio.hedge {
            ctx.track(&h.index_symbol);
        }

        let slots = universe
            .iter()
            .map(|s| Arc::new(Mutex::new(SymbolSlot::new(s, &cfg.indicator))))
            .collect();

        info!(
            strategy = %cfg.strategy,
            indicator = %cfg.indicator.kind(),
            symbols = ?universe,
            window = capacity,
            "SignalRouter initialised"
        );

        Ok(Self {
            strategy: cfg.strategy.clone(),
            ctx: Arc::new(ctx),
            slots,
            policy: Arc::new(SlotPolicy {
                classifier: RegimeClassifier::new(cfg.profile.clone()),
                table: cfg.actions.clone(),
                features: cfg.features,
            }),
            sizer: PositionSizer::new(cfg.sizing),
            overlay: RiskOverlay::new(cfg.exits),
            breaker: DrawdownBreaker::new(cfg.drawdown, initial_equity),
            constraints: cfg.portfolio.clone(),
            reconcile_cfg: cfg.reconcile,
            book: PositionBook::new(),
            issued: BTreeMap::new(),
            pending_alerts: Vec::new(),
            telemetry: TelemetrySink::new(cfg.telemetry_capacity),
            bars_processed: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn symbols(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.lock().symbol().to_string()).collect()
    }

    pub fn regime(&self, symbol: &str) -> Option<RegimeState> {
        self.slots
            .iter()
            .map(|s| s.lock())
            .find(|s| s.symbol() == symbol)
            .map(|s| s.regime().clone())
    }

    pub fn positions(&self) -> &PositionBook {
        &self.book
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.book.get(symbol)
    }

    pub fn portfolio(&self) -> &PortfolioState {
        self.breaker.portfolio()
    }

    pub fn breaker(&self) -> &DrawdownBreaker {
        &self.breaker
    }

    pub fn telemetry(&self) -> TelemetrySink {
        self.telemetry.clone()
    }

    pub fn market(&self) -> &MarketContext {
        &self.ctx
    }

    pub fn bars_processed(&self) -> u64 {
        self.bars_processed
    }

    // -------------------------------------------------------------------------
    // Fills
    // -------------------------------------------------------------------------

    /// Apply fill confirmations from the execution collaborator. Fills that
    /// match no position are reported with the next bar's output.
    pub fn apply_fills(&mut self, fills: &[Fill]) {
        for fill in fills {
            if self.book.apply_fill(fill) == FillOutcome::Untracked {
                self.pending_alerts
                    .push(reconcile::unexpected_fill(&fill.symbol, fill.filled_size, fill.timestamp));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bar processing
    // -------------------------------------------------------------------------

    /// Sequential, deterministic evaluation of one slice.
    pub fn process_bar(&mut self, slice: &BarSlice, equity: f64) -> BarOutput {
        let out = self.begin_bar(slice, equity);
        let ctx = Arc::clone(&self.ctx);
        let evals: Vec<SymbolEvaluation> = self
            .slots
            .iter()
            .map(|slot| slot.lock().evaluate(&ctx, &self.policy))
            .collect();
        drop(ctx);
        self.finish_bar(evals, out)
    }

    /// Same as [`process_bar`](Self::process_bar), with the per-symbol slot
    /// evaluations run concurrently on the blocking pool.
    pub async fn process_bar_concurrent(&mut self, slice: &BarSlice, equity: f64) -> BarOutput {
        let out = self.begin_bar(slice, equity);

        let tasks = self.slots.iter().map(|slot| {
            let slot = Arc::clone(slot);
            let ctx = Arc::clone(&self.ctx);
            let policy = Arc::clone(&self.policy);
            tokio::task::spawn_blocking(move || {
                let eval = slot.lock().evaluate(&ctx, &policy);
                eval
            })
        });
        let results = join_all(tasks).await;

        let mut evals = Vec::with_capacity(results.len());
        for (slot, result) in self.slots.iter().zip(results) {
            match result {
                Ok(eval) => evals.push(eval),
                Err(e) => {
                    let slot = slot.lock();
                    error!(symbol = %slot.symbol(), error = %e, "Slot evaluation failed");
                    evals.push(slot.skipped(&self.ctx));
                }
            }
        }
        self.finish_bar(evals, out)
    }

    /// Steps 1-2: ingest, reconcile, mark equity.
    fn begin_bar(&mut self, slice: &BarSlice, equity: f64) -> BarOutput {
        let ts = slice.timestamp;
        let mut out = BarOutput::new(ts);

        let rejected = Arc::make_mut(&mut self.ctx).ingest(slice);
        if !rejected.is_empty() {
            debug!(timestamp = %ts, symbols = ?rejected, "Rejected bars left out of evaluation");
        }

        let result = reconcile::reconcile(&mut self.book, &self.reconcile_cfg, ts);
        for alert in &result.alerts {
            if alert.kind == ReconcileKind::NotOpened {
                self.issued.remove(&alert.symbol);
            } else if let Some(t) = self.issued.get_mut(&alert.symbol) {
                t.weight = alert.actual;
            }
        }
        out.reconcile_alerts = std::mem::take(&mut self.pending_alerts);
        out.reconcile_alerts.extend(result.alerts);

        if let Some(event) = self.breaker.update(equity, ts) {
            out.risk_events.push(event);
        }
        out.drawdown = self.breaker.portfolio().drawdown;
        out.breaker_tripped = self.breaker.is_tripped();
        out
    }

    /// Step 4: the single-writer portfolio step.
    fn finish_bar(&mut self, evals: Vec<SymbolEvaluation>, mut out: BarOutput) -> BarOutput {
        let ts = out.timestamp;
        let entries_allowed = self.breaker.allows_entries();

        let mut proposals: BTreeMap<String, Proposal> = BTreeMap::new();
        let mut outcomes: BTreeMap<String, SymbolOutcome> = BTreeMap::new();

        for eval in &evals {
            let symbol = eval.symbol.as_str();
            let current = self.book.requested_weight(symbol);
            let held = self.held_weight(symbol, current);
            let zone = eval.regime.zone;
            let confidence = eval.regime.confidence;
            let value = eval.reading.valid.then_some(eval.reading.value);

            let exit = match (self.book.get_mut(symbol), eval.close) {
                (Some(pos), Some(close)) => self.overlay.evaluate(pos, close, zone, value),
                _ => None,
            };

            let mut entry_blocked = false;
            let (weight, trigger) = if let Some(signal) = exit {
                let remaining = signal.remaining(held);
                if let Some(t) = self.issued.get_mut(symbol) {
                    t.trim(remaining);
                }
                (remaining, signal.reason.to_string())
            } else {
                match eval.decision.action {
                    TradeAction::EnterLong | TradeAction::EnterShort => {
                        let side = if eval.decision.action == TradeAction::EnterLong {
                            Side::Long
                        } else {
                            Side::Short
                        };
                        let desired = self.sizer.target(side, confidence, eval.decision.size_scale);
                        let zone_now = zone.unwrap_or(RegimeZone::Transition);
                        let same_side = Side::from_size(current) == Some(side);

                        if !same_side {
                            if entries_allowed {
                                self.issued
                                    .insert(symbol.to_string(), IssuedTarget::new(desired, zone_now));
                                (desired, eval.decision.action.to_string())
                            } else {
                                entry_blocked = true;
                                (0.0, "BLOCKED".to_string())
                            }
                        } else if let Some(next) =
                            self.sizer
                                .reissue(self.issued.get(symbol).copied(), desired, zone_now)
                        {
                            if next.weight.abs() > held.abs() && !entries_allowed {
                                entry_blocked = true;
                                (held, "BLOCKED".to_string())
                            } else {
                                self.issued.insert(symbol.to_string(), next);
                                (next.weight, "RESIZE".to_string())
                            }
                        } else {
                            (held, "HOLD".to_string())
                        }
                    }
                    TradeAction::Exit => (0.0, TradeAction::Exit.to_string()),
                    TradeAction::Hold => (held, TradeAction::Hold.to_string()),
                }
            };

            proposals.insert(
                symbol.to_string(),
                Proposal {
                    weight,
                    score: eval.reading.value,
                },
            );
            outcomes.insert(
                symbol.to_string(),
                SymbolOutcome {
                    zone,
                    confidence,
                    value,
                    exit: exit.map(|s| s.reason),
                    entry_blocked,
                    reason: ReasonTag {
                        regime: if eval.regime.label.is_empty() {
                            "UNCLASSIFIED".to_string()
                        } else {
                            eval.regime.label.clone()
                        },
                        confidence,
                        trigger,
                    },
                },
            );
        }

        let mut targets: BTreeMap<String, f64> = BTreeMap::new();
        let report = apply_constraints(&self.constraints, &proposals, &mut targets);
        for symbol in &report.ranked_out {
            if let Some(o) = outcomes.get_mut(symbol) {
                o.reason.trigger = "RANK_CUT".to_string();
            }
        }

        // Orders and position requests, in symbol order.
        for (symbol, &target) in &targets {
            let current = self.book.requested_weight(symbol);
            let reason = match outcomes.get(symbol) {
                Some(o) => o.reason.clone(),
                None => ReasonTag {
                    regime: "HEDGE".to_string(),
                    confidence: 1.0,
                    trigger: "HEDGE".to_string(),
                },
            };
            let (zone, confidence, value) = outcomes
                .get(symbol)
                .map(|o| (o.zone.unwrap_or(RegimeZone::Transition), o.confidence, o.value))
                .unwrap_or((RegimeZone::Transition, 1.0, None));

            if (target - current).abs() > SIZE_EPSILON {
                out.orders.push(OrderDelta {
                    symbol: symbol.clone(),
                    from_weight: current,
                    to_weight: target,
                    delta: target - current,
                    reason: reason.clone(),
                });
                self.request(symbol, target, (zone, confidence, value), ts);
            }
            if target.abs() <= SIZE_EPSILON {
                self.issued.remove(symbol);
            }

            out.allocations.push(TargetAllocation {
                symbol: symbol.clone(),
                target_weight: target,
                reason,
            });
        }

        for pos in self.book.iter().filter(|p| p.is_filled()) {
            if let Some(stop_price) = pos.stop_level {
                out.stops.push(StopOrderSpec {
                    symbol: pos.symbol.clone(),
                    position_id: pos.id,
                    stop_price,
                    take_profit_price: self.overlay.take_profit_price(pos),
                    size: pos.size,
                });
            }
        }

        for eval in &evals {
            let outcome = outcomes.get(&eval.symbol);
            out.diagnostics.push(DiagnosticRecord {
                timestamp: ts,
                symbol: eval.symbol.clone(),
                indicator: eval.reading.kind,
                value: eval.reading.value,
                valid: eval.reading.valid,
                zone: eval.regime.zone,
                regime: eval.regime.label.clone(),
                confidence: eval.regime.confidence,
                stale_bars: eval.regime.stale_bars,
                action: eval.decision.action,
                exit: outcome.and_then(|o| o.exit),
                entry_blocked: outcome.is_some_and(|o| o.entry_blocked),
            });
        }
        self.telemetry.publish(&out.diagnostics);
        self.bars_processed += 1;

        debug!(
            timestamp = %ts,
            orders = out.orders.len(),
            gross = format!("{:.4}", out.gross_weight()),
            scale = format!("{:.4}", report.scale),
            drawdown = format!("{:.4}", out.drawdown),
            breaker = out.breaker_tripped,
            "Bar processed"
        );
        out
    }

    /// Pre-constraint weight held for `symbol`. Caps apply to this value,
    /// never to the already capped request in the book.
    fn held_weight(&self, symbol: &str, current: f64) -> f64 {
        match self.issued.get(symbol) {
            Some(t) if current.abs() > SIZE_EPSILON && t.weight * current > 0.0 => t.weight,
            _ => current,
        }
    }

    /// Move the book's request for `symbol` to `target`. `entry` is the
    /// regime zone, confidence and indicator value stamped on a new or
    /// flipped position.
    fn request(
        &mut self,
        symbol: &str,
        target: f64,
        entry: (RegimeZone, f64, Option<f64>),
        ts: DateTime<Utc>,
    ) {
        let (zone, confidence, value) = entry;
        match self.book.get_mut(symbol) {
            None => {
                if target.abs() > SIZE_EPSILON {
                    self.book.open_requested(symbol, target, zone, confidence, ts);
                    if let Some(pos) = self.book.get_mut(symbol) {
                        pos.entry_value = value;
                    }
                }
            }
            Some(pos) => {
                if target.abs() <= SIZE_EPSILON && pos.size.abs() <= SIZE_EPSILON {
                    // Entry never filled; cancel the request outright.
                    self.book.remove(symbol);
                    return;
                }
                let flips = pos.requested_size * target < 0.0;
                if flips {
                    pos.entry_zone = zone;
                    pos.entry_confidence = confidence;
                    pos.entry_value = value;
                }
                self.book.set_requested(symbol, target);
            }
        }
    }
}

impl std::fmt::Debug for SignalRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRouter")
            .field("strategy", &self.strategy)
            .field("symbols", &self.slots.len())
            .field("open_positions", &self.book.len())
            .field("bars_processed", &self.bars_processed)
            .finish()
    }
}
