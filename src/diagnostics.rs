// =============================================================================
// Diagnostics -- per-bar outputs handed to the execution collaborator
// =============================================================================
//
// Everything the core emits for one bar is collected into a `BarOutput`:
// target allocations, order deltas, stop specifications, one diagnostic record
// per (symbol, indicator), risk events and reconciliation alerts.
//
// `TelemetrySink` keeps the most recent diagnostic records in a shared ring for
// readers outside the bar loop. Nothing inside the core reads it back.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exit::ExitReason;
use crate::reconcile::ReconcileAlert;
use crate::regime::RegimeZone;
use crate::risk::RiskEvent;
use crate::strategy::TradeAction;
use crate::types::IndicatorKind;

/// Default number of diagnostic records retained by the sink.
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Allocation outputs
// ---------------------------------------------------------------------------

/// Regime + confidence that justified a target weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonTag {
    pub regime: String,
    pub confidence: f64,
    /// What moved the weight this bar ("ENTER_LONG", "STOP_LOSS", "HEDGE", ...).
    pub trigger: String,
}

impl std::fmt::Display for ReasonTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:.2}:{}", self.regime, self.confidence, self.trigger)
    }
}

/// Target weight for one symbol, in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAllocation {
    pub symbol: String,
    pub target_weight: f64,
    pub reason: ReasonTag,
}

/// Weight change to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDelta {
    pub symbol: String,
    pub from_weight: f64,
    pub to_weight: f64,
    pub delta: f64,
    pub reason: ReasonTag,
}

/// Protective orders for an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderSpec {
    pub symbol: String,
    pub position_id: Uuid,
    pub stop_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<f64>,
    pub size: f64,
}

/// Opaque per-bar telemetry for one (symbol, indicator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub indicator: IndicatorKind,
    pub value: f64,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<RegimeZone>,
    pub regime: String,
    pub confidence: f64,
    pub stale_bars: u32,
    pub action: TradeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitReason>,
    /// Entry wanted but blocked by the drawdown breaker.
    #[serde(default)]
    pub entry_blocked: bool,
}

/// Everything produced for one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarOutput {
    pub timestamp: DateTime<Utc>,
    pub allocations: Vec<TargetAllocation>,
    pub orders: Vec<OrderDelta>,
    pub stops: Vec<StopOrderSpec>,
    pub diagnostics: Vec<DiagnosticRecord>,
    pub risk_events: Vec<RiskEvent>,
    pub reconcile_alerts: Vec<ReconcileAlert>,
    pub drawdown: f64,
    pub breaker_tripped: bool,
}

impl BarOutput {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            allocations: Vec::new(),
            orders: Vec::new(),
            stops: Vec::new(),
            diagnostics: Vec::new(),
            risk_events: Vec::new(),
            reconcile_alerts: Vec::new(),
            drawdown: 0.0,
            breaker_tripped: false,
        }
    }

    pub fn allocation(&self, symbol: &str) -> Option<&TargetAllocation> {
        self.allocations.iter().find(|a| a.symbol == symbol)
    }

    pub fn gross_weight(&self) -> f64 {
        self.allocations.iter().map(|a| a.target_weight.abs()).sum()
    }
}

// ---------------------------------------------------------------------------
// Telemetry sink
// ---------------------------------------------------------------------------

/// Shared ring of recent diagnostic records. Cloning shares the ring.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    records: Arc<RwLock<VecDeque<DiagnosticRecord>>>,
    version: Arc<AtomicU64>,
    capacity: usize,
}

impl TelemetrySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            version: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Append records, evicting the oldest beyond capacity.
    pub fn publish(&self, batch: &[DiagnosticRecord]) {
        if batch.is_empty() {
            return;
        }
        let mut records = self.records.write();
        records.extend(batch.iter().cloned());
        while records.len() > self.capacity {
            records.pop_front();
        }
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of publishes so far; readers poll it to detect new data.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Most recent `count` records, oldest first.
    pub fn recent(&self, count: usize) -> Vec<DiagnosticRecord> {
        let records = self.records.read();
        let skip = records.len().saturating_sub(count);
        records.iter().skip(skip).cloned().collect()
    }

    /// Most recent records for one symbol, oldest first.
    pub fn for_symbol(&self, symbol: &str, count: usize) -> Vec<DiagnosticRecord> {
        let records = self.records.read();
        let mut out: Vec<DiagnosticRecord> = records
            .iter()
            .rev()
            .filter(|r| r.symbol == symbol)
            .take(count)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new(DEFAULT_TELEMETRY_CAPACITY)
    }
}
