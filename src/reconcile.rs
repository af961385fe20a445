// =============================================================================
// Reconciliation -- requested exposure vs fill-confirmed exposure
// =============================================================================
//
// The core never assumes an order executed. Every bar each position's
// requested size is compared with what fills confirmed:
//
//   |requested - size| <= tolerance           -> matched, counter reset
//   mismatch for `max_mismatch_bars` bars     -> alert, then
//        never filled at all                  -> position dropped
//        otherwise                            -> request rebased to the
//                                                confirmed size
//
// Nothing here cancels orders or crashes the bar loop; alerts are returned to
// the collaborator.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::position_engine::{PositionBook, SIZE_EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Absolute weight difference treated as matched.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Consecutive mismatched bars before an alert.
    #[serde(default = "default_max_mismatch_bars")]
    pub max_mismatch_bars: u32,
}

fn default_tolerance() -> f64 {
    0.005
}
fn default_max_mismatch_bars() -> u32 {
    2
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            max_mismatch_bars: default_max_mismatch_bars(),
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.tolerance >= 0.0 && self.tolerance < 1.0) {
            anyhow::bail!("reconcile tolerance must be within [0, 1)");
        }
        if self.max_mismatch_bars == 0 {
            anyhow::bail!("max_mismatch_bars must be >= 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileKind {
    /// Entry requested but nothing was ever filled.
    NotOpened,
    /// Exit requested but the position is still held.
    NotClosed,
    /// Held size differs from the request.
    SizeMismatch,
    /// Fill for a symbol with no tracked position.
    UnexpectedFill,
}

impl std::fmt::Display for ReconcileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpened => write!(f, "NOT_OPENED"),
            Self::NotClosed => write!(f, "NOT_CLOSED"),
            Self::SizeMismatch => write!(f, "SIZE_MISMATCH"),
            Self::UnexpectedFill => write!(f, "UNEXPECTED_FILL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileAlert {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    #[serde(default)]
    pub position_id: Option<Uuid>,
    pub kind: ReconcileKind,
    pub requested: f64,
    pub actual: f64,
    pub bars: u32,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub positions_matched: u32,
    pub positions_pending: u32,
    pub alerts: Vec<ReconcileAlert>,
}

/// Run one reconciliation pass over the book.
pub fn reconcile(book: &mut PositionBook, cfg: &ReconcileConfig, timestamp: DateTime<Utc>) -> ReconcileResult {
    let mut result = ReconcileResult::default();
    let mut dropped: Vec<String> = Vec::new();

    for pos in book.iter_mut() {
        let drift = (pos.requested_size - pos.size).abs();
        if drift <= cfg.tolerance {
            pos.mismatch_bars = 0;
            result.positions_matched += 1;
            continue;
        }

        pos.mismatch_bars = pos.mismatch_bars.saturating_add(1);
        if pos.mismatch_bars < cfg.max_mismatch_bars {
            result.positions_pending += 1;
            debug!(
                symbol = %pos.symbol,
                requested = format!("{:.4}", pos.requested_size),
                actual = format!("{:.4}", pos.size),
                bars = pos.mismatch_bars,
                "Position awaiting fills"
            );
            continue;
        }

        let kind = if pos.size.abs() <= SIZE_EPSILON {
            ReconcileKind::NotOpened
        } else if pos.requested_size.abs() <= SIZE_EPSILON {
            ReconcileKind::NotClosed
        } else {
            ReconcileKind::SizeMismatch
        };

        warn!(
            symbol = %pos.symbol,
            id = %pos.id,
            kind = %kind,
            requested = format!("{:.4}", pos.requested_size),
            actual = format!("{:.4}", pos.size),
            bars = pos.mismatch_bars,
            "Reconciliation drift"
        );

        result.alerts.push(ReconcileAlert {
            timestamp,
            symbol: pos.symbol.clone(),
            position_id: Some(pos.id),
            kind,
            requested: pos.requested_size,
            actual: pos.size,
            bars: pos.mismatch_bars,
        });

        if kind == ReconcileKind::NotOpened {
            dropped.push(pos.symbol.clone());
        } else {
            pos.requested_size = pos.size;
            pos.mismatch_bars = 0;
        }
    }

    for symbol in dropped {
        book.remove(&symbol);
    }
    result
}

/// Alert for a fill the book could not attribute.
pub fn unexpected_fill(symbol: &str, filled: f64, timestamp: DateTime<Utc>) -> ReconcileAlert {
    warn!(symbol, filled = format!("{:.4}", filled), "Fill for untracked symbol");
    ReconcileAlert {
        timestamp,
        symbol: symbol.to_string(),
        position_id: None,
        kind: ReconcileKind::UnexpectedFill,
        requested: 0.0,
        actual: filled,
        bars: 0,
    }
}
