// =============================================================================
// Position Engine -- requested vs confirmed exposure per symbol
// =============================================================================
//
// Life-cycle:
//   open_requested  ->  (fills)  ->  resized / reduced  ->  removed at zero
//
// Sizes are signed fractions of portfolio equity. `requested_size` is what the
// core last asked for; `size` is what fill confirmations say is held. The two
// differ while orders are in flight or when the collaborator fails to execute;
// reconciliation compares them every bar.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::regime::RegimeZone;
use crate::types::{Fill, Side};

/// Sizes below this are treated as flat.
pub const SIZE_EPSILON: f64 = 1e-9;

/// Namespace for deterministic position ids.
const POSITION_NAMESPACE: Uuid = Uuid::from_u128(0x5d1c_2f3a_9b7e_4c61_a0f4_6e2b_8d13_c907);

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

/// A single tracked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Deterministic UUID v5 of (symbol, opened_at, sequence).
    pub id: Uuid,
    pub symbol: String,
    /// Signed weight the core last requested.
    pub requested_size: f64,
    /// Signed weight confirmed by fills.
    pub size: f64,
    /// Volume-weighted fill price; 0 until the first fill.
    pub entry_price: f64,
    pub entry_zone: RegimeZone,
    pub entry_confidence: f64,
    /// Indicator value on the bar the position was requested.
    #[serde(default)]
    pub entry_value: Option<f64>,
    /// Protective stop; `None` until the entry price is known.
    #[serde(default)]
    pub stop_level: Option<f64>,
    /// Most favourable price seen since the first fill.
    #[serde(default)]
    pub high_water: f64,
    #[serde(default)]
    pub profit_taken: bool,
    /// Set once per Transition episode.
    #[serde(default)]
    pub uncertainty_reduced: bool,
    pub opened_at: DateTime<Utc>,
    /// Consecutive bars with |requested - size| above tolerance.
    #[serde(default)]
    pub mismatch_bars: u32,
}

impl Position {
    /// Direction of the confirmed size, or of the request while unfilled.
    pub fn side(&self) -> Option<Side> {
        Side::from_size(self.size).or_else(|| Side::from_size(self.requested_size))
    }

    pub fn is_filled(&self) -> bool {
        self.size.abs() > SIZE_EPSILON && self.entry_price > 0.0
    }

    /// Signed fractional gain of `price` against the entry price.
    pub fn gain(&self, price: f64) -> f64 {
        match self.side() {
            Some(side) if self.entry_price > 0.0 => side.sign() * (price / self.entry_price - 1.0),
            _ => 0.0,
        }
    }
}

/// Result of applying one fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Updated,
    Closed,
    /// Fill for a symbol with no tracked position.
    Untracked,
}

// ---------------------------------------------------------------------------
// Position Book
// ---------------------------------------------------------------------------

/// Open positions keyed by symbol. Owned by the router's single-writer step.
#[derive(Debug, Default, Clone)]
pub struct PositionBook {
    open: BTreeMap<String, Position>,
    sequence: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.open.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.open.get_mut(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.open.values_mut()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Weight currently intended for `symbol` (0 when flat).
    pub fn requested_weight(&self, symbol: &str) -> f64 {
        self.open.get(symbol).map(|p| p.requested_size).unwrap_or(0.0)
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Record a new entry request. Returns the position id.
    pub fn open_requested(
        &mut self,
        symbol: &str,
        requested_size: f64,
        zone: RegimeZone,
        confidence: f64,
        opened_at: DateTime<Utc>,
    ) -> Uuid {
        self.sequence += 1;
        let id = Uuid::new_v5(
            &POSITION_NAMESPACE,
            format!("{}|{}|{}", symbol, opened_at.to_rfc3339(), self.sequence).as_bytes(),
        );
        let pos = Position {
            id,
            symbol: symbol.to_string(),
            requested_size,
            size: 0.0,
            entry_price: 0.0,
            entry_zone: zone,
            entry_confidence: confidence,
            entry_value: None,
            stop_level: None,
            high_water: 0.0,
            profit_taken: false,
            uncertainty_reduced: false,
            opened_at,
            mismatch_bars: 0,
        };
        info!(
            id = %id,
            symbol,
            requested = format!("{:.4}", requested_size),
            zone = %zone,
            confidence = format!("{:.4}", confidence),
            "Position requested"
        );
        self.open.insert(symbol.to_string(), pos);
        id
    }

    /// Change the requested weight of an existing position.
    pub fn set_requested(&mut self, symbol: &str, requested_size: f64) {
        if let Some(pos) = self.open.get_mut(symbol) {
            debug!(
                symbol,
                from = format!("{:.4}", pos.requested_size),
                to = format!("{:.4}", requested_size),
                "Position request resized"
            );
            pos.requested_size = requested_size;
        }
    }

    /// Drop a position without a fill (entry never executed).
    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.open.remove(symbol)
    }

    // -------------------------------------------------------------------------
    // Fills
    // -------------------------------------------------------------------------

    /// Apply a confirmed fill. Adding to a position moves the entry price to
    /// the size-weighted average; reducing keeps it. A position that is flat
    /// and has nothing further requested is removed.
    pub fn apply_fill(&mut self, fill: &Fill) -> FillOutcome {
        let Some(pos) = self.open.get_mut(&fill.symbol) else {
            return FillOutcome::Untracked;
        };
        if fill.filled_size == 0.0 || !fill.fill_price.is_finite() || fill.fill_price <= 0.0 {
            return FillOutcome::Updated;
        }

        let previous = pos.size;
        let updated = previous + fill.filled_size;
        let adding = previous.abs() <= SIZE_EPSILON || previous.signum() == fill.filled_size.signum();

        if adding {
            let prior_notional = previous.abs() * pos.entry_price;
            let notional = fill.filled_size.abs() * fill.fill_price;
            pos.entry_price = (prior_notional + notional) / updated.abs();
            if previous.abs() <= SIZE_EPSILON {
                pos.high_water = fill.fill_price;
            }
        } else if updated.abs() > SIZE_EPSILON && updated.signum() != previous.signum() {
            // Flipped through zero: the remainder is a fresh position.
            pos.entry_price = fill.fill_price;
            pos.high_water = fill.fill_price;
            pos.stop_level = None;
            pos.profit_taken = false;
            pos.uncertainty_reduced = false;
        }
        pos.size = updated;

        debug!(
            symbol = %fill.symbol,
            filled = format!("{:.4}", fill.filled_size),
            price = format!("{:.4}", fill.fill_price),
            size = format!("{:.4}", pos.size),
            entry = format!("{:.4}", pos.entry_price),
            "Fill applied"
        );

        if pos.size.abs() <= SIZE_EPSILON && pos.requested_size.abs() <= SIZE_EPSILON {
            let closed = self.open.remove(&fill.symbol);
            if let Some(closed) = closed {
                info!(
                    id = %closed.id,
                    symbol = %closed.symbol,
                    price = format!("{:.4}", fill.fill_price),
                    "Position closed"
                );
            }
            return FillOutcome::Closed;
        }
        FillOutcome::Updated
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn gross_exposure(&self) -> f64 {
        self.open.values().map(|p| p.size.abs()).sum()
    }

    pub fn net_exposure(&self) -> f64 {
        self.open.values().map(|p| p.size).sum()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.open.values().cloned().collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()
    }

    fn fill(symbol: &str, size: f64, price: f64) -> Fill {
        Fill {
            symbol: symbol.into(),
            filled_size: size,
            fill_price: price,
            timestamp: ts(),
        }
    }

    #[test]
    fn ids_are_deterministic() {
        let mut a = PositionBook::new();
        let mut b = PositionBook::new();
        let ia = a.open_requested("SPY", 0.2, RegimeZone::Low, 0.8, ts());
        let ib = b.open_requested("SPY", 0.2, RegimeZone::Low, 0.8, ts());
        assert_eq!(ia, ib);
        let ic = a.open_requested("QQQ", 0.2, RegimeZone::Low, 0.8, ts());
        assert_ne!(ia, ic);
    }

    #[test]
    fn entry_price_is_size_weighted() {
        let mut book = PositionBook::new();
        book.open_requested("SPY", 0.3, RegimeZone::Low, 1.0, ts());
        book.apply_fill(&fill("SPY", 0.1, 100.0));
        book.apply_fill(&fill("SPY", 0.2, 103.0));
        let pos = book.get("SPY").unwrap();
        assert!((pos.size - 0.3).abs() < 1e-12);
        assert!((pos.entry_price - 102.0).abs() < 1e-9);
        assert!(pos.is_filled());
    }

    #[test]
    fn reduction_keeps_entry_and_close_removes() {
        let mut book = PositionBook::new();
        book.open_requested("SPY", 0.2, RegimeZone::Low, 1.0, ts());
        book.apply_fill(&fill("SPY", 0.2, 100.0));
        book.set_requested("SPY", 0.1);
        assert_eq!(book.apply_fill(&fill("SPY", -0.1, 110.0)), FillOutcome::Updated);
        assert!((book.get("SPY").unwrap().entry_price - 100.0).abs() < 1e-12);

        book.set_requested("SPY", 0.0);
        assert_eq!(book.apply_fill(&fill("SPY", -0.1, 111.0)), FillOutcome::Closed);
        assert!(book.is_empty());
    }

    #[test]
    fn short_gain_is_positive_when_price_falls() {
        let mut book = PositionBook::new();
        book.open_requested("XLE", -0.1, RegimeZone::Low, 1.0, ts());
        book.apply_fill(&fill("XLE", -0.1, 50.0));
        let pos = book.get("XLE").unwrap();
        assert_eq!(pos.side(), Some(Side::Short));
        assert!((pos.gain(45.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn untracked_fill_is_reported() {
        let mut book = PositionBook::new();
        assert_eq!(book.apply_fill(&fill("IWM", 0.1, 10.0)), FillOutcome::Untracked);
    }

    #[test]
    fn exposure_sums() {
        let mut book = PositionBook::new();
        book.open_requested("A", 0.2, RegimeZone::High, 1.0, ts());
        book.open_requested("B", -0.1, RegimeZone::Low, 1.0, ts());
        book.apply_fill(&fill("A", 0.2, 10.0));
        book.apply_fill(&fill("B", -0.1, 10.0));
        assert!((book.gross_exposure() - 0.3).abs() < 1e-12);
        assert!((book.net_exposure() - 0.1).abs() < 1e-12);
    }
}
