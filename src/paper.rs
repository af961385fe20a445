// =============================================================================
// Paper Broker -- simulated execution collaborator for replays and tests
// =============================================================================
//
// Fills every order delta in full at the bar close and marks equity with the
// held weights: equity × (1 + Σ wᵢ·rᵢ), rᵢ being the close-to-close return.
// The router never sees this type; it only receives equity and `Fill`s.
// =============================================================================

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::diagnostics::OrderDelta;
use crate::types::{BarSlice, Fill};

#[derive(Debug, Clone)]
pub struct PaperBroker {
    equity: f64,
    weights: BTreeMap<String, f64>,
    last_close: BTreeMap<String, f64>,
    fills: u64,
}

impl PaperBroker {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            equity: initial_equity,
            weights: BTreeMap::new(),
            last_close: BTreeMap::new(),
            fills: 0,
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn weight(&self, symbol: &str) -> f64 {
        self.weights.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn fill_count(&self) -> u64 {
        self.fills
    }

    /// Mark held weights to this slice's closes and return the new equity.
    /// Call before handing the slice to the router.
    pub fn mark(&mut self, slice: &BarSlice) -> f64 {
        let mut portfolio_return = 0.0;
        for (symbol, w) in &self.weights {
            let (Some(prev), Some(now)) = (self.last_close.get(symbol), slice.close(symbol)) else {
                continue;
            };
            if *prev > 0.0 && now.is_finite() {
                portfolio_return += w * (now / prev - 1.0);
            }
        }
        self.equity *= 1.0 + portfolio_return;

        for (symbol, bar) in &slice.bars {
            if bar.close.is_finite() && bar.close > 0.0 {
                self.last_close.insert(symbol.clone(), bar.close);
            }
        }
        self.equity
    }

    /// Fill order deltas at the latest close. Orders for a symbol that has
    /// never printed a price stay unfilled.
    pub fn execute(&mut self, orders: &[OrderDelta], slice: &BarSlice) -> Vec<Fill> {
        let mut fills = Vec::with_capacity(orders.len());
        for order in orders {
            let Some(price) = self.last_close.get(&order.symbol).copied() else {
                warn!(symbol = %order.symbol, "Paper fill skipped: no price");
                continue;
            };
            let weight = self.weights.entry(order.symbol.clone()).or_insert(0.0);
            *weight += order.delta;
            if weight.abs() < 1e-12 {
                self.weights.remove(&order.symbol);
            }
            self.fills += 1;

            debug!(
                symbol = %order.symbol,
                delta = format!("{:.4}", order.delta),
                price = format!("{:.4}", price),
                reason = %order.reason,
                "Paper fill"
            );
            fills.push(Fill {
                symbol: order.symbol.clone(),
                filled_size: order.delta,
                fill_price: price,
                timestamp: slice.timestamp,
            });
        }
        fills
    }
}
