// =============================================================================
// Stop levels -- fixed, breakeven and trailing
// =============================================================================
//
// Stops are absolute prices. For longs they only ever move up, for shorts only
// down. The trailing variant activates once the best price seen is at least
// `activation_gain` past entry and then sits `trail_pct` behind that price.

use serde::{Deserialize, Serialize};

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    /// Favourable move from entry (fraction) before trailing starts.
    #[serde(default = "default_activation_gain")]
    pub activation_gain: f64,
    /// Distance of the trail behind the high-water mark (fraction).
    #[serde(default = "default_trail_pct")]
    pub trail_pct: f64,
    /// Lift the stop to entry once a partial profit has been taken.
    #[serde(default)]
    pub breakeven_after_profit_take: bool,
}

fn default_activation_gain() -> f64 {
    0.02
}
fn default_trail_pct() -> f64 {
    0.02
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            activation_gain: default_activation_gain(),
            trail_pct: default_trail_pct(),
            breakeven_after_profit_take: false,
        }
    }
}

impl TrailingStopConfig {
    pub fn new(activation_gain: f64, trail_pct: f64) -> Self {
        Self {
            activation_gain,
            trail_pct,
            breakeven_after_profit_take: false,
        }
    }

    pub fn with_breakeven(mut self) -> Self {
        self.breakeven_after_profit_take = true;
        self
    }

    /// Trail price for the current high-water mark, once activated.
    pub fn trail_level(&self, side: Side, entry: f64, high_water: f64) -> Option<f64> {
        if entry <= 0.0 || high_water <= 0.0 {
            return None;
        }
        let best_gain = side.sign() * (high_water / entry - 1.0);
        if best_gain < self.activation_gain {
            return None;
        }
        Some(match side {
            Side::Long => high_water * (1.0 - self.trail_pct),
            Side::Short => high_water * (1.0 + self.trail_pct),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.activation_gain >= 0.0) {
            anyhow::bail!("trailing activation_gain must be >= 0");
        }
        if !(self.trail_pct > 0.0 && self.trail_pct < 1.0) {
            anyhow::bail!("trailing trail_pct must be within (0, 1)");
        }
        Ok(())
    }
}

/// Fixed stop `pct` against the position from `entry`.
pub fn initial_stop(side: Side, entry: f64, pct: f64) -> f64 {
    match side {
        Side::Long => entry * (1.0 - pct),
        Side::Short => entry * (1.0 + pct),
    }
}

/// Tighten `current` towards `candidate`; never loosens.
pub fn ratchet(side: Side, current: Option<f64>, candidate: f64) -> f64 {
    match (side, current) {
        (_, None) => candidate,
        (Side::Long, Some(c)) => c.max(candidate),
        (Side::Short, Some(c)) => c.min(candidate),
    }
}

pub fn is_hit(side: Side, stop: f64, price: f64) -> bool {
    match side {
        Side::Long => price <= stop,
        Side::Short => price >= stop,
    }
}

/// More favourable of the two prices for `side`.
pub fn favourable(side: Side, a: f64, b: f64) -> f64 {
    match side {
        Side::Long => a.max(b),
        Side::Short => a.min(b),
    }
}
