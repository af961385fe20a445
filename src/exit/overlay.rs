// =============================================================================
// Risk Overlay -- per-position exit evaluation
// =============================================================================
//
// Evaluated once per bar for every filled position, in fixed priority order.
// At most one exit fires per position per bar:
//
//   1. Stop-loss / trailing stop hit      -> full exit
//   2. Profit target reached (once)       -> partial (or full) take
//   3. Indicator fell from its entry value, in profit -> full exit
//   4. Regime flipped to the opposite     -> full exit
//   5. Regime in Transition (once/episode) -> partial reduction
//
// The portfolio drawdown breaker is separate (see `risk`).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::exit::trailing::{self, TrailingStopConfig};
use crate::position_engine::Position;
use crate::regime::RegimeZone;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Fixed stop distance from entry (fraction). 0 disables the hard stop.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Gain (fraction) that triggers the profit take. 0 disables it.
    #[serde(default)]
    pub take_profit_pct: f64,
    /// Share of the position closed at the profit target.
    #[serde(default = "default_take_fraction")]
    pub take_fraction: f64,
    #[serde(default)]
    pub trailing: Option<TrailingStopConfig>,
    /// Share of the position shed on entering Transition. 0 disables it.
    #[serde(default)]
    pub uncertainty_reduce_fraction: f64,
    /// Close on a flip to the opposite extreme zone.
    #[serde(default = "default_true")]
    pub exit_on_reversal: bool,
    /// Close a profitable position once the indicator has fallen this far
    /// below its value at entry.
    #[serde(default)]
    pub indicator_drop_exit: Option<f64>,
}

fn default_stop_loss_pct() -> f64 {
    0.03
}
fn default_take_fraction() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: 0.0,
            take_fraction: default_take_fraction(),
            trailing: None,
            uncertainty_reduce_fraction: 0.0,
            exit_on_reversal: true,
            indicator_drop_exit: None,
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..1.0).contains(&self.stop_loss_pct) {
            anyhow::bail!("stop_loss_pct must be within [0, 1)");
        }
        if !(self.take_profit_pct >= 0.0) {
            anyhow::bail!("take_profit_pct must be >= 0");
        }
        if !(self.take_fraction > 0.0 && self.take_fraction <= 1.0) {
            anyhow::bail!("take_fraction must be within (0, 1]");
        }
        if !(0.0..=1.0).contains(&self.uncertainty_reduce_fraction) {
            anyhow::bail!("uncertainty_reduce_fraction must be within [0, 1]");
        }
        if let Some(t) = &self.trailing {
            t.validate()?;
        }
        if let Some(drop) = self.indicator_drop_exit {
            if !(drop > 0.0 && drop.is_finite()) {
                anyhow::bail!("indicator_drop_exit must be positive, got {drop}");
            }
        }
        Ok(())
    }
}

/// Why an exit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    ProfitTake,
    SignalFade,
    RegimeReversal,
    Uncertainty,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TrailingStop => write!(f, "TRAILING_STOP"),
            Self::ProfitTake => write!(f, "PROFIT_TAKE"),
            Self::SignalFade => write!(f, "SIGNAL_FADE"),
            Self::RegimeReversal => write!(f, "REGIME_REVERSAL"),
            Self::Uncertainty => write!(f, "UNCERTAINTY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub reason: ExitReason,
    /// Share of the current position to close, in (0, 1].
    pub fraction: f64,
}

impl ExitSignal {
    pub fn is_full(&self) -> bool {
        self.fraction >= 1.0
    }

    /// Weight left after applying this exit to `weight`.
    pub fn remaining(&self, weight: f64) -> f64 {
        if self.is_full() {
            0.0
        } else {
            weight * (1.0 - self.fraction)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RiskOverlay {
    cfg: ExitConfig,
}

impl RiskOverlay {
    pub fn new(cfg: ExitConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.cfg
    }

    /// Profit target price for an open position, if one is still pending.
    pub fn take_profit_price(&self, pos: &Position) -> Option<f64> {
        let side = pos.side()?;
        if self.cfg.take_profit_pct <= 0.0 || pos.profit_taken || pos.entry_price <= 0.0 {
            return None;
        }
        Some(pos.entry_price * (1.0 + side.sign() * self.cfg.take_profit_pct))
    }

    /// Update stops and high-water for the bar, then return the single
    /// highest-priority exit, if any. Unfilled positions are skipped.
    ///
    /// `value` is this bar's indicator value when the reading is valid.
    pub fn evaluate(
        &self,
        pos: &mut Position,
        price: f64,
        zone: Option<RegimeZone>,
        value: Option<f64>,
    ) -> Option<ExitSignal> {
        if !pos.is_filled() || !price.is_finite() || price <= 0.0 {
            return None;
        }
        let side = pos.side()?;

        let hard_stop = (self.cfg.stop_loss_pct > 0.0)
            .then(|| trailing::initial_stop(side, pos.entry_price, self.cfg.stop_loss_pct));
        if pos.stop_level.is_none() {
            pos.stop_level = hard_stop;
        }

        pos.high_water = if pos.high_water > 0.0 {
            trailing::favourable(side, pos.high_water, price)
        } else {
            price
        };

        if let Some(trail) = &self.cfg.trailing {
            if let Some(level) = trail.trail_level(side, pos.entry_price, pos.high_water) {
                pos.stop_level = Some(trailing::ratchet(side, pos.stop_level, level));
            }
            if trail.breakeven_after_profit_take && pos.profit_taken {
                pos.stop_level = Some(trailing::ratchet(side, pos.stop_level, pos.entry_price));
            }
        }

        // A new extreme zone starts a fresh uncertainty episode.
        if zone.is_some_and(RegimeZone::is_extreme) {
            pos.uncertainty_reduced = false;
        }

        let gain = pos.gain(price);
        let signal = self.select(pos, side, price, gain, hard_stop, zone, value);

        match signal {
            Some(s) => {
                match s.reason {
                    ExitReason::ProfitTake => pos.profit_taken = true,
                    ExitReason::Uncertainty => pos.uncertainty_reduced = true,
                    _ => {}
                }
                info!(
                    symbol = %pos.symbol,
                    reason = %s.reason,
                    fraction = format!("{:.2}", s.fraction),
                    price = format!("{:.4}", price),
                    gain = format!("{:.4}", gain),
                    "Exit triggered"
                );
            }
            None => debug!(
                symbol = %pos.symbol,
                price = format!("{:.4}", price),
                stop = format!("{:.4}", pos.stop_level.unwrap_or(0.0)),
                high_water = format!("{:.4}", pos.high_water),
                "Position held"
            ),
        }
        signal
    }

    fn select(
        &self,
        pos: &Position,
        side: Side,
        price: f64,
        gain: f64,
        hard_stop: Option<f64>,
        zone: Option<RegimeZone>,
        value: Option<f64>,
    ) -> Option<ExitSignal> {
        // 1. stop
        if let Some(stop) = pos.stop_level {
            if trailing::is_hit(side, stop, price) {
                let moved = hard_stop.map_or(true, |h| (stop - h).abs() > f64::EPSILON * stop.abs());
                let reason = if moved {
                    ExitReason::TrailingStop
                } else {
                    ExitReason::StopLoss
                };
                return Some(ExitSignal { reason, fraction: 1.0 });
            }
        }

        // 2. profit take
        if self.cfg.take_profit_pct > 0.0 && !pos.profit_taken && gain >= self.cfg.take_profit_pct {
            return Some(ExitSignal {
                reason: ExitReason::ProfitTake,
                fraction: self.cfg.take_fraction,
            });
        }

        // 3. indicator fade
        if let (Some(drop), Some(entry), Some(now)) = (self.cfg.indicator_drop_exit, pos.entry_value, value) {
            if gain > 0.0 && entry - now > drop {
                return Some(ExitSignal {
                    reason: ExitReason::SignalFade,
                    fraction: 1.0,
                });
            }
        }

        // 4. reversal
        if self.cfg.exit_on_reversal && zone.is_some() && zone == pos.entry_zone.opposite() {
            return Some(ExitSignal {
                reason: ExitReason::RegimeReversal,
                fraction: 1.0,
            });
        }

        // 5. uncertainty
        if zone == Some(RegimeZone::Transition)
            && self.cfg.uncertainty_reduce_fraction > 0.0
            && !pos.uncertainty_reduced
        {
            return Some(ExitSignal {
                reason: ExitReason::Uncertainty,
                fraction: self.cfg.uncertainty_reduce_fraction,
            });
        }
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_engine::PositionBook;
    use crate::types::Fill;
    use chrono::{TimeZone, Utc};

    fn filled(symbol: &str, size: f64, price: f64, zone: RegimeZone) -> Position {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap();
        let mut book = PositionBook::new();
        book.open_requested(symbol, size, zone, 0.8, ts);
        book.apply_fill(&Fill {
            symbol: symbol.into(),
            filled_size: size,
            fill_price: price,
            timestamp: ts,
        });
        book.remove(symbol).unwrap()
    }

    fn entropy_exits() -> RiskOverlay {
        RiskOverlay::new(ExitConfig {
            stop_loss_pct: 0.03,
            take_profit_pct: 0.05,
            take_fraction: 0.5,
            trailing: Some(TrailingStopConfig::new(0.02, 0.02).with_breakeven()),
            uncertainty_reduce_fraction: 0.5,
            exit_on_reversal: true,
            indicator_drop_exit: None,
        })
    }

    #[test]
    fn hard_stop_fires_first() {
        let overlay = entropy_exits();
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::Low);
        // Reversal and stop on the same bar: stop wins.
        let s = overlay.evaluate(&mut pos, 96.5, Some(RegimeZone::High), None).unwrap();
        assert_eq!(s.reason, ExitReason::StopLoss);
        assert!(s.is_full());
    }

    #[test]
    fn profit_take_is_partial_and_once() {
        let overlay = entropy_exits();
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::Low);
        let s = overlay.evaluate(&mut pos, 105.5, Some(RegimeZone::Low), None).unwrap();
        assert_eq!(s.reason, ExitReason::ProfitTake);
        assert!((s.remaining(0.3) - 0.15).abs() < 1e-12);
        assert!(pos.profit_taken);
        assert!(overlay.evaluate(&mut pos, 105.6, Some(RegimeZone::Low), None).is_none());
        // Breakeven or better after the take.
        assert!(pos.stop_level.unwrap() >= 100.0);
    }

    #[test]
    fn trailing_stop_follows_high_water() {
        let overlay = entropy_exits();
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::Low);
        assert!(overlay.evaluate(&mut pos, 104.0, Some(RegimeZone::Low), None).is_none());
        let stop = pos.stop_level.unwrap();
        assert!((stop - 104.0 * 0.98).abs() < 1e-9);
        let s = overlay.evaluate(&mut pos, 101.5, Some(RegimeZone::Low), None).unwrap();
        assert_eq!(s.reason, ExitReason::TrailingStop);
    }

    #[test]
    fn reversal_closes_fully() {
        let overlay = entropy_exits();
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::Low);
        let s = overlay.evaluate(&mut pos, 100.5, Some(RegimeZone::High), None).unwrap();
        assert_eq!(s.reason, ExitReason::RegimeReversal);
        assert_eq!(s.remaining(0.3), 0.0);
    }

    #[test]
    fn uncertainty_reduces_once_per_episode() {
        let overlay = entropy_exits();
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::Low);
        let s = overlay.evaluate(&mut pos, 100.2, Some(RegimeZone::Transition), None).unwrap();
        assert_eq!(s.reason, ExitReason::Uncertainty);
        assert!(overlay.evaluate(&mut pos, 100.3, Some(RegimeZone::Transition), None).is_none());
        // Back to an extreme, then Transition again: new episode.
        assert!(overlay.evaluate(&mut pos, 100.3, Some(RegimeZone::Low), None).is_none());
        let s = overlay.evaluate(&mut pos, 100.1, Some(RegimeZone::Transition), None).unwrap();
        assert_eq!(s.reason, ExitReason::Uncertainty);
    }

    #[test]
    fn shorts_are_symmetric() {
        let overlay = entropy_exits();
        let mut pos = filled("XLF", -0.1, 50.0, RegimeZone::Low);
        let s = overlay.evaluate(&mut pos, 51.6, Some(RegimeZone::Low), None).unwrap();
        assert_eq!(s.reason, ExitReason::StopLoss);

        let mut pos = filled("XLF", -0.1, 50.0, RegimeZone::Low);
        let s = overlay.evaluate(&mut pos, 47.4, Some(RegimeZone::Low), None).unwrap();
        assert_eq!(s.reason, ExitReason::ProfitTake);
    }

    #[test]
    fn unfilled_positions_are_skipped() {
        let overlay = entropy_exits();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap();
        let mut book = PositionBook::new();
        book.open_requested("SPY", 0.3, RegimeZone::Low, 0.8, ts);
        let pos = book.get_mut("SPY").unwrap();
        assert!(overlay.evaluate(pos, 50.0, Some(RegimeZone::High), None).is_none());
    }

    #[test]
    fn indicator_fade_exits_only_in_profit() {
        let overlay = RiskOverlay::new(ExitConfig {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            indicator_drop_exit: Some(0.15),
            ..ExitConfig::default()
        });
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::High);
        pos.entry_value = Some(0.72);

        // Drop of 0.10 is not enough.
        assert!(overlay.evaluate(&mut pos, 101.0, Some(RegimeZone::High), Some(0.62)).is_none());
        // Enough drop but under water.
        assert!(overlay.evaluate(&mut pos, 99.5, Some(RegimeZone::Transition), Some(0.50)).is_none());
        // No valid reading this bar.
        assert!(overlay.evaluate(&mut pos, 101.0, Some(RegimeZone::Transition), None).is_none());

        let s = overlay.evaluate(&mut pos, 101.0, Some(RegimeZone::Transition), Some(0.50)).unwrap();
        assert_eq!(s.reason, ExitReason::SignalFade);
        assert!(s.is_full());
    }

    #[test]
    fn profit_take_outranks_indicator_fade() {
        let overlay = RiskOverlay::new(ExitConfig {
            take_profit_pct: 0.04,
            indicator_drop_exit: Some(0.15),
            ..ExitConfig::default()
        });
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::High);
        pos.entry_value = Some(0.72);
        let s = overlay.evaluate(&mut pos, 104.5, Some(RegimeZone::Low), Some(0.30)).unwrap();
        assert_eq!(s.reason, ExitReason::ProfitTake);
    }

    #[test]
    fn non_positive_fade_threshold_is_rejected() {
        let cfg = ExitConfig {
            indicator_drop_exit: Some(0.0),
            ..ExitConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn take_profit_price_reported_until_taken() {
        let overlay = entropy_exits();
        let mut pos = filled("SPY", 0.3, 100.0, RegimeZone::Low);
        assert!((overlay.take_profit_price(&pos).unwrap() - 105.0).abs() < 1e-9);
        pos.profit_taken = true;
        assert_eq!(overlay.take_profit_price(&pos), None);
    }
}
