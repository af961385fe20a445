// =============================================================================
// Price features consulted by the decision table filters
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::stats::{mean, std_population};
use crate::market_data::BarWindow;

/// Bars per year used to annualise hourly return volatility.
const ANNUALISATION_BARS: f64 = 252.0 * 6.5;

/// Parameters for the price features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_feature_lookback")]
    pub lookback: usize,
    /// Breakout threshold = clamp(annualised vol × mult, min, max).
    #[serde(default = "default_breakout_vol_mult")]
    pub breakout_vol_mult: f64,
    #[serde(default = "default_breakout_min")]
    pub breakout_min: f64,
    #[serde(default = "default_breakout_max")]
    pub breakout_max: f64,
}

fn default_feature_lookback() -> usize {
    20
}
fn default_breakout_vol_mult() -> f64 {
    0.05
}
fn default_breakout_min() -> f64 {
    0.005
}
fn default_breakout_max() -> f64 {
    0.02
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback: default_feature_lookback(),
            breakout_vol_mult: default_breakout_vol_mult(),
            breakout_min: default_breakout_min(),
            breakout_max: default_breakout_max(),
        }
    }
}

/// Momentum, mean deviation and breakout flags of the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceFeatures {
    /// (close - close `lookback - 1` bars ago) / that close.
    pub momentum: f64,
    /// (close - mean of the last `lookback` closes) / mean.
    pub deviation: f64,
    /// Close above the prior `lookback`-bar high by the breakout threshold.
    pub breakout_up: bool,
    /// Close below the prior `lookback`-bar low by the breakout threshold.
    pub breakout_down: bool,
}

impl PriceFeatures {
    /// Compute features from a bar window; `None` until `lookback + 1` bars
    /// exist (the breakout needs a full prior range).
    pub fn compute(window: &BarWindow, cfg: &FeatureConfig) -> Option<Self> {
        let lookback = cfg.lookback.max(2);
        let closes = window.closes(lookback + 1);
        if closes.len() < lookback + 1 {
            return None;
        }
        let current = *closes.last()?;
        let recent = &closes[1..];
        let prior = &closes[..lookback];

        let past = recent[0];
        if past <= 0.0 {
            return None;
        }
        let momentum = (current - past) / past;

        let ma = mean(recent)?;
        if ma <= 0.0 {
            return None;
        }
        let deviation = (current - ma) / ma;

        let high = prior.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let low = prior.iter().copied().fold(f64::INFINITY, f64::min);

        let returns: Vec<f64> = prior
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        let vol = std_population(&returns).unwrap_or(0.0) * ANNUALISATION_BARS.sqrt();
        let threshold = (vol * cfg.breakout_vol_mult).clamp(cfg.breakout_min, cfg.breakout_max);

        Some(Self {
            momentum,
            deviation,
            breakout_up: current > high * (1.0 + threshold),
            breakout_down: current < low * (1.0 - threshold),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bar;
    use chrono::{Duration, TimeZone, Utc};

    fn window_from(closes: &[f64]) -> BarWindow {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut w = BarWindow::new(200, None);
        for (i, &c) in closes.iter().enumerate() {
            w.push(Bar {
                timestamp: start + Duration::hours(i as i64),
                symbol: "SPY".into(),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            });
        }
        w
    }

    #[test]
    fn requires_prior_range() {
        let w = window_from(&[100.0; 20]);
        assert!(PriceFeatures::compute(&w, &FeatureConfig::default()).is_none());
    }

    #[test]
    fn momentum_and_deviation() {
        let mut closes = vec![100.0; 21];
        closes[20] = 110.0;
        let f = PriceFeatures::compute(&window_from(&closes), &FeatureConfig::default()).unwrap();
        assert!((f.momentum - 0.10).abs() < 1e-12);
        // mean of 19 × 100 and 110 = 100.5
        assert!((f.deviation - (110.0 - 100.5) / 100.5).abs() < 1e-12);
        assert!(f.breakout_up);
        assert!(!f.breakout_down);
    }

    #[test]
    fn small_move_is_not_a_breakout() {
        let mut closes = vec![100.0; 21];
        closes[20] = 100.3;
        let f = PriceFeatures::compute(&window_from(&closes), &FeatureConfig::default()).unwrap();
        assert!(!f.breakout_up, "0.3% is inside the 0.5% floor");
    }

    #[test]
    fn breakdown_below_prior_low() {
        let mut closes = vec![100.0; 21];
        closes[20] = 95.0;
        let f = PriceFeatures::compute(&window_from(&closes), &FeatureConfig::default()).unwrap();
        assert!(f.breakout_down);
        assert!(f.momentum < 0.0);
    }
}
