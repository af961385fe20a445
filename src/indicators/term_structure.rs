// =============================================================================
// Volatility Term Structure -- slope z-score
// =============================================================================
//
//   slope = near_vol_proxy / far_vol_proxy - 1
//
//   slope > 0  =>  backwardation (near-term fear above long-term)
//   slope < 0  =>  contango (complacency)
//
// The emitted value is the z-score of the current slope against the rolling
// slope history (current slope included), unbounded.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::indicators::stats::zscore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermStructureReading {
    pub slope: f64,
    /// `None` until the history is full or while it is too flat to scale.
    pub zscore: Option<f64>,
}

/// Rolling slope history for one near/far proxy pair.
#[derive(Debug, Clone)]
pub struct TermStructureState {
    history: VecDeque<f64>,
    lookback: usize,
    min_std: f64,
}

impl TermStructureState {
    pub fn new(lookback: usize, min_std: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(lookback + 1),
            lookback: lookback.max(2),
            min_std,
        }
    }

    /// Record the slope implied by the latest proxy closes.
    ///
    /// Returns `None` (and leaves the history untouched) when the far proxy is
    /// non-positive or either price is not finite.
    pub fn update(&mut self, near: f64, far: f64) -> Option<TermStructureReading> {
        if far <= 0.0 || !far.is_finite() || !near.is_finite() {
            trace!(near, far, "Term structure: degenerate proxy prices");
            return None;
        }
        let slope = near / far - 1.0;
        self.history.push_back(slope);
        while self.history.len() > self.lookback {
            self.history.pop_front();
        }

        let z = if self.history.len() < self.lookback {
            None
        } else {
            let slopes: Vec<f64> = self.history.iter().copied().collect();
            zscore(slope, &slopes, self.min_std)
        };

        trace!(
            slope = format!("{:.4}", slope),
            zscore = z.map(|v| format!("{:.4}", v)).unwrap_or_default(),
            history = self.history.len(),
            "Term structure updated"
        );

        Some(TermStructureReading { slope, zscore: z })
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_sign_matches_curve_shape() {
        let mut ts = TermStructureState::new(60, 0.001);
        let r = ts.update(30.0, 25.0).unwrap();
        assert!((r.slope - 0.2).abs() < 1e-12);
        let r = ts.update(20.0, 25.0).unwrap();
        assert!(r.slope < 0.0);
    }

    #[test]
    fn non_positive_far_proxy_is_rejected() {
        let mut ts = TermStructureState::new(60, 0.001);
        assert!(ts.update(20.0, 0.0).is_none());
        assert!(ts.update(20.0, -1.0).is_none());
        assert_eq!(ts.history_len(), 0);
    }

    #[test]
    fn zscore_requires_full_history() {
        let mut ts = TermStructureState::new(5, 0.001);
        for i in 0..4 {
            let r = ts.update(20.0 + i as f64, 20.0).unwrap();
            assert!(r.zscore.is_none());
        }
        let r = ts.update(30.0, 20.0).unwrap();
        let z = r.zscore.unwrap();
        assert!(z > 1.5, "a spike above history should score high, got {z}");
    }

    #[test]
    fn flat_history_has_no_zscore() {
        let mut ts = TermStructureState::new(5, 0.001);
        for _ in 0..10 {
            assert!(ts.update(20.0, 20.0).unwrap().zscore.is_none());
        }
    }
}
