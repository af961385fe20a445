// =============================================================================
// Relative-Strength Acceleration (meta-momentum)
// =============================================================================
//
//   RS(t)   = (1 + sector return) / (1 + benchmark return)   over rs_lookback
//   vel(t)  = (RS(t) - RS(t - velocity_lookback + 1)) / velocity_lookback
//   acc(t)  = (vel(t) - vel(t - accel_lookback + 1)) / accel_lookback
//
//   score = 0.5 * norm(acc) + 0.3 * norm(vel) + 0.2 * norm(RS)
//
// with acc normalised over [-0.01, 0.01], vel over [-0.05, 0.05] and the RS
// level over [0.8, 1.2].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::indicators::stats::normalize;

const ACCEL_WEIGHT: f64 = 0.5;
const VELOCITY_WEIGHT: f64 = 0.3;
const LEVEL_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsReading {
    pub level: f64,
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
    /// Composite score in [0, 1], present once acceleration exists.
    pub composite: Option<f64>,
}

/// Composite rotation score from its three components.
pub fn composite_score(acceleration: f64, velocity: f64, level: f64) -> f64 {
    ACCEL_WEIGHT * normalize(acceleration, -0.01, 0.01)
        + VELOCITY_WEIGHT * normalize(velocity, -0.05, 0.05)
        + LEVEL_WEIGHT * normalize(level, 0.8, 1.2)
}

/// Period return using the close `lookback` bars from the end, matching the
/// rotation ranking window.
fn period_return(closes: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || closes.len() < lookback {
        return None;
    }
    let current = *closes.last()?;
    let past = closes[closes.len() - lookback];
    if past <= 0.0 {
        return None;
    }
    Some(current / past - 1.0)
}

/// RS, velocity and acceleration history of one sector against its benchmark.
#[derive(Debug, Clone)]
pub struct RsAccelerationState {
    rs_lookback: usize,
    velocity_lookback: usize,
    accel_lookback: usize,
    rs_history: VecDeque<f64>,
    velocity_history: VecDeque<f64>,
}

impl RsAccelerationState {
    pub fn new(rs_lookback: usize, velocity_lookback: usize, accel_lookback: usize) -> Self {
        Self {
            rs_lookback: rs_lookback.max(2),
            velocity_lookback: velocity_lookback.max(2),
            accel_lookback: accel_lookback.max(2),
            rs_history: VecDeque::with_capacity(velocity_lookback + 1),
            velocity_history: VecDeque::with_capacity(accel_lookback + 1),
        }
    }

    /// Minimum closes required from each series.
    pub fn required_closes(&self) -> usize {
        self.rs_lookback
    }

    /// Advance one bar with the latest sector and benchmark closes
    /// (oldest-first, at least `rs_lookback` each).
    pub fn update(&mut self, sector: &[f64], benchmark: &[f64]) -> Option<RsReading> {
        let sector_return = period_return(sector, self.rs_lookback)?;
        let bench_return = period_return(benchmark, self.rs_lookback)?;

        let level = if 1.0 + bench_return > 0.0 {
            (1.0 + sector_return) / (1.0 + bench_return)
        } else {
            1.0
        };

        self.rs_history.push_back(level);
        while self.rs_history.len() > self.velocity_lookback {
            self.rs_history.pop_front();
        }

        let velocity = if self.rs_history.len() >= self.velocity_lookback {
            let first = self.rs_history.front().copied().unwrap_or(level);
            Some((level - first) / self.velocity_lookback as f64)
        } else {
            None
        };

        let mut acceleration = None;
        if let Some(v) = velocity {
            self.velocity_history.push_back(v);
            while self.velocity_history.len() > self.accel_lookback {
                self.velocity_history.pop_front();
            }
            if self.velocity_history.len() >= self.accel_lookback {
                let first = self.velocity_history.front().copied().unwrap_or(v);
                acceleration = Some((v - first) / self.accel_lookback as f64);
            }
        }

        let composite = match (acceleration, velocity) {
            (Some(a), Some(v)) => Some(composite_score(a, v, level)),
            _ => None,
        };

        trace!(
            level = format!("{:.4}", level),
            velocity = velocity.map(|v| format!("{:.6}", v)).unwrap_or_default(),
            acceleration = acceleration.map(|a| format!("{:.6}", a)).unwrap_or_default(),
            "RS acceleration updated"
        );

        Some(RsReading {
            level,
            velocity,
            acceleration,
            composite,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometric(len: usize, growth: f64) -> Vec<f64> {
        (0..len).map(|i| 100.0 * (1.0 + growth).powi(i as i32)).collect()
    }

    #[test]
    fn composite_weights_sum_to_one() {
        assert!((composite_score(1.0, 1.0, 2.0) - 1.0).abs() < 1e-12);
        assert!(composite_score(-1.0, -1.0, 0.0).abs() < 1e-12);
        assert!((composite_score(0.0, 0.0, 1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identical_series_have_unit_level() {
        let mut rs = RsAccelerationState::new(20, 10, 5);
        let s = geometric(30, 0.01);
        let r = rs.update(&s, &s).unwrap();
        assert!((r.level - 1.0).abs() < 1e-12);
        assert!(r.velocity.is_none());
    }

    #[test]
    fn needs_lookback_closes() {
        let mut rs = RsAccelerationState::new(20, 10, 5);
        let s = geometric(19, 0.01);
        assert!(rs.update(&s, &s).is_none());
    }

    #[test]
    fn accelerating_outperformance_scores_high() {
        let mut rs = RsAccelerationState::new(20, 10, 5);
        let bench = geometric(80, 0.0);
        // Sector growth rate increases every bar.
        let mut sector = Vec::with_capacity(80);
        let mut price = 100.0;
        for i in 0..80 {
            price *= 1.0 + 0.0002 * i as f64;
            sector.push(price);
        }
        let mut last = None;
        for end in 20..=80 {
            last = rs.update(&sector[..end], &bench[..end]);
        }
        let r = last.unwrap();
        assert!(r.velocity.unwrap() > 0.0);
        assert!(r.acceleration.unwrap() > 0.0);
        assert!(r.composite.unwrap() > 0.55, "composite {:?}", r.composite);
    }
}
