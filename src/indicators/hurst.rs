// =============================================================================
// Hurst Exponent -- Rescaled Range (R/S) Analysis
// =============================================================================
//
// The Hurst exponent H characterises the long-term memory of a time series:
//
//   H > 0.55  =>  trending / persistent (momentum regime)
//   H ~ 0.50  =>  random walk
//   H < 0.45  =>  mean-reverting / anti-persistent
//
// Algorithm:
//   1. Take log returns of the last `lookback` closes.
//   2. For each lag n in [min_lag, min(max_lag, returns / 4)):
//      a. Split the returns into non-overlapping chunks of length n.
//      b. For each chunk: R = range of the mean-adjusted cumulative sum,
//         S = sample standard deviation, R/S (skip if S == 0).
//      c. Average R/S across chunks.
//   3. Regress log(avg R/S) on log(n). The slope is H, R² its reliability.
//   4. Clamp H to [0.01, 0.99]; fractal dimension D = 2 - H.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::indicators::stats::{linear_regression, std_sample};

/// Minimum number of (lag, R/S) points for a meaningful regression.
const MIN_POINTS: usize = 3;

/// Result of one R/S analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HurstEstimate {
    /// Clamped slope of the log-log fit.
    pub hurst: f64,
    /// Coefficient of determination of the log-log fit.
    pub r_squared: f64,
    /// `2 - hurst`, reporting only.
    pub fractal_dimension: f64,
    /// Number of lags that produced a usable R/S value.
    pub points: usize,
}

impl HurstEstimate {
    /// Whether the fit explains enough variance to be trusted.
    pub fn is_reliable(&self, min_r_squared: f64) -> bool {
        self.r_squared >= min_r_squared
    }
}

/// Calculate the Hurst exponent of a price series via rescaled range analysis.
///
/// Only the last `lookback` closes are used. Returns `None` when fewer than
/// `lookback` closes are supplied, when fewer than `max_lag` returns exist,
/// or when fewer than three lags yield a non-degenerate R/S value (for
/// example a flat series).
pub fn calculate_hurst(
    closes: &[f64],
    lookback: usize,
    min_lag: usize,
    max_lag: usize,
) -> Option<HurstEstimate> {
    if closes.len() < lookback || lookback < 2 {
        trace!(len = closes.len(), lookback, "Hurst: insufficient data");
        return None;
    }

    let window = &closes[closes.len() - lookback..];
    if window.iter().any(|&p| p <= 0.0 || !p.is_finite()) {
        trace!("Hurst: non-positive price in window");
        return None;
    }
    let returns: Vec<f64> = window.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    if returns.len() < max_lag {
        return None;
    }

    let lag_end = max_lag.min(returns.len() / 4);
    let mut log_n: Vec<f64> = Vec::with_capacity(lag_end.saturating_sub(min_lag));
    let mut log_rs: Vec<f64> = Vec::with_capacity(lag_end.saturating_sub(min_lag));

    for lag in min_lag.max(2)..lag_end {
        let num_chunks = returns.len() / lag;
        let mut rs_sum = 0.0_f64;
        let mut valid_chunks = 0_usize;

        for chunk in returns.chunks_exact(lag).take(num_chunks) {
            let Some(s) = std_sample(chunk) else {
                continue;
            };
            if s <= 0.0 {
                continue;
            }
            let mean = chunk.iter().sum::<f64>() / lag as f64;

            let mut running = 0.0_f64;
            let mut hi = f64::NEG_INFINITY;
            let mut lo = f64::INFINITY;
            for &r in chunk {
                running += r - mean;
                hi = hi.max(running);
                lo = lo.min(running);
            }

            rs_sum += (hi - lo) / s;
            valid_chunks += 1;
        }

        if valid_chunks == 0 {
            continue;
        }
        let avg_rs = rs_sum / valid_chunks as f64;
        if avg_rs <= 0.0 {
            continue;
        }
        log_n.push((lag as f64).ln());
        log_rs.push(avg_rs.ln());
    }

    if log_n.len() < MIN_POINTS {
        trace!(points = log_n.len(), "Hurst: too few lags for regression");
        return None;
    }

    let fit = linear_regression(&log_n, &log_rs)?;
    let hurst = fit.slope.clamp(0.01, 0.99);

    trace!(
        hurst = format!("{:.4}", hurst),
        r_squared = format!("{:.4}", fit.r_squared),
        points = log_n.len(),
        "Hurst exponent computed"
    );

    Some(HurstEstimate {
        hurst,
        r_squared: fit.r_squared,
        fractal_dimension: 2.0 - hurst,
        points: log_n.len(),
    })
}
