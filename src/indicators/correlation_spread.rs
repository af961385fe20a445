// =============================================================================
// Correlation Spread -- implied vs realized basket correlation
// =============================================================================
//
// With equal weights w = 1/N, index variance decomposes as
//
//   σ_I² = Σ wᵢ² σᵢ² + 2 ρ Σ_{i<j} wᵢ wⱼ σᵢ σⱼ
//
// which is solved for the single implied correlation ρ. Realized correlation
// is the mean pairwise Pearson correlation of the component returns over the
// same window. The signal is the z-score of (implied - realized).
//
//   z > 0  =>  index priced too correlated  =>  long components, short index
//   z < 0  =>  components move together     =>  short components, long index

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::indicators::stats::{pearson, std_population, zscore};

/// Below this cross-volatility term the implied correlation is undefined.
const DENOMINATOR_GUARD: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSpreadReading {
    pub implied: f64,
    pub realized: f64,
    pub spread: f64,
    /// `None` until the spread history is full or while it is too flat.
    pub zscore: Option<f64>,
}

/// Back out the single implied correlation from index and component
/// volatilities with the given weights. Clamped to [-1, 1].
///
/// Returns `None` when the cross term is too small to divide by, which
/// happens when components are (near) motionless.
pub fn implied_correlation(index_vol: f64, component_vols: &[f64], weights: &[f64]) -> Option<f64> {
    if component_vols.len() != weights.len() || component_vols.len() < 2 {
        return None;
    }

    let own: f64 = component_vols
        .iter()
        .zip(weights)
        .map(|(s, w)| w * w * s * s)
        .sum();

    let mut cross = 0.0_f64;
    for i in 0..component_vols.len() {
        for j in i + 1..component_vols.len() {
            cross += weights[i] * weights[j] * component_vols[i] * component_vols[j];
        }
    }
    let denominator = 2.0 * cross;
    if denominator.abs() < DENOMINATOR_GUARD {
        return None;
    }

    let rho = (index_vol * index_vol - own) / denominator;
    rho.is_finite().then(|| rho.clamp(-1.0, 1.0))
}

/// Mean pairwise Pearson correlation; pairs with a flat series are skipped.
pub fn realized_correlation(components: &[Vec<f64>]) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut pairs = 0_usize;
    for i in 0..components.len() {
        for j in i + 1..components.len() {
            if let Some(r) = pearson(&components[i], &components[j]) {
                sum += r;
                pairs += 1;
            }
        }
    }
    (pairs > 0).then(|| sum / pairs as f64)
}

/// Rolling spread history for one index/basket pair.
#[derive(Debug, Clone)]
pub struct CorrelationSpreadState {
    history: VecDeque<f64>,
    zscore_lookback: usize,
    min_std: f64,
    min_components: usize,
}

impl CorrelationSpreadState {
    pub fn new(zscore_lookback: usize, min_std: f64, min_components: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(zscore_lookback + 1),
            zscore_lookback: zscore_lookback.max(2),
            min_std,
            min_components: min_components.max(2),
        }
    }

    /// Evaluate one bar from aligned return windows of the index and each
    /// basket component.
    pub fn update(
        &mut self,
        index_returns: &[f64],
        components: &[Vec<f64>],
    ) -> Option<CorrelationSpreadReading> {
        if components.len() < self.min_components {
            trace!(
                components = components.len(),
                required = self.min_components,
                "Correlation spread: basket too small"
            );
            return None;
        }
        if components.iter().any(|c| c.len() != index_returns.len()) || index_returns.len() < 2 {
            return None;
        }

        let index_vol = std_population(index_returns)?;
        let vols: Vec<f64> = components
            .iter()
            .map(|c| std_population(c))
            .collect::<Option<Vec<f64>>>()?;
        let weight = 1.0 / components.len() as f64;
        let weights = vec![weight; components.len()];

        let Some(implied) = implied_correlation(index_vol, &vols, &weights) else {
            trace!("Correlation spread: component volatility too small");
            return None;
        };
        let realized = realized_correlation(components)?;
        let spread = implied - realized;

        self.history.push_back(spread);
        while self.history.len() > self.zscore_lookback {
            self.history.pop_front();
        }
        let z = if self.history.len() < self.zscore_lookback {
            None
        } else {
            let spreads: Vec<f64> = self.history.iter().copied().collect();
            zscore(spread, &spreads, self.min_std)
        };

        trace!(
            implied = format!("{:.4}", implied),
            realized = format!("{:.4}", realized),
            spread = format!("{:.4}", spread),
            "Correlation spread updated"
        );

        Some(CorrelationSpreadReading {
            implied,
            realized,
            spread,
            zscore: z,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(len: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state as f64 / u64::MAX as f64 - 0.5) * 0.02
            })
            .collect()
    }

    #[test]
    fn perfectly_correlated_basket_implies_one() {
        // Index vol equal to the common component vol means rho = 1.
        let rho = implied_correlation(0.02, &[0.02; 5], &[0.2; 5]).unwrap();
        assert!((rho - 1.0).abs() < 1e-9);
    }

    #[test]
    fn diversified_index_implies_low_correlation() {
        // Independent components: σ_I² = Σ w² σ² exactly.
        let sigma = 0.02_f64;
        let n = 5.0_f64;
        let index_vol = (n * (sigma / n).powi(2)).sqrt();
        let rho = implied_correlation(index_vol, &[sigma; 5], &[0.2; 5]).unwrap();
        assert!(rho.abs() < 1e-9);
    }

    #[test]
    fn implied_is_clamped_and_guarded() {
        let rho = implied_correlation(1.0, &[0.01; 3], &[1.0 / 3.0; 3]).unwrap();
        assert_eq!(rho, 1.0);
        assert!(implied_correlation(0.01, &[0.0; 3], &[1.0 / 3.0; 3]).is_none());
    }

    #[test]
    fn realized_of_identical_series_is_one() {
        let a = noise(20, 3);
        let r = realized_correlation(&[a.clone(), a.clone(), a]).unwrap();
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn basket_below_minimum_is_invalid() {
        let mut state = CorrelationSpreadState::new(60, 0.01, 5);
        let comps: Vec<Vec<f64>> = (0..4).map(|s| noise(20, s + 1)).collect();
        assert!(state.update(&noise(20, 99), &comps).is_none());
    }

    #[test]
    fn spread_history_feeds_zscore() {
        let mut state = CorrelationSpreadState::new(10, 0.01, 5);
        for bar in 0..12_u64 {
            let comps: Vec<Vec<f64>> = (0..5).map(|s| noise(20, bar * 31 + s + 1)).collect();
            let index: Vec<f64> = (0..20)
                .map(|t| comps.iter().map(|c| c[t]).sum::<f64>() / 5.0)
                .collect();
            let reading = state.update(&index, &comps).unwrap();
            assert!((-1.0..=1.0).contains(&reading.implied));
            assert!((reading.spread - (reading.implied - reading.realized)).abs() < 1e-12);
            if bar < 9 {
                assert!(reading.zscore.is_none());
            }
        }
        assert_eq!(state.history.len(), 10);
    }
}
