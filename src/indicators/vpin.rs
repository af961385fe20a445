// =============================================================================
// VPIN -- Volume-Synchronized Probability of Informed Trading
// =============================================================================
//
// Bar volume is split into estimated buy/sell volume with bulk volume
// classification (BVC): the bar's log return is standardised by the recent
// return volatility and mapped through the normal CDF,
//
//   buy_fraction = Φ(r / σ)
//
// Volume is then poured into fixed-size buckets. With B the last `num_buckets`
// completed buckets,
//
//   VPIN = Σ|buy - sell| / Σ(buy + sell)    over B
//
// A thin rolling daily volume marks the reading unreliable but not invalid.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::indicators::stats::{normal_cdf, std_population};

/// Output of one VPIN evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VpinSnapshot {
    /// Mean absolute order imbalance over the completed buckets, in [0, 1].
    pub vpin: f64,
    /// Buy volume as a fraction of total volume across the buckets.
    pub buy_fraction: f64,
    /// Completed buckets currently contributing.
    pub buckets: usize,
    /// False when rolling daily volume sits below the configured floor.
    pub reliable: bool,
}

/// Bucket accumulator and VPIN calculator for a single symbol.
#[derive(Debug, Clone)]
pub struct VpinCalculator {
    bucket_size: f64,
    num_buckets: usize,
    sigma_lookback: usize,
    bars_per_day: usize,
    min_daily_volume: f64,

    current_buy_volume: f64,
    current_sell_volume: f64,
    current_bucket_volume: f64,
    buckets: VecDeque<(f64, f64)>, // (buy_vol, sell_vol) per bucket

    last_close: Option<f64>,
    returns: VecDeque<f64>,
    daily_volume: VecDeque<f64>,
}

impl VpinCalculator {
    pub fn new(
        bucket_size: f64,
        num_buckets: usize,
        sigma_lookback: usize,
        bars_per_day: usize,
        min_daily_volume: f64,
    ) -> Self {
        Self {
            bucket_size: bucket_size.max(f64::EPSILON),
            num_buckets: num_buckets.max(1),
            sigma_lookback: sigma_lookback.max(2),
            bars_per_day: bars_per_day.max(1),
            min_daily_volume,
            current_buy_volume: 0.0,
            current_sell_volume: 0.0,
            current_bucket_volume: 0.0,
            buckets: VecDeque::with_capacity(num_buckets + 1),
            last_close: None,
            returns: VecDeque::with_capacity(sigma_lookback + 1),
            daily_volume: VecDeque::with_capacity(bars_per_day + 1),
        }
    }

    /// Estimated buy share of the volume of a bar with log return `r`.
    ///
    /// Until `sigma_lookback` prior returns exist the split is 50/50. A zero
    /// volatility history falls back to the sign of the return.
    fn buy_fraction(&self, r: f64) -> f64 {
        if self.returns.len() < self.sigma_lookback {
            return 0.5;
        }
        let history: Vec<f64> = self.returns.iter().copied().collect();
        match std_population(&history) {
            Some(sigma) if sigma > 0.0 => normal_cdf(r / sigma),
            _ => {
                if r > 0.0 {
                    1.0
                } else if r < 0.0 {
                    0.0
                } else {
                    0.5
                }
            }
        }
    }

    /// Classify and accumulate one bar.
    pub fn add_bar(&mut self, close: f64, volume: f64) {
        let r = match self.last_close {
            Some(prev) if prev > 0.0 && close > 0.0 => Some((close / prev).ln()),
            _ => None,
        };
        if close > 0.0 {
            self.last_close = Some(close);
        }

        self.daily_volume.push_back(volume.max(0.0));
        while self.daily_volume.len() > self.bars_per_day {
            self.daily_volume.pop_front();
        }

        if let Some(r) = r {
            if volume > 0.0 {
                let fraction = self.buy_fraction(r);
                self.add_volume(volume * fraction, volume * (1.0 - fraction));
                trace!(
                    ret = format!("{:.6}", r),
                    buy_fraction = format!("{:.4}", fraction),
                    volume,
                    "VPIN: bar classified"
                );
            }
            self.returns.push_back(r);
            while self.returns.len() > self.sigma_lookback {
                self.returns.pop_front();
            }
        }
    }

    /// Pour classified volume into the current bucket, closing as many full
    /// buckets as the volume covers.
    pub fn add_volume(&mut self, buy: f64, sell: f64) {
        self.current_buy_volume += buy;
        self.current_sell_volume += sell;
        self.current_bucket_volume += buy + sell;

        while self.current_bucket_volume >= self.bucket_size {
            let overflow = self.current_bucket_volume - self.bucket_size;
            let ratio = if self.current_bucket_volume > 0.0 {
                (self.current_bucket_volume - overflow) / self.current_bucket_volume
            } else {
                1.0
            };

            let bucket_buy = self.current_buy_volume * ratio;
            let bucket_sell = self.current_sell_volume * ratio;

            self.buckets.push_back((bucket_buy, bucket_sell));
            if self.buckets.len() > self.num_buckets {
                self.buckets.pop_front();
            }

            // Carry over the overflow.
            self.current_buy_volume *= 1.0 - ratio;
            self.current_sell_volume *= 1.0 - ratio;
            self.current_bucket_volume = overflow;
        }
    }

    pub fn completed_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Rolling volume over the last `bars_per_day` bars, extrapolated while the
    /// day is still filling.
    fn rolling_daily_volume(&self) -> f64 {
        if self.daily_volume.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.daily_volume.iter().sum();
        sum * self.bars_per_day as f64 / self.daily_volume.len() as f64
    }

    /// Current VPIN, `None` until `num_buckets` buckets have completed.
    pub fn calculate(&self) -> Option<VpinSnapshot> {
        if self.buckets.len() < self.num_buckets {
            return None;
        }

        let total_imbalance: f64 = self
            .buckets
            .iter()
            .map(|(buy, sell)| (buy - sell).abs())
            .sum();
        let total_volume: f64 = self.buckets.iter().map(|(buy, sell)| buy + sell).sum();
        let total_buy: f64 = self.buckets.iter().map(|(b, _)| b).sum();

        if total_volume <= 0.0 {
            return None;
        }

        Some(VpinSnapshot {
            vpin: (total_imbalance / total_volume).clamp(0.0, 1.0),
            buy_fraction: (total_buy / total_volume).clamp(0.0, 1.0),
            buckets: self.buckets.len(),
            reliable: self.rolling_daily_volume() >= self.min_daily_volume,
        })
    }
}

impl Default for VpinCalculator {
    fn default() -> Self {
        Self::new(50_000.0, 50, 20, 390, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(calc: &mut VpinCalculator, closes: &[f64], volume: f64) {
        for &c in closes {
            calc.add_bar(c, volume);
        }
    }

    #[test]
    fn needs_full_bucket_history() {
        let mut calc = VpinCalculator::new(1_000.0, 5, 20, 10, 0.0);
        // The first bar has no prior close, so it is never classified.
        let closes: Vec<f64> = (0..5).map(|i| 100.0 + i as f64).collect();
        feed(&mut calc, &closes, 1_000.0);
        assert_eq!(calc.completed_buckets(), 4);
        assert!(calc.calculate().is_none());
        calc.add_bar(105.0, 1_000.0);
        assert!(calc.calculate().is_some());
    }

    #[test]
    fn warmup_split_is_balanced() {
        let mut calc = VpinCalculator::new(1_000.0, 5, 20, 10, 0.0);
        let closes: Vec<f64> = (0..6).map(|i| 100.0 + i as f64).collect();
        feed(&mut calc, &closes, 1_000.0);
        let snap = calc.calculate().unwrap();
        assert!(snap.vpin.abs() < 1e-12, "50/50 split has no imbalance");
        assert!((snap.buy_fraction - 0.5).abs() < 1e-12);
    }

    #[test]
    fn all_up_moves_drive_buy_fraction_to_one() {
        let mut calc = VpinCalculator::new(1_000.0, 10, 20, 10, 0.0);
        let mut price = 100.0;
        let mut closes = Vec::new();
        for i in 0..200 {
            price *= 1.0 + 0.001 + 0.0005 * ((i % 3) as f64);
            closes.push(price);
        }
        feed(&mut calc, &closes, 1_000.0);
        let snap = calc.calculate().unwrap();
        assert!(snap.buy_fraction > 0.95, "buy fraction {:.4}", snap.buy_fraction);
        assert!(snap.vpin > 0.9, "vpin {:.4}", snap.vpin);
    }

    #[test]
    fn constant_growth_uses_return_sign() {
        let mut calc = VpinCalculator::new(1_000.0, 5, 20, 10, 0.0);
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 1.001_f64.powi(i)).collect();
        feed(&mut calc, &closes, 1_000.0);
        let snap = calc.calculate().unwrap();
        assert!(snap.buy_fraction > 0.99);
    }

    #[test]
    fn vpin_stays_in_unit_interval() {
        let mut calc = VpinCalculator::new(2_500.0, 20, 20, 50, 0.0);
        let mut state = 7_u64;
        let mut price = 100.0;
        for _ in 0..2_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let u = state as f64 / u64::MAX as f64;
            price *= 1.0 + (u - 0.5) * 0.01;
            calc.add_bar(price, 500.0 + 2_000.0 * u);
            if let Some(snap) = calc.calculate() {
                assert!((0.0..=1.0).contains(&snap.vpin));
                assert!((0.0..=1.0).contains(&snap.buy_fraction));
            }
        }
    }

    #[test]
    fn zero_volume_bars_are_skipped() {
        let mut calc = VpinCalculator::new(1_000.0, 2, 20, 10, 0.0);
        feed(&mut calc, &[100.0, 101.0, 102.0, 103.0], 0.0);
        assert_eq!(calc.completed_buckets(), 0);
    }

    #[test]
    fn overflow_carries_into_next_bucket() {
        let mut calc = VpinCalculator::new(1_000.0, 10, 20, 10, 0.0);
        calc.add_volume(1_500.0, 1_000.0);
        assert_eq!(calc.completed_buckets(), 2);
        // 500 volume remains in the open bucket with the same 60/40 mix.
        assert!((calc.current_bucket_volume - 500.0).abs() < 1e-9);
        assert!((calc.current_buy_volume - 300.0).abs() < 1e-9);
    }

    #[test]
    fn thin_volume_is_unreliable() {
        let mut calc = VpinCalculator::new(100.0, 3, 20, 10, 10_000.0);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        feed(&mut calc, &closes, 100.0);
        let snap = calc.calculate().unwrap();
        assert!(!snap.reliable);
    }
}
