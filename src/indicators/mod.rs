// =============================================================================
// Indicator Library
// =============================================================================
//
// Scalar regime signals computed from the per-symbol bar windows:
// - Permutation entropy (ordinal-pattern complexity)
// - Hurst exponent (R/S long-range memory)
// - VPIN (order-flow toxicity via bulk volume classification)
// - Volatility term-structure z-score
// - Relative-strength acceleration
// - Implied vs realized correlation spread
//
// The pure calculations live in the submodules and return `Option<T>` for
// insufficient or degenerate input. `IndicatorEngine` wraps the stateful
// ones per symbol and turns every bar into exactly one `IndicatorReading`.

pub mod correlation_spread;
pub mod features;
pub mod hurst;
pub mod permutation_entropy;
pub mod rs_acceleration;
pub mod stats;
pub mod term_structure;
pub mod vpin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::market_data::MarketContext;
use crate::types::IndicatorKind;

use self::correlation_spread::CorrelationSpreadState;
use self::hurst::calculate_hurst;
use self::permutation_entropy::PermutationEntropyState;
use self::rs_acceleration::RsAccelerationState;
use self::term_structure::TermStructureState;
use self::vpin::VpinCalculator;

// =============================================================================
// Readings
// =============================================================================

/// Indicator-specific extras carried alongside the scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadingDetail {
    Empty,
    Entropy {
        patterns: usize,
    },
    Hurst {
        r_squared: f64,
        fractal_dimension: f64,
        points: usize,
    },
    Vpin {
        buy_fraction: f64,
        buckets: usize,
        reliable: bool,
    },
    TermStructure {
        slope: f64,
    },
    RsAcceleration {
        level: f64,
        velocity: f64,
        acceleration: f64,
    },
    CorrelationSpread {
        implied: f64,
        realized: f64,
        spread: f64,
    },
}

/// One indicator evaluation for one symbol at one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub kind: IndicatorKind,
    pub value: f64,
    /// False when the window is under-filled, gapped or numerically degenerate.
    pub valid: bool,
    pub detail: ReadingDetail,
}

impl IndicatorReading {
    fn invalid(symbol: &str, timestamp: DateTime<Utc>, kind: IndicatorKind) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            kind,
            value: 0.0,
            valid: false,
            detail: ReadingDetail::Empty,
        }
    }

    /// Whether the reading may open or grow a position. Thin-volume VPIN
    /// readings still drive the regime but never entries.
    pub fn allows_entry(&self) -> bool {
        match self.detail {
            ReadingDetail::Vpin { reliable, .. } => self.valid && reliable,
            _ => self.valid,
        }
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// Static parameter set of the indicator driving a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum IndicatorParams {
    PermutationEntropy {
        lookback: usize,
        dimension: usize,
        delay: usize,
    },
    Hurst {
        lookback: usize,
        min_lag: usize,
        max_lag: usize,
        min_r_squared: f64,
    },
    Vpin {
        bucket_size: f64,
        num_buckets: usize,
        sigma_lookback: usize,
        bars_per_day: usize,
        min_daily_volume: f64,
    },
    TermStructure {
        near_symbol: String,
        far_symbol: String,
        lookback: usize,
        min_std: f64,
    },
    RsAcceleration {
        benchmark_symbol: String,
        rs_lookback: usize,
        velocity_lookback: usize,
        accel_lookback: usize,
    },
    CorrelationSpread {
        index_symbol: String,
        components: Vec<String>,
        return_lookback: usize,
        zscore_lookback: usize,
        min_std: f64,
        min_components: usize,
    },
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self::PermutationEntropy {
            lookback: 120,
            dimension: 5,
            delay: 1,
        }
    }
}

impl IndicatorParams {
    pub fn kind(&self) -> IndicatorKind {
        match self {
            Self::PermutationEntropy { .. } => IndicatorKind::PermutationEntropy,
            Self::Hurst { .. } => IndicatorKind::Hurst,
            Self::Vpin { .. } => IndicatorKind::Vpin,
            Self::TermStructure { .. } => IndicatorKind::TermStructure,
            Self::RsAcceleration { .. } => IndicatorKind::RsAcceleration,
            Self::CorrelationSpread { .. } => IndicatorKind::CorrelationSpread,
        }
    }

    /// Bars each symbol window must retain for this indicator.
    pub fn required_history(&self) -> usize {
        match self {
            Self::PermutationEntropy { lookback, .. } => *lookback,
            Self::Hurst { lookback, .. } => *lookback,
            Self::Vpin { sigma_lookback, .. } => sigma_lookback + 1,
            Self::TermStructure { lookback, .. } => *lookback,
            Self::RsAcceleration {
                rs_lookback,
                velocity_lookback,
                accel_lookback,
                ..
            } => rs_lookback + velocity_lookback + accel_lookback,
            Self::CorrelationSpread {
                return_lookback, ..
            } => return_lookback + 1,
        }
    }

    /// Reference series read by the indicator that are not the traded symbol.
    pub fn reference_symbols(&self) -> Vec<String> {
        match self {
            Self::TermStructure {
                near_symbol,
                far_symbol,
                ..
            } => vec![near_symbol.clone(), far_symbol.clone()],
            Self::RsAcceleration {
                benchmark_symbol, ..
            } => vec![benchmark_symbol.clone()],
            Self::CorrelationSpread {
                index_symbol,
                components,
                ..
            } => {
                let mut v = vec![index_symbol.clone()];
                v.extend(components.iter().cloned());
                v
            }
            _ => Vec::new(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Self::PermutationEntropy {
                lookback,
                dimension,
                delay,
            } => {
                if !(2..=7).contains(dimension) {
                    anyhow::bail!("entropy dimension must be within 2..=7, got {dimension}");
                }
                if *delay == 0 {
                    anyhow::bail!("entropy delay must be positive");
                }
                if *lookback < dimension * 4 {
                    anyhow::bail!(
                        "entropy lookback {lookback} is shorter than dimension x 4 ({})",
                        dimension * 4
                    );
                }
            }
            Self::Hurst {
                lookback,
                min_lag,
                max_lag,
                min_r_squared,
            } => {
                if *min_lag < 2 || max_lag <= min_lag {
                    anyhow::bail!("hurst lags must satisfy 2 <= min_lag < max_lag");
                }
                if *lookback <= *max_lag {
                    anyhow::bail!("hurst lookback must exceed max_lag");
                }
                if !(0.0..=1.0).contains(min_r_squared) {
                    anyhow::bail!("hurst min_r_squared must be within [0, 1]");
                }
            }
            Self::Vpin {
                bucket_size,
                num_buckets,
                sigma_lookback,
                bars_per_day,
                min_daily_volume,
            } => {
                if *bucket_size <= 0.0 || *num_buckets == 0 {
                    anyhow::bail!("vpin bucket size and bucket count must be positive");
                }
                if *sigma_lookback < 2 || *bars_per_day == 0 {
                    anyhow::bail!("vpin sigma_lookback must be >= 2 and bars_per_day > 0");
                }
                if *min_daily_volume < 0.0 {
                    anyhow::bail!("vpin min_daily_volume must be non-negative");
                }
            }
            Self::TermStructure {
                near_symbol,
                far_symbol,
                lookback,
                min_std,
            } => {
                if near_symbol.is_empty() || far_symbol.is_empty() || near_symbol == far_symbol {
                    anyhow::bail!("term structure needs two distinct proxy symbols");
                }
                if *lookback < 2 || *min_std < 0.0 {
                    anyhow::bail!("term structure lookback must be >= 2 and min_std >= 0");
                }
            }
            Self::RsAcceleration {
                benchmark_symbol,
                rs_lookback,
                velocity_lookback,
                accel_lookback,
            } => {
                if benchmark_symbol.is_empty() {
                    anyhow::bail!("rs acceleration needs a benchmark symbol");
                }
                if *rs_lookback < 2 || *velocity_lookback < 2 || *accel_lookback < 2 {
                    anyhow::bail!("rs lookbacks must all be >= 2");
                }
            }
            Self::CorrelationSpread {
                index_symbol,
                components,
                return_lookback,
                zscore_lookback,
                min_std,
                min_components,
            } => {
                if index_symbol.is_empty() {
                    anyhow::bail!("correlation spread needs an index symbol");
                }
                if *min_components < 2 || components.len() < *min_components {
                    anyhow::bail!(
                        "correlation spread needs at least {} components, got {}",
                        min_components.max(&2),
                        components.len()
                    );
                }
                if *return_lookback < 2 || *zscore_lookback < 2 || *min_std < 0.0 {
                    anyhow::bail!("correlation spread lookbacks must be >= 2 and min_std >= 0");
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Per-symbol indicator state, one variant per indicator family.
#[derive(Debug, Clone)]
pub enum IndicatorEngine {
    PermutationEntropy {
        state: PermutationEntropyState,
        lookback: usize,
    },
    Hurst {
        lookback: usize,
        min_lag: usize,
        max_lag: usize,
        min_r_squared: f64,
    },
    Vpin {
        calc: VpinCalculator,
        sigma_lookback: usize,
    },
    TermStructure {
        state: TermStructureState,
        near_symbol: String,
        far_symbol: String,
        lookback: usize,
    },
    RsAcceleration {
        state: RsAccelerationState,
        benchmark_symbol: String,
        rs_lookback: usize,
    },
    CorrelationSpread {
        state: CorrelationSpreadState,
        index_symbol: String,
        components: Vec<String>,
        return_lookback: usize,
    },
}

impl IndicatorEngine {
    pub fn new(params: &IndicatorParams) -> Self {
        match params.clone() {
            IndicatorParams::PermutationEntropy {
                lookback,
                dimension,
                delay,
            } => Self::PermutationEntropy {
                state: PermutationEntropyState::new(lookback, dimension, delay),
                lookback,
            },
            IndicatorParams::Hurst {
                lookback,
                min_lag,
                max_lag,
                min_r_squared,
            } => Self::Hurst {
                lookback,
                min_lag,
                max_lag,
                min_r_squared,
            },
            IndicatorParams::Vpin {
                bucket_size,
                num_buckets,
                sigma_lookback,
                bars_per_day,
                min_daily_volume,
            } => Self::Vpin {
                calc: VpinCalculator::new(
                    bucket_size,
                    num_buckets,
                    sigma_lookback,
                    bars_per_day,
                    min_daily_volume,
                ),
                sigma_lookback,
            },
            IndicatorParams::TermStructure {
                near_symbol,
                far_symbol,
                lookback,
                min_std,
            } => Self::TermStructure {
                state: TermStructureState::new(lookback, min_std),
                near_symbol,
                far_symbol,
                lookback,
            },
            IndicatorParams::RsAcceleration {
                benchmark_symbol,
                rs_lookback,
                velocity_lookback,
                accel_lookback,
            } => Self::RsAcceleration {
                state: RsAccelerationState::new(rs_lookback, velocity_lookback, accel_lookback),
                benchmark_symbol,
                rs_lookback,
            },
            IndicatorParams::CorrelationSpread {
                index_symbol,
                components,
                return_lookback,
                zscore_lookback,
                min_std,
                min_components,
            } => Self::CorrelationSpread {
                state: CorrelationSpreadState::new(zscore_lookback, min_std, min_components),
                index_symbol,
                components,
                return_lookback,
            },
        }
    }

    pub fn kind(&self) -> IndicatorKind {
        match self {
            Self::PermutationEntropy { .. } => IndicatorKind::PermutationEntropy,
            Self::Hurst { .. } => IndicatorKind::Hurst,
            Self::Vpin { .. } => IndicatorKind::Vpin,
            Self::TermStructure { .. } => IndicatorKind::TermStructure,
            Self::RsAcceleration { .. } => IndicatorKind::RsAcceleration,
            Self::CorrelationSpread { .. } => IndicatorKind::CorrelationSpread,
        }
    }

    /// Advance the indicator by one bar for `symbol`.
    ///
    /// Must be called once per slice after the context has ingested it. A
    /// symbol without a bar in the current slice yields an invalid reading and
    /// leaves the stateful calculators untouched.
    pub fn update(&mut self, symbol: &str, ctx: &MarketContext) -> IndicatorReading {
        let kind = self.kind();
        let Some(timestamp) = ctx.timestamp() else {
            return IndicatorReading::invalid(symbol, DateTime::<Utc>::MIN_UTC, kind);
        };
        let Some(window) = ctx.window(symbol) else {
            return IndicatorReading::invalid(symbol, timestamp, kind);
        };
        if !ctx.is_current(symbol) {
            trace!(symbol, indicator = %kind, "no bar this slice");
            return IndicatorReading::invalid(symbol, timestamp, kind);
        }

        let mut reading = IndicatorReading::invalid(symbol, timestamp, kind);

        match self {
            Self::PermutationEntropy { state, lookback } => {
                // Ordinal patterns never span a gap.
                if window.has_gap(2) {
                    state.reset();
                }
                if let Some(close) = window.last_close() {
                    state.push(close);
                }
                if let Some(h) = state.value() {
                    reading.value = h;
                    reading.valid = !window.has_gap(*lookback);
                }
                reading.detail = ReadingDetail::Entropy {
                    patterns: state.pattern_count(),
                };
            }

            Self::Hurst {
                lookback,
                min_lag,
                max_lag,
                min_r_squared,
            } => {
                let closes = window.closes(*lookback);
                if let Some(est) = calculate_hurst(&closes, *lookback, *min_lag, *max_lag) {
                    reading.value = est.hurst;
                    reading.valid = est.is_reliable(*min_r_squared) && !window.has_gap(*lookback);
                    reading.detail = ReadingDetail::Hurst {
                        r_squared: est.r_squared,
                        fractal_dimension: est.fractal_dimension,
                        points: est.points,
                    };
                }
            }

            Self::Vpin {
                calc,
                sigma_lookback,
            } => {
                if let Some(bar) = window.last() {
                    calc.add_bar(bar.close, bar.volume);
                }
                if let Some(snap) = calc.calculate() {
                    reading.value = snap.vpin;
                    reading.valid = !window.has_gap(*sigma_lookback + 1);
                    reading.detail = ReadingDetail::Vpin {
                        buy_fraction: snap.buy_fraction,
                        buckets: snap.buckets,
                        reliable: snap.reliable,
                    };
                }
            }

            Self::TermStructure {
                state,
                near_symbol,
                far_symbol,
                lookback,
            } => {
                let near = ctx.window(near_symbol);
                let far = ctx.window(far_symbol);
                if let (Some(near), Some(far)) = (near, far) {
                    if ctx.is_current(near_symbol) && ctx.is_current(far_symbol) {
                        if let (Some(n), Some(f)) = (near.last_close(), far.last_close()) {
                            if let Some(ts) = state.update(n, f) {
                                reading.detail = ReadingDetail::TermStructure { slope: ts.slope };
                                if let Some(z) = ts.zscore {
                                    reading.value = z;
                                    reading.valid =
                                        !near.has_gap(*lookback) && !far.has_gap(*lookback);
                                }
                            }
                        }
                    }
                }
            }

            Self::RsAcceleration {
                state,
                benchmark_symbol,
                rs_lookback,
            } => {
                if let Some(bench) = ctx.window(benchmark_symbol) {
                    if bench.last_timestamp() == window.last_timestamp() {
                        let sector_closes = window.closes(*rs_lookback);
                        let bench_closes = bench.closes(*rs_lookback);
                        if let Some(rs) = state.update(&sector_closes, &bench_closes) {
                            if let (Some(v), Some(a), Some(score)) =
                                (rs.velocity, rs.acceleration, rs.composite)
                            {
                                reading.value = score;
                                reading.valid = !window.has_gap(*rs_lookback)
                                    && !bench.has_gap(*rs_lookback);
                                reading.detail = ReadingDetail::RsAcceleration {
                                    level: rs.level,
                                    velocity: v,
                                    acceleration: a,
                                };
                            }
                        }
                    }
                }
            }

            Self::CorrelationSpread {
                state,
                index_symbol,
                components,
                return_lookback,
            } => {
                if let Some((index_returns, component_returns)) =
                    aligned_returns(ctx, index_symbol, components, *return_lookback)
                {
                    if let Some(cs) = state.update(&index_returns, &component_returns) {
                        reading.detail = ReadingDetail::CorrelationSpread {
                            implied: cs.implied,
                            realized: cs.realized,
                            spread: cs.spread,
                        };
                        if let Some(z) = cs.zscore {
                            reading.value = z;
                            reading.valid = true;
                        }
                    }
                }
            }
        }

        trace!(
            symbol,
            indicator = %kind,
            value = format!("{:.4}", reading.value),
            valid = reading.valid,
            "Indicator updated"
        );
        reading
    }
}

/// Return windows of the index and every component, all ending on the current
/// slice and gap-free. `None` if any series is stale, short or gapped.
fn aligned_returns(
    ctx: &MarketContext,
    index_symbol: &str,
    components: &[String],
    lookback: usize,
) -> Option<(Vec<f64>, Vec<Vec<f64>>)> {
    let fetch = |symbol: &str| -> Option<Vec<f64>> {
        if !ctx.is_current(symbol) {
            return None;
        }
        let window = ctx.window(symbol)?;
        if window.has_gap(lookback + 1) {
            return None;
        }
        let returns = window.log_returns(lookback);
        (returns.len() == lookback).then_some(returns)
    };

    let index = fetch(index_symbol)?;
    let comps = components
        .iter()
        .map(|c| fetch(c))
        .collect::<Option<Vec<_>>>()?;
    Some((index, comps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, BarSlice};
    use chrono::{Duration, TimeZone};

    fn slice_at(i: i64, closes: &[(&str, f64)]) -> BarSlice {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::hours(i);
        let mut slice = BarSlice::new(ts);
        for (sym, c) in closes {
            slice.insert(Bar {
                timestamp: ts,
                symbol: sym.to_string(),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 10_000.0,
            });
        }
        slice
    }

    #[test]
    fn entropy_engine_matches_batch_on_constant_series() {
        let params = IndicatorParams::default();
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(params.required_history(), None);
        let mut last = None;
        for i in 0..130 {
            ctx.ingest(&slice_at(i, &[("SPY", 100.0)]));
            last = Some(engine.update("SPY", &ctx));
        }
        let reading = last.unwrap();
        assert!(reading.valid);
        assert_eq!(reading.kind, IndicatorKind::PermutationEntropy);
        assert!(reading.value.abs() < 1e-12);
    }

    #[test]
    fn missing_bar_yields_invalid_reading() {
        let params = IndicatorParams::default();
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(120, None);
        for i in 0..30 {
            ctx.ingest(&slice_at(i, &[("SPY", 100.0 + i as f64), ("QQQ", 1.0)]));
            engine.update("SPY", &ctx);
        }
        ctx.ingest(&slice_at(30, &[("QQQ", 1.0)]));
        let r = engine.update("SPY", &ctx);
        assert!(!r.valid);
    }

    #[test]
    fn gap_invalidates_entropy() {
        let params = IndicatorParams::PermutationEntropy {
            lookback: 20,
            dimension: 3,
            delay: 1,
        };
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(20, Some(3_600));
        for i in 0..25 {
            ctx.ingest(&slice_at(i, &[("SPY", 100.0 + (i % 3) as f64)]));
            engine.update("SPY", &ctx);
        }
        ctx.ingest(&slice_at(30, &[("SPY", 101.0)]));
        assert!(!engine.update("SPY", &ctx).valid);
    }

    #[test]
    fn gap_restarts_entropy_patterns() {
        let params = IndicatorParams::PermutationEntropy {
            lookback: 20,
            dimension: 3,
            delay: 1,
        };
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(20, Some(3_600));
        let mut reading = None;
        for i in 0..25 {
            ctx.ingest(&slice_at(i, &[("SPY", 100.0 + (i % 3) as f64)]));
            reading = Some(engine.update("SPY", &ctx));
        }
        assert!(matches!(reading.unwrap().detail, ReadingDetail::Entropy { patterns } if patterns > 0));

        ctx.ingest(&slice_at(30, &[("SPY", 101.0)]));
        let r = engine.update("SPY", &ctx);
        assert!(matches!(r.detail, ReadingDetail::Entropy { patterns: 0 }));
    }

    #[test]
    fn hurst_engine_reports_unreliable_fit() {
        let params = IndicatorParams::Hurst {
            lookback: 100,
            min_lag: 2,
            max_lag: 20,
            min_r_squared: 0.8,
        };
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(100, None);
        let mut reading = None;
        for i in 0..100 {
            ctx.ingest(&slice_at(i, &[("SPY", 100.0 + i as f64)]));
            reading = Some(engine.update("SPY", &ctx));
        }
        let reading = reading.unwrap();
        assert!(reading.valid);
        assert!(reading.value > 0.9);
        assert!(matches!(reading.detail, ReadingDetail::Hurst { .. }));
    }

    #[test]
    fn term_structure_reads_proxies() {
        let params = IndicatorParams::TermStructure {
            near_symbol: "VXX".into(),
            far_symbol: "VIXM".into(),
            lookback: 5,
            min_std: 0.001,
        };
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(10, None);
        let mut reading = None;
        for i in 0..6 {
            let near = 20.0 + i as f64;
            ctx.ingest(&slice_at(i, &[("SPY", 400.0), ("VXX", near), ("VIXM", 20.0)]));
            reading = Some(engine.update("SPY", &ctx));
        }
        let reading = reading.unwrap();
        assert!(reading.valid);
        assert!(reading.value > 0.0);
        assert!(matches!(reading.detail, ReadingDetail::TermStructure { .. }));
    }

    #[test]
    fn validation_rejects_bad_dimension() {
        let params = IndicatorParams::PermutationEntropy {
            lookback: 120,
            dimension: 8,
            delay: 1,
        };
        assert!(params.validate().is_err());
        assert!(IndicatorParams::default().validate().is_ok());
    }

    #[test]
    fn vpin_unreliable_blocks_entries() {
        let r = IndicatorReading {
            symbol: "SPY".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            kind: IndicatorKind::Vpin,
            value: 0.8,
            valid: true,
            detail: ReadingDetail::Vpin {
                buy_fraction: 0.9,
                buckets: 50,
                reliable: false,
            },
        };
        assert!(!r.allows_entry());
    }

    #[test]
    fn rs_acceleration_history_spans_all_lookbacks() {
        let params = IndicatorParams::RsAcceleration {
            benchmark_symbol: "SPY".into(),
            rs_lookback: 20,
            velocity_lookback: 5,
            accel_lookback: 3,
        };
        assert_eq!(params.required_history(), 28);
        assert_eq!(params.reference_symbols(), vec!["SPY".to_string()]);
    }

    #[test]
    fn rejected_bar_leaves_vpin_buckets_untouched() {
        let params = IndicatorParams::Vpin {
            bucket_size: 10_000.0,
            num_buckets: 50,
            sigma_lookback: 5,
            bars_per_day: 7,
            min_daily_volume: 1.0,
        };
        let mut engine = IndicatorEngine::new(&params);
        let mut ctx = MarketContext::new(params.required_history(), None);
        for i in 0..4 {
            ctx.ingest(&slice_at(i, &[("SPY", 100.0 + i as f64)]));
            engine.update("SPY", &ctx);
        }
        let buckets = |e: &IndicatorEngine| match e {
            IndicatorEngine::Vpin { calc, .. } => calc.completed_buckets(),
            _ => unreachable!(),
        };
        let before = buckets(&engine);

        let rejected = ctx.ingest(&slice_at(3, &[("SPY", 103.0)]));
        assert_eq!(rejected, vec!["SPY".to_string()]);
        let r = engine.update("SPY", &ctx);
        assert!(!r.valid);
        assert_eq!(buckets(&engine), before);

        ctx.ingest(&slice_at(4, &[("SPY", 104.0)]));
        engine.update("SPY", &ctx);
        assert!(buckets(&engine) > before);
    }
}
