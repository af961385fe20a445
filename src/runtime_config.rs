// =============================================================================
// Runtime Configuration -- strategy settings with atomic save
// =============================================================================
//
// One `RuntimeConfig` fully describes a strategy: the traded universe, the
// indicator driving it, the regime classifier profile, the decision table and
// every sizing / exit / risk / portfolio knob.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. The struct carries `#[serde(default)]` so a partial file is completed
// from the default (entropy_regime) preset.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::diagnostics::DEFAULT_TELEMETRY_CAPACITY;
use crate::exit::{ExitConfig, TrailingStopConfig};
use crate::indicators::features::FeatureConfig;
use crate::indicators::IndicatorParams;
use crate::reconcile::ReconcileConfig;
use crate::regime::RegimeProfile;
use crate::risk::DrawdownConfig;
use crate::router::portfolio::{HedgeConfig, PortfolioConstraints};
use crate::strategy::{ActionTable, SizingConfig};

/// Names accepted by [`RuntimeConfig::preset`].
pub const PRESET_NAMES: [&str; 6] = [
    "entropy_regime",
    "fractal_breakout",
    "vpin_toxicity",
    "term_structure",
    "sector_rotation",
    "dispersion",
];

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Strategy name, used in logs and output.
    pub strategy: String,

    /// Symbols that receive allocations. Reference series (benchmarks,
    /// volatility proxies, hedge index) are tracked separately.
    pub universe: Vec<String>,

    pub indicator: IndicatorParams,
    pub profile: RegimeProfile,
    pub actions: ActionTable,
    pub features: FeatureConfig,
    pub sizing: SizingConfig,
    pub exits: ExitConfig,
    pub drawdown: DrawdownConfig,
    pub portfolio: PortfolioConstraints,
    pub reconcile: ReconcileConfig,

    /// Largest tolerated spacing between consecutive bars of one symbol.
    /// Readings over a wider gap are invalid. `None` disables the check.
    pub max_bar_gap_secs: Option<i64>,

    /// Diagnostic records retained by the telemetry sink.
    pub telemetry_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::entropy_regime()
    }
}

impl RuntimeConfig {
    // -------------------------------------------------------------------------
    // Presets
    // -------------------------------------------------------------------------

    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "entropy_regime" => Ok(Self::entropy_regime()),
            "fractal_breakout" => Ok(Self::fractal_breakout()),
            "vpin_toxicity" => Ok(Self::vpin_toxicity()),
            "term_structure" => Ok(Self::term_structure()),
            "sector_rotation" => Ok(Self::sector_rotation()),
            "dispersion" => Ok(Self::dispersion()),
            other => anyhow::bail!(
                "unknown preset '{other}', expected one of {}",
                PRESET_NAMES.join(", ")
            ),
        }
    }

    /// Permutation entropy on hourly index ETFs.
    pub fn entropy_regime() -> Self {
        Self {
            strategy: "entropy_regime".into(),
            universe: symbols(&["SPY", "QQQ", "IWM"]),
            indicator: IndicatorParams::PermutationEntropy {
                lookback: 120,
                dimension: 5,
                delay: 1,
            },
            profile: RegimeProfile::entropy(),
            actions: ActionTable::entropy_regime(),
            features: FeatureConfig::default(),
            sizing: SizingConfig {
                cap_per_symbol: 0.30,
                ..SizingConfig::default()
            },
            exits: ExitConfig {
                stop_loss_pct: 0.03,
                take_profit_pct: 0.05,
                take_fraction: 0.5,
                trailing: Some(TrailingStopConfig::new(0.02, 0.02).with_breakeven()),
                uncertainty_reduce_fraction: 0.5,
                exit_on_reversal: true,
                indicator_drop_exit: None,
            },
            drawdown: DrawdownConfig::default(),
            portfolio: PortfolioConstraints::default(),
            reconcile: ReconcileConfig::default(),
            max_bar_gap_secs: None,
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
        }
    }

    /// Hurst persistence gating 20-bar breakouts.
    pub fn fractal_breakout() -> Self {
        Self {
            strategy: "fractal_breakout".into(),
            universe: symbols(&["SPY", "QQQ"]),
            indicator: IndicatorParams::Hurst {
                lookback: 100,
                min_lag: 2,
                max_lag: 20,
                min_r_squared: 0.8,
            },
            profile: RegimeProfile::hurst(),
            actions: ActionTable::fractal_breakout(),
            sizing: SizingConfig {
                cap_per_symbol: 0.35,
                ..SizingConfig::default()
            },
            exits: ExitConfig {
                stop_loss_pct: 0.025,
                trailing: Some(TrailingStopConfig::new(0.03, 0.02)),
                ..ExitConfig::default()
            },
            ..Self::entropy_regime()
        }
    }

    /// VPIN toxicity on hourly bars.
    pub fn vpin_toxicity() -> Self {
        Self {
            strategy: "vpin_toxicity".into(),
            universe: symbols(&["SPY", "QQQ"]),
            indicator: IndicatorParams::Vpin {
                bucket_size: 50_000.0,
                num_buckets: 50,
                sigma_lookback: 20,
                bars_per_day: 7,
                min_daily_volume: 1_000_000.0,
            },
            profile: RegimeProfile::vpin(),
            actions: ActionTable::vpin_toxicity(),
            exits: ExitConfig {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.04,
                take_fraction: 1.0,
                trailing: Some(TrailingStopConfig::new(0.02, 0.015)),
                uncertainty_reduce_fraction: 0.0,
                exit_on_reversal: true,
                indicator_drop_exit: Some(0.15),
            },
            ..Self::entropy_regime()
        }
    }

    /// Volatility term structure trading SPY on daily bars.
    pub fn term_structure() -> Self {
        Self {
            strategy: "term_structure".into(),
            universe: symbols(&["SPY"]),
            indicator: IndicatorParams::TermStructure {
                near_symbol: "VXX".into(),
                far_symbol: "VIXM".into(),
                lookback: 60,
                min_std: 0.001,
            },
            profile: RegimeProfile::term_structure(),
            actions: ActionTable::term_structure(),
            sizing: SizingConfig {
                cap_per_symbol: 0.95,
                ..SizingConfig::default()
            },
            exits: ExitConfig {
                stop_loss_pct: 0.0,
                trailing: Some(TrailingStopConfig::new(0.0, 0.08)),
                ..ExitConfig::default()
            },
            drawdown: DrawdownConfig::new(0.15, 0.05),
            ..Self::entropy_regime()
        }
    }

    /// Relative-strength acceleration rotating the top three sectors.
    pub fn sector_rotation() -> Self {
        Self {
            strategy: "sector_rotation".into(),
            universe: symbols(&[
                "XLB", "XLC", "XLE", "XLF", "XLI", "XLK", "XLP", "XLRE", "XLU", "XLV", "XLY",
            ]),
            indicator: IndicatorParams::RsAcceleration {
                benchmark_symbol: "SPY".into(),
                rs_lookback: 20,
                velocity_lookback: 10,
                accel_lookback: 5,
            },
            profile: RegimeProfile::rs_acceleration(),
            actions: ActionTable::sector_rotation(),
            sizing: SizingConfig {
                cap_per_symbol: 0.25,
                ..SizingConfig::default()
            },
            exits: ExitConfig {
                stop_loss_pct: 0.08,
                ..ExitConfig::default()
            },
            drawdown: DrawdownConfig::new(0.18, 0.06),
            portfolio: PortfolioConstraints {
                gross_cap: 0.90,
                net_cap: 0.90,
                top_n: Some(3),
                hedge: None,
            },
            ..Self::entropy_regime()
        }
    }

    /// Implied vs realized correlation dispersion with an SPY hedge leg.
    pub fn dispersion() -> Self {
        let components = symbols(&["XLC", "XLE", "XLF", "XLI", "XLK", "XLP", "XLV", "XLY"]);
        Self {
            strategy: "dispersion".into(),
            universe: components.clone(),
            indicator: IndicatorParams::CorrelationSpread {
                index_symbol: "SPY".into(),
                components,
                return_lookback: 20,
                zscore_lookback: 60,
                min_std: 0.01,
                min_components: 5,
            },
            profile: RegimeProfile::correlation_spread(),
            actions: ActionTable::dispersion(),
            sizing: SizingConfig {
                cap_per_symbol: 0.10,
                min_rebalance_delta: 0.02,
            },
            exits: ExitConfig {
                stop_loss_pct: 0.0,
                ..ExitConfig::default()
            },
            drawdown: DrawdownConfig::new(0.12, 0.06),
            portfolio: PortfolioConstraints {
                gross_cap: 1.5,
                net_cap: 1.0,
                top_n: None,
                hedge: Some(HedgeConfig {
                    index_symbol: "SPY".into(),
                    hedge_ratio: 0.4,
                    max_index_weight: 0.40,
                }),
            },
            ..Self::entropy_regime()
        }
    }

    // -------------------------------------------------------------------------
    // Validation & persistence
    // -------------------------------------------------------------------------

    /// Reject configurations the router cannot run safely.
    pub fn validate(&self) -> Result<()> {
        if self.universe.is_empty() {
            anyhow::bail!("strategy '{}' has an empty universe", self.strategy);
        }
        if self.universe.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("universe contains an empty symbol");
        }
        if self.actions.rules.is_empty() {
            anyhow::bail!("strategy '{}' has no action rules", self.strategy);
        }
        if self.features.lookback < 2 {
            anyhow::bail!("feature lookback must be >= 2");
        }
        if let Some(gap) = self.max_bar_gap_secs {
            if gap <= 0 {
                anyhow::bail!("max_bar_gap_secs must be positive when set");
            }
        }
        self.indicator.validate().context("invalid indicator parameters")?;
        self.profile.validate().context("invalid regime profile")?;
        self.actions.validate().context("invalid action table")?;
        self.sizing.validate().context("invalid sizing config")?;
        self.exits.validate().context("invalid exit config")?;
        self.drawdown.validate().context("invalid drawdown config")?;
        self.portfolio
            .validate(&self.universe)
            .context("invalid portfolio constraints")?;
        self.reconcile.validate().context("invalid reconcile config")?;
        Ok(())
    }

    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            strategy = %config.strategy,
            universe = ?config.universe,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorKind;

    #[test]
    fn every_preset_validates() {
        for name in PRESET_NAMES {
            let cfg = RuntimeConfig::preset(name).unwrap();
            assert_eq!(cfg.strategy, name);
            cfg.validate().unwrap_or_else(|e| panic!("{name}: {e:#}"));
        }
    }

    #[test]
    fn vpin_preset_exits_when_toxicity_fades() {
        let cfg = RuntimeConfig::vpin_toxicity();
        assert_eq!(cfg.exits.indicator_drop_exit, Some(0.15));
        assert_eq!(RuntimeConfig::entropy_regime().exits.indicator_drop_exit, None);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(RuntimeConfig::preset("martingale").is_err());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::entropy_regime());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "strategy": "fast_entropy",
            "universe": ["DIA"],
            "indicator": { "indicator": "permutation_entropy", "lookback": 60, "dimension": 4, "delay": 2 },
            "sizing": { "cap_per_symbol": 0.2 }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.universe, vec!["DIA"]);
        assert_eq!(cfg.indicator.kind(), IndicatorKind::PermutationEntropy);
        assert_eq!(cfg.indicator.required_history(), 60);
        assert!((cfg.sizing.cap_per_symbol - 0.2).abs() < f64::EPSILON);
        assert!((cfg.sizing.min_rebalance_delta - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.actions, ActionTable::entropy_regime());
        cfg.validate().unwrap();
    }

    #[test]
    fn preset_roundtrips_through_json() {
        let cfg = RuntimeConfig::dispersion();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = RuntimeConfig::entropy_regime();
        cfg.universe.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::entropy_regime();
        cfg.profile.low_threshold = 0.9;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::entropy_regime();
        cfg.sizing.cap_per_symbol = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::entropy_regime();
        cfg.drawdown.recovery_drawdown = 0.2;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::entropy_regime();
        cfg.indicator = IndicatorParams::PermutationEntropy {
            lookback: 120,
            dimension: 8,
            delay: 1,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_load_is_atomic() {
        let dir = std::env::temp_dir().join(format!("regime-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let cfg = RuntimeConfig::sector_rotation();
        cfg.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
