// =============================================================================
// Position Sizer -- confidence-scaled weights under a per-symbol cap
// =============================================================================
//
//   weight = min(cap × scale, cap × scale × clamp(confidence, 0, 1))
//
// Weights are fractions of portfolio equity, signed by direction.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::regime::RegimeZone;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_cap_per_symbol")]
    pub cap_per_symbol: f64,
    /// Smallest |Δweight| worth re-issuing while the zone is unchanged.
    #[serde(default = "default_min_rebalance_delta")]
    pub min_rebalance_delta: f64,
}

fn default_cap_per_symbol() -> f64 {
    0.30
}
fn default_min_rebalance_delta() -> f64 {
    0.05
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            cap_per_symbol: default_cap_per_symbol(),
            min_rebalance_delta: default_min_rebalance_delta(),
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.cap_per_symbol > 0.0 && self.cap_per_symbol <= 1.0) {
            anyhow::bail!("cap_per_symbol must be within (0, 1], got {}", self.cap_per_symbol);
        }
        if !(0.0..1.0).contains(&self.min_rebalance_delta) {
            anyhow::bail!("min_rebalance_delta must be within [0, 1)");
        }
        Ok(())
    }
}

/// Last weight issued for a symbol and the zone it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IssuedTarget {
    pub weight: f64,
    pub zone: RegimeZone,
    /// A partial exit cut the position; it may not grow back within `zone`.
    #[serde(default)]
    pub trimmed: bool,
}

impl IssuedTarget {
    pub fn new(weight: f64, zone: RegimeZone) -> Self {
        Self {
            weight,
            zone,
            trimmed: false,
        }
    }

    /// Record a partial exit that left `remaining`.
    pub fn trim(&mut self, remaining: f64) {
        self.weight = remaining;
        self.trimmed = true;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    cfg: SizingConfig,
}

impl PositionSizer {
    pub fn new(cfg: SizingConfig) -> Self {
        Self { cfg }
    }

    pub fn cap(&self) -> f64 {
        self.cfg.cap_per_symbol
    }

    /// Unsigned weight for a confidence and rule scale. Never exceeds the cap,
    /// even for out-of-range confidence; NaN confidence sizes to zero.
    pub fn weight(&self, confidence: f64, size_scale: f64) -> f64 {
        let scale = if size_scale.is_finite() {
            size_scale.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        let nominal = self.cfg.cap_per_symbol * scale;
        let weight = nominal.min(nominal * confidence);
        trace!(
            confidence = format!("{:.4}", confidence),
            scale = format!("{:.2}", scale),
            weight = format!("{:.4}", weight),
            "Sized target"
        );
        weight
    }

    /// Signed weight for a direction.
    pub fn target(&self, side: Side, confidence: f64, size_scale: f64) -> f64 {
        side.sign() * self.weight(confidence, size_scale)
    }

    /// New same-side target to send, or `None` when `desired` is not a
    /// material change from the last issued target.
    ///
    /// After a partial exit the target can only shrink until the zone
    /// changes; the trimmed weight stands as the ceiling.
    pub fn reissue(&self, last: Option<IssuedTarget>, desired: f64, zone: RegimeZone) -> Option<IssuedTarget> {
        let Some(prev) = last else {
            return (desired != 0.0).then(|| IssuedTarget::new(desired, zone));
        };
        if prev.zone != zone {
            return Some(IssuedTarget::new(desired, zone));
        }
        let weight = if prev.trimmed && desired.abs() > prev.weight.abs() {
            prev.weight
        } else {
            desired
        };
        ((weight - prev.weight).abs() >= self.cfg.min_rebalance_delta).then_some(IssuedTarget {
            weight,
            zone,
            trimmed: prev.trimmed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(SizingConfig {
            cap_per_symbol: 0.30,
            min_rebalance_delta: 0.05,
        })
    }

    #[test]
    fn weight_scales_with_confidence() {
        let s = sizer();
        assert!((s.weight(0.5, 1.0) - 0.15).abs() < 1e-12);
        assert!((s.weight(1.0, 0.7) - 0.21).abs() < 1e-12);
        assert_eq!(s.weight(0.0, 1.0), 0.0);
    }

    #[test]
    fn never_exceeds_cap() {
        let s = sizer();
        for conf in [1.0, 1.5, 10.0, f64::INFINITY] {
            assert!(s.weight(conf, 1.0) <= 0.30 + 1e-12, "conf {conf}");
            assert!(s.weight(conf, 3.0) <= 0.30 + 1e-12);
        }
        assert_eq!(s.weight(f64::NAN, 1.0), 0.0);
        assert_eq!(s.weight(-2.0, 1.0), 0.0);
    }

    #[test]
    fn signed_target_follows_side() {
        let s = sizer();
        assert!(s.target(Side::Short, 1.0, 1.0) < 0.0);
        assert!((s.target(Side::Long, 1.0, 1.0) - 0.30).abs() < 1e-12);
    }

    #[test]
    fn reissue_only_on_material_change() {
        let s = sizer();
        let last = Some(IssuedTarget::new(0.20, RegimeZone::Low));
        assert!(s.reissue(last, 0.22, RegimeZone::Low).is_none());
        assert_eq!(s.reissue(last, 0.26, RegimeZone::Low).map(|t| t.weight), Some(0.26));
        assert_eq!(s.reissue(last, 0.21, RegimeZone::High).map(|t| t.zone), Some(RegimeZone::High));
        assert!(s.reissue(None, 0.1, RegimeZone::Low).is_some());
        assert!(s.reissue(None, 0.0, RegimeZone::Low).is_none());
    }

    #[test]
    fn trimmed_target_never_regrows_in_same_zone() {
        let s = sizer();
        let mut t = IssuedTarget::new(0.30, RegimeZone::Low);
        t.trim(0.15);
        assert!(s.reissue(Some(t), 0.30, RegimeZone::Low).is_none());

        let shrunk = s.reissue(Some(t), 0.08, RegimeZone::Low).unwrap();
        assert!((shrunk.weight - 0.08).abs() < 1e-12);
        assert!(shrunk.trimmed);

        let fresh = s.reissue(Some(t), 0.30, RegimeZone::High).unwrap();
        assert!((fresh.weight - 0.30).abs() < 1e-12);
        assert!(!fresh.trimmed);
    }

    #[test]
    fn config_validation() {
        assert!(SizingConfig::default().validate().is_ok());
        let bad = SizingConfig {
            cap_per_symbol: 1.5,
            ..SizingConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
