// =============================================================================
// Regime -> action decision table
// =============================================================================
//
// Each strategy maps (zone, confidence, price features) to a trading action
// through an ordered list of rules. The first matching rule wins; no match
// means Hold. Keeping the mapping as data leaves the classifier free of any
// strategy-specific interpretation.

use serde::{Deserialize, Serialize};

use crate::indicators::features::PriceFeatures;
use crate::indicators::{IndicatorReading, ReadingDetail};
use crate::regime::RegimeZone;

/// What the strategy wants for a symbol this bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    EnterLong,
    EnterShort,
    Exit,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnterLong => write!(f, "ENTER_LONG"),
            Self::EnterShort => write!(f, "ENTER_SHORT"),
            Self::Exit => write!(f, "EXIT"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Additional condition on price features or reading detail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "threshold", rename_all = "snake_case")]
pub enum EntryFilter {
    Always,
    MomentumAbove(f64),
    MomentumBelow(f64),
    DeviationBelow(f64),
    DeviationAbove(f64),
    BreakoutUp,
    BreakoutDown,
    /// RS velocity and acceleration both positive.
    RsMomentumPositive,
}

impl EntryFilter {
    pub fn passes(&self, features: Option<&PriceFeatures>, reading: &IndicatorReading) -> bool {
        match *self {
            Self::Always => true,
            Self::MomentumAbove(t) => features.is_some_and(|f| f.momentum > t),
            Self::MomentumBelow(t) => features.is_some_and(|f| f.momentum < t),
            Self::DeviationBelow(t) => features.is_some_and(|f| f.deviation < t),
            Self::DeviationAbove(t) => features.is_some_and(|f| f.deviation > t),
            Self::BreakoutUp => features.is_some_and(|f| f.breakout_up),
            Self::BreakoutDown => features.is_some_and(|f| f.breakout_down),
            Self::RsMomentumPositive => matches!(
                reading.detail,
                ReadingDetail::RsAcceleration { velocity, acceleration, .. }
                    if velocity > 0.0 && acceleration > 0.0
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    pub zone: RegimeZone,
    #[serde(default = "default_filter")]
    pub filter: EntryFilter,
    /// Confidence must exceed this value.
    #[serde(default)]
    pub min_confidence: f64,
    pub action: TradeAction,
    /// Multiplier on the per-symbol cap (e.g. 0.7 for mean-reversion entries).
    #[serde(default = "default_size_scale")]
    pub size_scale: f64,
}

fn default_filter() -> EntryFilter {
    EntryFilter::Always
}
fn default_size_scale() -> f64 {
    1.0
}

impl ActionRule {
    pub fn new(zone: RegimeZone, filter: EntryFilter, min_confidence: f64, action: TradeAction) -> Self {
        Self {
            zone,
            filter,
            min_confidence,
            action,
            size_scale: 1.0,
        }
    }

    pub fn scaled(mut self, size_scale: f64) -> Self {
        self.size_scale = size_scale;
        self
    }
}

/// The matched decision for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub action: TradeAction,
    pub size_scale: f64,
    /// Index of the matching rule, `None` for the implicit Hold.
    pub rule: Option<usize>,
}

impl Decision {
    pub fn hold() -> Self {
        Self {
            action: TradeAction::Hold,
            size_scale: 0.0,
            rule: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionTable {
    pub rules: Vec<ActionRule>,
}

impl ActionTable {
    pub fn new(rules: Vec<ActionRule>) -> Self {
        Self { rules }
    }

    /// First rule matching the zone, confidence and filter; Hold otherwise.
    pub fn decide(
        &self,
        zone: RegimeZone,
        confidence: f64,
        features: Option<&PriceFeatures>,
        reading: &IndicatorReading,
    ) -> Decision {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, r)| {
                r.zone == zone && confidence > r.min_confidence && r.filter.passes(features, reading)
            })
            .map(|(i, r)| Decision {
                action: r.action,
                size_scale: r.size_scale,
                rule: Some(i),
            })
            .unwrap_or_else(Decision::hold)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            if !(rule.size_scale > 0.0 && rule.size_scale <= 1.0) {
                anyhow::bail!("rule {i}: size_scale must be within (0, 1]");
            }
            if !(0.0..1.0).contains(&rule.min_confidence) {
                anyhow::bail!("rule {i}: min_confidence must be within [0, 1)");
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Strategy tables
    // -------------------------------------------------------------------------

    /// Trend-follow in low entropy, fade extremes in high entropy.
    pub fn entropy_regime() -> Self {
        use EntryFilter::*;
        use RegimeZone::*;
        Self::new(vec![
            ActionRule::new(Low, MomentumAbove(0.02), 0.5, TradeAction::EnterLong),
            ActionRule::new(Low, MomentumBelow(-0.02), 0.5, TradeAction::Exit),
            ActionRule::new(High, DeviationBelow(-0.03), 0.6, TradeAction::EnterLong).scaled(0.7),
            ActionRule::new(High, DeviationAbove(0.03), 0.6, TradeAction::Exit),
        ])
    }

    /// Trade breakouts only while the series is persistent.
    pub fn fractal_breakout() -> Self {
        use EntryFilter::*;
        use RegimeZone::*;
        Self::new(vec![
            ActionRule::new(High, BreakoutUp, 0.0, TradeAction::EnterLong),
            ActionRule::new(High, BreakoutDown, 0.0, TradeAction::Exit),
        ])
    }

    /// Toxic flow with positive momentum is followed long.
    pub fn vpin_toxicity() -> Self {
        Self::new(vec![ActionRule::new(
            RegimeZone::High,
            EntryFilter::MomentumAbove(0.01),
            0.5,
            TradeAction::EnterLong,
        )])
    }

    /// Backwardation buys equity, steep contango takes exposure off.
    pub fn term_structure() -> Self {
        Self::new(vec![
            ActionRule::new(RegimeZone::Low, EntryFilter::Always, 0.0, TradeAction::EnterLong),
            ActionRule::new(RegimeZone::High, EntryFilter::Always, 0.0, TradeAction::Exit),
        ])
    }

    /// Hold leading sectors with accelerating relative strength.
    pub fn sector_rotation() -> Self {
        Self::new(vec![
            ActionRule::new(
                RegimeZone::High,
                EntryFilter::RsMomentumPositive,
                0.0,
                TradeAction::EnterLong,
            ),
            ActionRule::new(RegimeZone::Low, EntryFilter::Always, 0.0, TradeAction::Exit),
        ])
    }

    /// Long components when implied correlation is rich, short when cheap.
    pub fn dispersion() -> Self {
        Self::new(vec![
            ActionRule::new(RegimeZone::High, EntryFilter::Always, 0.0, TradeAction::EnterLong),
            ActionRule::new(RegimeZone::Low, EntryFilter::Always, 0.0, TradeAction::EnterShort).scaled(0.5),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorKind;
    use chrono::{TimeZone, Utc};

    fn reading(detail: ReadingDetail) -> IndicatorReading {
        IndicatorReading {
            symbol: "XLK".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            kind: IndicatorKind::PermutationEntropy,
            value: 0.5,
            valid: true,
            detail,
        }
    }

    fn features(momentum: f64, deviation: f64) -> PriceFeatures {
        PriceFeatures {
            momentum,
            deviation,
            breakout_up: false,
            breakout_down: false,
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let table = ActionTable::entropy_regime();
        let r = reading(ReadingDetail::Empty);
        let d = table.decide(RegimeZone::Low, 0.8, Some(&features(0.05, 0.0)), &r);
        assert_eq!(d.action, TradeAction::EnterLong);
        assert_eq!(d.rule, Some(0));

        let d = table.decide(RegimeZone::High, 0.8, Some(&features(0.0, -0.05)), &r);
        assert_eq!(d.action, TradeAction::EnterLong);
        assert!((d.size_scale - 0.7).abs() < 1e-12);
    }

    #[test]
    fn confidence_floor_is_strict() {
        let table = ActionTable::entropy_regime();
        let r = reading(ReadingDetail::Empty);
        let d = table.decide(RegimeZone::Low, 0.5, Some(&features(0.05, 0.0)), &r);
        assert_eq!(d.action, TradeAction::Hold);
    }

    #[test]
    fn transition_holds_by_default() {
        let table = ActionTable::entropy_regime();
        let r = reading(ReadingDetail::Empty);
        let d = table.decide(RegimeZone::Transition, 1.0, Some(&features(0.1, -0.1)), &r);
        assert_eq!(d, Decision::hold());
    }

    #[test]
    fn missing_features_fail_price_filters() {
        let table = ActionTable::entropy_regime();
        let r = reading(ReadingDetail::Empty);
        assert_eq!(table.decide(RegimeZone::Low, 0.9, None, &r).action, TradeAction::Hold);
    }

    #[test]
    fn rs_filter_reads_detail() {
        let table = ActionTable::sector_rotation();
        let up = reading(ReadingDetail::RsAcceleration {
            level: 1.05,
            velocity: 0.002,
            acceleration: 0.0001,
        });
        let stalling = reading(ReadingDetail::RsAcceleration {
            level: 1.05,
            velocity: 0.002,
            acceleration: -0.0001,
        });
        assert_eq!(table.decide(RegimeZone::High, 0.5, None, &up).action, TradeAction::EnterLong);
        assert_eq!(table.decide(RegimeZone::High, 0.5, None, &stalling).action, TradeAction::Hold);
    }

    #[test]
    fn presets_validate() {
        for t in [
            ActionTable::entropy_regime(),
            ActionTable::fractal_breakout(),
            ActionTable::vpin_toxicity(),
            ActionTable::term_structure(),
            ActionTable::sector_rotation(),
            ActionTable::dispersion(),
        ] {
            t.validate().unwrap();
        }
    }
}
