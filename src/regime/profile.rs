// =============================================================================
// Regime profiles -- thresholds, hysteresis and confidence shaping
// =============================================================================
//
// One profile parameterises the generic classifier for one indicator. The
// band layout on the signal axis is:
//
//   <------ Low ------|low|--- Transition ---|high|------ High ------>
//                      low+margin         high-margin
//                      (exit Low)          (exit High)

use serde::{Deserialize, Serialize};

use crate::regime::classifier::RegimeZone;

/// Human-readable names for the three zones of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeLabels {
    pub low: String,
    pub transition: String,
    pub high: String,
}

impl RegimeLabels {
    pub fn new(low: &str, transition: &str, high: &str) -> Self {
        Self {
            low: low.to_string(),
            transition: transition.to_string(),
            high: high.to_string(),
        }
    }

    pub fn label(&self, zone: RegimeZone) -> &str {
        match zone {
            RegimeZone::Low => &self.low,
            RegimeZone::Transition => &self.transition,
            RegimeZone::High => &self.high,
        }
    }
}

impl Default for RegimeLabels {
    fn default() -> Self {
        Self::new("LOW", "TRANSITION", "HIGH")
    }
}

/// Classifier parameters for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeProfile {
    pub low_threshold: f64,
    pub high_threshold: f64,
    /// Hysteresis margin applied when leaving an extreme zone.
    #[serde(default)]
    pub margin: f64,
    /// Distance below `low_threshold` that maps to full Low confidence.
    pub low_span: f64,
    /// Distance above `high_threshold` that maps to full High confidence.
    pub high_span: f64,
    #[serde(default = "default_transition_confidence")]
    pub transition_confidence: f64,
    /// Per-bar |Δvalue| above which the regime is considered solidifying.
    pub acceleration_threshold: f64,
    #[serde(default = "default_acceleration_boost")]
    pub acceleration_boost: f64,
    /// Confidence multiplier applied per bar of invalid data.
    #[serde(default = "default_stale_decay")]
    pub stale_decay: f64,
    /// Permit Low <-> High in one bar without visiting Transition.
    #[serde(default)]
    pub allow_hard_flip: bool,
    #[serde(default)]
    pub labels: RegimeLabels,
}

fn default_transition_confidence() -> f64 {
    0.3
}
fn default_acceleration_boost() -> f64 {
    1.5
}
fn default_stale_decay() -> f64 {
    0.8
}

impl Default for RegimeProfile {
    fn default() -> Self {
        Self::entropy()
    }
}

impl RegimeProfile {
    /// Permutation entropy: low entropy trends, high entropy is noise.
    pub fn entropy() -> Self {
        Self {
            low_threshold: 0.65,
            high_threshold: 0.85,
            margin: 0.03,
            low_span: 0.65,
            high_span: 0.15,
            transition_confidence: default_transition_confidence(),
            acceleration_threshold: 0.05,
            acceleration_boost: default_acceleration_boost(),
            stale_decay: default_stale_decay(),
            allow_hard_flip: false,
            labels: RegimeLabels::new("TRENDING", "TRANSITIONING", "CHAOTIC"),
        }
    }

    /// Hurst exponent: persistence above 0.55, anti-persistence below 0.45.
    pub fn hurst() -> Self {
        Self {
            low_threshold: 0.45,
            high_threshold: 0.55,
            margin: 0.02,
            low_span: 0.45,
            high_span: 0.45,
            transition_confidence: default_transition_confidence(),
            acceleration_threshold: 0.05,
            acceleration_boost: default_acceleration_boost(),
            stale_decay: default_stale_decay(),
            allow_hard_flip: false,
            labels: RegimeLabels::new("MEAN_REVERTING", "RANDOM_WALK", "TRENDING"),
        }
    }

    /// VPIN: informed trading dominates above 0.65.
    pub fn vpin() -> Self {
        Self {
            low_threshold: 0.35,
            high_threshold: 0.65,
            margin: 0.05,
            low_span: 0.35,
            high_span: 0.35,
            transition_confidence: default_transition_confidence(),
            acceleration_threshold: 0.05,
            acceleration_boost: default_acceleration_boost(),
            stale_decay: default_stale_decay(),
            allow_hard_flip: false,
            labels: RegimeLabels::new("CLEAN", "NORMAL", "TOXIC"),
        }
    }

    /// Term-structure z-score: deep negative is backwardation (capitulation).
    pub fn term_structure() -> Self {
        Self {
            low_threshold: -1.5,
            high_threshold: 1.5,
            margin: 0.25,
            low_span: 1.0,
            high_span: 1.0,
            transition_confidence: default_transition_confidence(),
            acceleration_threshold: 0.5,
            acceleration_boost: default_acceleration_boost(),
            stale_decay: default_stale_decay(),
            allow_hard_flip: false,
            labels: RegimeLabels::new("BACKWARDATION", "NEUTRAL", "CONTANGO"),
        }
    }

    /// RS composite score in [0, 1].
    pub fn rs_acceleration() -> Self {
        Self {
            low_threshold: 0.4,
            high_threshold: 0.6,
            margin: 0.03,
            low_span: 0.4,
            high_span: 0.4,
            transition_confidence: default_transition_confidence(),
            acceleration_threshold: 0.05,
            acceleration_boost: default_acceleration_boost(),
            stale_decay: default_stale_decay(),
            allow_hard_flip: false,
            labels: RegimeLabels::new("LAGGING", "NEUTRAL", "LEADING"),
        }
    }

    /// Correlation spread z-score.
    pub fn correlation_spread() -> Self {
        Self {
            low_threshold: -1.5,
            high_threshold: 1.5,
            margin: 0.25,
            low_span: 2.0,
            high_span: 2.0,
            transition_confidence: default_transition_confidence(),
            acceleration_threshold: 0.5,
            acceleration_boost: default_acceleration_boost(),
            stale_decay: default_stale_decay(),
            allow_hard_flip: false,
            labels: RegimeLabels::new("REALIZED_RICH", "BALANCED", "IMPLIED_RICH"),
        }
    }

    pub fn label(&self, zone: RegimeZone) -> &str {
        self.labels.label(zone)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let finite = [
            self.low_threshold,
            self.high_threshold,
            self.margin,
            self.low_span,
            self.high_span,
            self.transition_confidence,
            self.acceleration_threshold,
            self.acceleration_boost,
            self.stale_decay,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            anyhow::bail!("regime profile contains a non-finite value");
        }
        if self.low_threshold >= self.high_threshold {
            anyhow::bail!(
                "regime low threshold {} must be below high threshold {}",
                self.low_threshold,
                self.high_threshold
            );
        }
        if self.margin < 0.0 || self.margin >= self.high_threshold - self.low_threshold {
            anyhow::bail!(
                "hysteresis margin {} must lie in [0, {})",
                self.margin,
                self.high_threshold - self.low_threshold
            );
        }
        if self.low_span <= 0.0 || self.high_span <= 0.0 {
            anyhow::bail!("confidence spans must be positive");
        }
        if !(0.0..=1.0).contains(&self.transition_confidence) {
            anyhow::bail!("transition confidence must be within [0, 1]");
        }
        if self.acceleration_threshold < 0.0 || self.acceleration_boost < 1.0 {
            anyhow::bail!("acceleration threshold must be >= 0 and boost >= 1");
        }
        if !(0.0..=1.0).contains(&self.stale_decay) {
            anyhow::bail!("stale decay must be within [0, 1]");
        }
        Ok(())
    }
}
