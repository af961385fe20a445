// =============================================================================
// Regime Classifier -- generic hysteresis state machine
// =============================================================================
//
// Every indicator is classified by the same three-zone machine, parameterised
// by a `RegimeProfile`. Zone moves are one step per bar:
//
//   Low        -> Transition   when v > low + margin
//   Transition -> Low          when v < low
//   Transition -> High         when v > high
//   High       -> Transition   when v < high - margin
//
// Low <-> High in one bar only when the profile allows a hard flip.
//
// Confidence is the normalised distance past the crossed threshold, boosted
// while the signal moves fast, and decayed while data stays invalid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::indicators::IndicatorReading;
use crate::regime::profile::RegimeProfile;
use crate::types::IndicatorKind;

/// The three zones of the generic classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeZone {
    Low,
    Transition,
    High,
}

impl RegimeZone {
    /// The other extreme; Transition has none.
    pub fn opposite(self) -> Option<Self> {
        match self {
            Self::Low => Some(Self::High),
            Self::High => Some(Self::Low),
            Self::Transition => None,
        }
    }

    pub fn is_extreme(self) -> bool {
        !matches!(self, Self::Transition)
    }
}

impl std::fmt::Display for RegimeZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Transition => write!(f, "TRANSITION"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Regime of one (symbol, indicator) pair. Only the classifier mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub symbol: String,
    pub kind: IndicatorKind,
    /// `None` until the first valid reading seeds the machine.
    pub zone: Option<RegimeZone>,
    pub label: String,
    /// In [0, 1].
    pub confidence: f64,
    pub entered_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_value: Option<f64>,
    /// Per-bar change of the last two valid values.
    pub rate_of_change: f64,
    /// Consecutive bars without a valid reading.
    pub stale_bars: u32,
}

impl RegimeState {
    pub fn new(symbol: &str, kind: IndicatorKind) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            zone: None,
            label: String::new(),
            confidence: 0.0,
            entered_at: None,
            updated_at: None,
            last_value: None,
            rate_of_change: 0.0,
            stale_bars: 0,
        }
    }
}

/// Outcome of one classification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneChange {
    pub from: Option<RegimeZone>,
    pub to: RegimeZone,
}

/// Stateless classifier; all mutable state lives in `RegimeState`.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    profile: RegimeProfile,
}

impl RegimeClassifier {
    pub fn new(profile: RegimeProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &RegimeProfile {
        &self.profile
    }

    /// Zone implied by a value with no prior state.
    fn seed_zone(&self, v: f64) -> RegimeZone {
        let p = &self.profile;
        if v > p.high_threshold {
            RegimeZone::High
        } else if v < p.low_threshold {
            RegimeZone::Low
        } else {
            RegimeZone::Transition
        }
    }

    /// One hysteresis step from `current`.
    pub fn next_zone(&self, current: RegimeZone, v: f64) -> RegimeZone {
        let p = &self.profile;
        match current {
            RegimeZone::Low => {
                if p.allow_hard_flip && v > p.high_threshold {
                    RegimeZone::High
                } else if v > p.low_threshold + p.margin {
                    RegimeZone::Transition
                } else {
                    RegimeZone::Low
                }
            }
            RegimeZone::Transition => {
                if v > p.high_threshold {
                    RegimeZone::High
                } else if v < p.low_threshold {
                    RegimeZone::Low
                } else {
                    RegimeZone::Transition
                }
            }
            RegimeZone::High => {
                if p.allow_hard_flip && v < p.low_threshold {
                    RegimeZone::Low
                } else if v < p.high_threshold - p.margin {
                    RegimeZone::Transition
                } else {
                    RegimeZone::High
                }
            }
        }
    }

    /// Confidence of `v` within `zone` given its per-bar change.
    pub fn confidence(&self, zone: RegimeZone, v: f64, rate_of_change: f64) -> f64 {
        let p = &self.profile;
        let base = match zone {
            RegimeZone::High => (v - p.high_threshold) / p.high_span,
            RegimeZone::Low => (p.low_threshold - v) / p.low_span,
            RegimeZone::Transition => p.transition_confidence,
        };
        let mut confidence = if base.is_finite() {
            base.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if rate_of_change.abs() > p.acceleration_threshold {
            confidence = (confidence * p.acceleration_boost).min(1.0);
        }
        confidence
    }

    /// Fold one reading into the state. Returns the zone change, if any.
    ///
    /// Invalid readings hold the zone and decay confidence; they never push
    /// the state into Transition on their own.
    pub fn classify(&self, state: &mut RegimeState, reading: &IndicatorReading) -> Option<ZoneChange> {
        state.updated_at = Some(reading.timestamp);

        if !reading.valid || !reading.value.is_finite() {
            state.stale_bars = state.stale_bars.saturating_add(1);
            state.confidence *= self.profile.stale_decay;
            trace!(
                symbol = %state.symbol,
                indicator = %state.kind,
                stale_bars = state.stale_bars,
                confidence = format!("{:.4}", state.confidence),
                "Regime held on invalid reading"
            );
            return None;
        }

        let v = reading.value;
        let rate_of_change = state.last_value.map(|prev| v - prev).unwrap_or(0.0);
        let previous = state.zone;
        let zone = match previous {
            Some(current) => self.next_zone(current, v),
            None => self.seed_zone(v),
        };

        state.stale_bars = 0;
        state.last_value = Some(v);
        state.rate_of_change = rate_of_change;
        state.confidence = self.confidence(zone, v, rate_of_change);
        state.zone = Some(zone);
        state.label = self.profile.label(zone).to_string();

        if previous == Some(zone) {
            trace!(
                symbol = %state.symbol,
                regime = %state.label,
                value = format!("{:.4}", v),
                confidence = format!("{:.4}", state.confidence),
                "Regime unchanged"
            );
            return None;
        }

        state.entered_at = Some(reading.timestamp);
        match previous {
            Some(from) => info!(
                symbol = %state.symbol,
                indicator = %state.kind,
                from = %self.profile.label(from),
                to = %state.label,
                value = format!("{:.4}", v),
                confidence = format!("{:.4}", state.confidence),
                "Regime change"
            ),
            None => debug!(
                symbol = %state.symbol,
                indicator = %state.kind,
                regime = %state.label,
                value = format!("{:.4}", v),
                "Regime seeded"
            ),
        }
        Some(ZoneChange { from: previous, to: zone })
    }
}
