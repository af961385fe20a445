// =============================================================================
// Regime Classification Module
// =============================================================================
//
// One generic hysteresis state machine shared by every indicator. Indicator
// specifics (thresholds, margins, confidence spans, labels) live in a
// `RegimeProfile`; the trading interpretation of each zone lives in the
// strategy decision table, not here.

pub mod classifier;
pub mod profile;

pub use classifier::{RegimeClassifier, RegimeState, RegimeZone, ZoneChange};
pub use profile::{RegimeLabels, RegimeProfile};
