// =============================================================================
// Symbol slot -- per-symbol indicator and regime state
// =============================================================================
//
// Each traded symbol owns one slot. A slot only touches its own state and
// reads the shared market context, so slots for different symbols can be
// evaluated concurrently. Positions are not part of the slot; they belong to
// the router's single-writer portfolio step.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::indicators::features::{FeatureConfig, PriceFeatures};
use crate::indicators::{IndicatorEngine, IndicatorParams, IndicatorReading, ReadingDetail};
use crate::market_data::MarketContext;
use crate::regime::{RegimeClassifier, RegimeState};
use crate::strategy::{ActionTable, Decision, TradeAction};

/// Read-only evaluation policy shared by every slot.
#[derive(Debug, Clone)]
pub struct SlotPolicy {
    pub classifier: RegimeClassifier,
    pub table: ActionTable,
    pub features: FeatureConfig,
}

#[derive(Debug, Clone)]
pub struct SymbolSlot {
    symbol: String,
    engine: IndicatorEngine,
    regime: RegimeState,
}

/// Result of evaluating one slot for one bar.
#[derive(Debug, Clone)]
pub struct SymbolEvaluation {
    pub symbol: String,
    pub reading: IndicatorReading,
    /// Regime after this bar's classification.
    pub regime: RegimeState,
    pub decision: Decision,
    /// Close of this bar, if the symbol traded in it.
    pub close: Option<f64>,
}

impl SymbolSlot {
    pub fn new(symbol: &str, params: &IndicatorParams) -> Self {
        let engine = IndicatorEngine::new(params);
        let regime = RegimeState::new(symbol, engine.kind());
        Self {
            symbol: symbol.to_string(),
            engine,
            regime,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn regime(&self) -> &RegimeState {
        &self.regime
    }

    /// Indicator -> classifier -> decision table for the latest slice.
    pub fn evaluate(&mut self, ctx: &MarketContext, policy: &SlotPolicy) -> SymbolEvaluation {
        let reading = self.engine.update(&self.symbol, ctx);
        policy.classifier.classify(&mut self.regime, &reading);

        let current = ctx.is_current(&self.symbol);
        let window = ctx.window(&self.symbol);
        let close = if current {
            window.and_then(|w| w.last_close())
        } else {
            None
        };
        let features = if current {
            window.and_then(|w| PriceFeatures::compute(w, &policy.features))
        } else {
            None
        };

        let decision = match self.regime.zone {
            Some(zone) if reading.valid => {
                let d = policy
                    .table
                    .decide(zone, self.regime.confidence, features.as_ref(), &reading);
                let is_entry = matches!(d.action, TradeAction::EnterLong | TradeAction::EnterShort);
                if is_entry && !reading.allows_entry() {
                    Decision::hold()
                } else {
                    d
                }
            }
            _ => Decision::hold(),
        };

        trace!(
            symbol = %self.symbol,
            value = format!("{:.4}", reading.value),
            valid = reading.valid,
            regime = %self.regime.label,
            confidence = format!("{:.4}", self.regime.confidence),
            action = %decision.action,
            "Slot evaluated"
        );

        SymbolEvaluation {
            symbol: self.symbol.clone(),
            reading,
            regime: self.regime.clone(),
            decision,
            close,
        }
    }

    /// Evaluation placeholder for a slot whose evaluation did not complete.
    pub fn skipped(&self, ctx: &MarketContext) -> SymbolEvaluation {
        let timestamp = ctx.timestamp().unwrap_or(DateTime::<Utc>::MIN_UTC);
        SymbolEvaluation {
            symbol: self.symbol.clone(),
            reading: IndicatorReading {
                symbol: self.symbol.clone(),
                timestamp,
                kind: self.engine.kind(),
                value: f64::NAN,
                valid: false,
                detail: ReadingDetail::Empty,
            },
            regime: self.regime.clone(),
            decision: Decision::hold(),
            close: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::RegimeProfile;
    use crate::types::{Bar, BarSlice};
    use chrono::{Duration, TimeZone};

    fn policy() -> SlotPolicy {
        SlotPolicy {
            classifier: RegimeClassifier::new(RegimeProfile::entropy()),
            table: ActionTable::entropy_regime(),
            features: FeatureConfig::default(),
        }
    }

    fn slice(i: i64, close: f64) -> BarSlice {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 14, 0, 0).unwrap() + Duration::hours(i);
        let mut s = BarSlice::new(ts);
        s.insert(Bar {
            timestamp: ts,
            symbol: "SPY".into(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        });
        s
    }

    #[test]
    fn under_filled_window_holds() {
        let mut ctx = MarketContext::new(200, None);
        let mut slot = SymbolSlot::new("SPY", &IndicatorParams::default());
        let p = policy();
        for i in 0..10 {
            ctx.ingest(&slice(i, 100.0 + i as f64));
            let eval = slot.evaluate(&ctx, &p);
            assert!(!eval.reading.valid);
            assert_eq!(eval.decision.action, TradeAction::Hold);
            assert_eq!(eval.regime.zone, None);
        }
    }

    #[test]
    fn steady_trend_is_classified_low_entropy() {
        let mut ctx = MarketContext::new(200, None);
        let mut slot = SymbolSlot::new("SPY", &IndicatorParams::default());
        let p = policy();
        let mut last = None;
        for i in 0..130 {
            ctx.ingest(&slice(i, 100.0 * (1.0 + 0.002 * i as f64)));
            last = Some(slot.evaluate(&ctx, &p));
        }
        let eval = last.unwrap();
        assert!(eval.reading.valid);
        assert_eq!(eval.regime.label, "TRENDING");
        assert_eq!(eval.close, ctx.window("SPY").unwrap().last_close());
        assert_eq!(eval.decision.action, TradeAction::EnterLong);
    }

    #[test]
    fn missing_bar_yields_no_close() {
        let mut ctx = MarketContext::new(200, None);
        let mut slot = SymbolSlot::new("SPY", &IndicatorParams::default());
        ctx.ingest(&slice(0, 100.0));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        ctx.ingest(&BarSlice::new(ts));
        let eval = slot.evaluate(&ctx, &policy());
        assert_eq!(eval.close, None);
        assert!(!eval.reading.valid);
    }
}
