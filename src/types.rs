// =============================================================================
// Shared types used across the regime allocator
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar delivered by the execution/backtesting collaborator.
///
/// Bars are append-only and immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Log return from `prev_close` to this bar's close, `None` when either
    /// price is non-positive.
    pub fn log_return_from(&self, prev_close: f64) -> Option<f64> {
        if prev_close > 0.0 && self.close > 0.0 {
            Some((self.close / prev_close).ln())
        } else {
            None
        }
    }
}

/// Every bar delivered for a single timestamp, keyed by symbol.
///
/// `BTreeMap` gives the fixed iteration order the router relies on for
/// reproducible backtests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BarSlice {
    pub timestamp: DateTime<Utc>,
    pub bars: BTreeMap<String, Bar>,
}

impl BarSlice {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bars: BTreeMap::new(),
        }
    }

    /// Insert a bar; a later bar for the same symbol replaces the earlier one.
    pub fn insert(&mut self, bar: Bar) {
        self.bars.insert(bar.symbol.clone(), bar);
    }

    pub fn get(&self, symbol: &str) -> Option<&Bar> {
        self.bars.get(symbol)
    }

    pub fn close(&self, symbol: &str) -> Option<f64> {
        self.bars.get(symbol).map(|b| b.close)
    }
}

/// Fill confirmation from the execution collaborator.
///
/// `filled_size` is the signed change in position size expressed as a
/// fraction of portfolio equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub filled_size: f64,
    pub fill_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Sign applied to weights and returns: +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn from_size(size: f64) -> Option<Self> {
        if size > 0.0 {
            Some(Self::Long)
        } else if size < 0.0 {
            Some(Self::Short)
        } else {
            None
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// The indicator family that produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorKind {
    PermutationEntropy,
    Hurst,
    Vpin,
    TermStructure,
    RsAcceleration,
    CorrelationSpread,
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermutationEntropy => write!(f, "ENTROPY"),
            Self::Hurst => write!(f, "HURST"),
            Self::Vpin => write!(f, "VPIN"),
            Self::TermStructure => write!(f, "TERM_STRUCTURE"),
            Self::RsAcceleration => write!(f, "RS_ACCEL"),
            Self::CorrelationSpread => write!(f, "CORR_SPREAD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(symbol: &str, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            symbol: symbol.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn slice_iterates_in_symbol_order() {
        let mut slice = BarSlice::new(Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap());
        slice.insert(bar("SPY", 470.0));
        slice.insert(bar("IWM", 200.0));
        slice.insert(bar("QQQ", 400.0));
        let order: Vec<&str> = slice.bars.keys().map(|s| s.as_str()).collect();
        assert_eq!(order, vec!["IWM", "QQQ", "SPY"]);
    }

    #[test]
    fn log_return_guards_non_positive_prices() {
        let b = bar("SPY", 101.0);
        assert!((b.log_return_from(100.0).unwrap() - (1.01_f64).ln()).abs() < 1e-12);
        assert!(b.log_return_from(0.0).is_none());
    }

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.opposite(), Side::Long);
        assert_eq!(Side::from_size(-0.2), Some(Side::Short));
        assert_eq!(Side::from_size(0.0), None);
    }
}
