use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::types::{Bar, BarSlice};

// ---------------------------------------------------------------------------
// BarWindow -- ring buffer of the last K bars for one symbol
// ---------------------------------------------------------------------------

/// Ring buffer holding the most recent `capacity` bars of a single symbol.
///
/// Timestamps must be strictly increasing; out-of-order or duplicate bars are
/// rejected so that the window stays append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarWindow {
    bars: VecDeque<Bar>,
    capacity: usize,
    /// Largest tolerated spacing between consecutive bars (seconds).
    max_gap_secs: Option<i64>,
}

impl BarWindow {
    pub fn new(capacity: usize, max_gap_secs: Option<i64>) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
            max_gap_secs,
        }
    }

    /// Append a bar, evicting the oldest one when full.
    ///
    /// Returns `false` (and leaves the window untouched) when the bar does not
    /// advance the timestamp.
    pub fn push(&mut self, bar: Bar) -> bool {
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                return false;
            }
        }
        self.bars.push_back(bar);
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.back().map(|b| b.timestamp)
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.back().map(|b| b.close)
    }

    /// Iterate the stored bars oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    /// The most recent `count` closes, oldest-first. Fewer are returned when
    /// the window holds fewer bars.
    pub fn closes(&self, count: usize) -> Vec<f64> {
        let start = self.bars.len().saturating_sub(count);
        self.bars.iter().skip(start).map(|b| b.close).collect()
    }

    /// Log returns between the most recent `count + 1` closes (oldest-first).
    /// Pairs with a non-positive price are skipped.
    pub fn log_returns(&self, count: usize) -> Vec<f64> {
        let closes = self.closes(count + 1);
        closes
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect()
    }

    /// Whether any consecutive pair among the last `count` bars is spaced
    /// further apart than the configured tolerance.
    pub fn has_gap(&self, count: usize) -> bool {
        let Some(max_gap) = self.max_gap_secs else {
            return false;
        };
        let max_gap = Duration::seconds(max_gap);
        let start = self.bars.len().saturating_sub(count);
        self.bars
            .iter()
            .skip(start)
            .zip(self.bars.iter().skip(start + 1))
            .any(|(a, b)| b.timestamp - a.timestamp > max_gap)
    }
}

// ---------------------------------------------------------------------------
// MarketContext -- all symbol windows, written once per bar
// ---------------------------------------------------------------------------

/// Per-symbol bar windows for every instrument the router needs, including
/// reference series (benchmarks, volatility proxies, basket components) that
/// are read but never traded.
///
/// The router is the single writer: it ingests each slice before any symbol is
/// evaluated, after which the context is shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketContext {
    windows: BTreeMap<String, BarWindow>,
    capacity: usize,
    max_gap_secs: Option<i64>,
    timestamp: Option<DateTime<Utc>>,
    /// Symbols whose bar in the latest slice was rejected.
    #[serde(default)]
    rejected: BTreeSet<String>,
}

impl MarketContext {
    pub fn new(capacity: usize, max_gap_secs: Option<i64>) -> Self {
        Self {
            windows: BTreeMap::new(),
            capacity,
            max_gap_secs,
            timestamp: None,
            rejected: BTreeSet::new(),
        }
    }

    /// Register a symbol so that its window exists before its first bar.
    pub fn track(&mut self, symbol: &str) {
        let capacity = self.capacity;
        let max_gap = self.max_gap_secs;
        self.windows
            .entry(symbol.to_string())
            .or_insert_with(|| BarWindow::new(capacity, max_gap));
    }

    /// Append every bar in the slice to its symbol's window.
    ///
    /// Returns the symbols whose bar was rejected for not advancing time.
    pub fn ingest(&mut self, slice: &BarSlice) -> Vec<String> {
        let mut rejected = Vec::new();
        for (symbol, bar) in &slice.bars {
            self.track(symbol);
            let accepted = self
                .windows
                .get_mut(symbol)
                .map(|w| w.push(bar.clone()))
                .unwrap_or(false);
            if accepted {
                trace!(symbol = %symbol, close = bar.close, "bar appended");
            } else {
                warn!(
                    symbol = %symbol,
                    timestamp = %bar.timestamp,
                    "bar rejected: timestamp does not advance window"
                );
                rejected.push(symbol.clone());
            }
        }
        self.timestamp = Some(slice.timestamp);
        self.rejected = rejected.iter().cloned().collect();
        rejected
    }

    pub fn window(&self, symbol: &str) -> Option<&BarWindow> {
        self.windows.get(symbol)
    }

    /// Timestamp of the most recently ingested slice.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Whether `symbol` received an accepted bar in the most recent slice.
    pub fn is_current(&self, symbol: &str) -> bool {
        if self.rejected.contains(symbol) {
            return false;
        }
        match (self.timestamp, self.window(symbol).and_then(|w| w.last_timestamp())) {
            (Some(now), Some(last)) => now == last,
            _ => false,
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.windows.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(symbol: &str, hour: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap(),
            symbol: symbol.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn window_evicts_oldest_when_full() {
        let mut w = BarWindow::new(3, None);
        for (h, c) in [(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)] {
            assert!(w.push(bar_at("SPY", h, c)));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.closes(10), vec![2.0, 3.0, 4.0]);
        assert_eq!(w.closes(2), vec![3.0, 4.0]);
    }

    #[test]
    fn window_rejects_non_increasing_timestamps() {
        let mut w = BarWindow::new(5, None);
        assert!(w.push(bar_at("SPY", 5, 1.0)));
        assert!(!w.push(bar_at("SPY", 5, 2.0)));
        assert!(!w.push(bar_at("SPY", 4, 2.0)));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn log_returns_cover_requested_count() {
        let mut w = BarWindow::new(10, None);
        for (h, c) in [(1, 100.0), (2, 110.0), (3, 99.0)] {
            w.push(bar_at("SPY", h, c));
        }
        let r = w.log_returns(2);
        assert_eq!(r.len(), 2);
        assert!((r[0] - (1.1_f64).ln()).abs() < 1e-12);
        assert!((r[1] - (99.0_f64 / 110.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn gap_detection_respects_tolerance() {
        let mut w = BarWindow::new(10, Some(3600));
        w.push(bar_at("SPY", 1, 1.0));
        w.push(bar_at("SPY", 2, 1.0));
        assert!(!w.has_gap(10));
        w.push(bar_at("SPY", 5, 1.0));
        assert!(w.has_gap(10));
        // The gap falls outside a lookback of the last bar only.
        assert!(!w.has_gap(1));
    }

    #[test]
    fn context_tracks_current_symbols() {
        let mut ctx = MarketContext::new(10, None);
        let mut slice = BarSlice::new(Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap());
        slice.insert(bar_at("SPY", 1, 1.0));
        slice.insert(bar_at("QQQ", 1, 1.0));
        assert!(ctx.ingest(&slice).is_empty());

        let mut next = BarSlice::new(Utc.with_ymd_and_hms(2024, 3, 4, 2, 0, 0).unwrap());
        next.insert(bar_at("SPY", 2, 1.1));
        ctx.ingest(&next);
        assert!(ctx.is_current("SPY"));
        assert!(!ctx.is_current("QQQ"));
        assert!(!ctx.is_current("IWM"));
    }

    #[test]
    fn duplicate_slice_is_not_current() {
        let mut ctx = MarketContext::new(10, None);
        let mut slice = BarSlice::new(Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap());
        slice.insert(bar_at("SPY", 1, 1.0));
        ctx.ingest(&slice);
        assert!(ctx.is_current("SPY"));

        assert_eq!(ctx.ingest(&slice), vec!["SPY".to_string()]);
        assert!(!ctx.is_current("SPY"));
        assert_eq!(ctx.window("SPY").unwrap().len(), 1);

        let mut next = BarSlice::new(Utc.with_ymd_and_hms(2024, 3, 4, 2, 0, 0).unwrap());
        next.insert(bar_at("SPY", 2, 1.1));
        assert!(ctx.ingest(&next).is_empty());
        assert!(ctx.is_current("SPY"));
    }
}
