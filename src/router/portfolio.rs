// =============================================================================
// Portfolio constraints -- rank cut, hedge leg, gross / net caps
// =============================================================================
//
// Applied once per bar by the router's single-writer step, after every symbol
// has proposed a target weight:
//
//   1. top-N: keep the N long candidates with the highest indicator value
//   2. hedge: index weight = -hedge_ratio × Σ basket weights, capped
//   3. caps:  one proportional factor so that gross <= gross_cap and
//             |net| <= net_cap (preserves the hedge ratio)
//
// Targets are kept in a BTreeMap so every pass iterates in symbol order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeConfig {
    pub index_symbol: String,
    /// Index weight per unit of basket weight (sign is applied).
    pub hedge_ratio: f64,
    /// Absolute cap on the index weight.
    pub max_index_weight: f64,
}

impl HedgeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index_symbol.is_empty() {
            anyhow::bail!("hedge index_symbol must not be empty");
        }
        if !(self.hedge_ratio > 0.0 && self.hedge_ratio.is_finite()) {
            anyhow::bail!("hedge_ratio must be positive");
        }
        if !(self.max_index_weight > 0.0 && self.max_index_weight <= 1.0) {
            anyhow::bail!("max_index_weight must be within (0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    #[serde(default = "default_gross_cap")]
    pub gross_cap: f64,
    #[serde(default = "default_net_cap")]
    pub net_cap: f64,
    /// Hold at most this many long positions, ranked by indicator value.
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub hedge: Option<HedgeConfig>,
}

fn default_gross_cap() -> f64 {
    1.0
}
fn default_net_cap() -> f64 {
    1.0
}

impl Default for PortfolioConstraints {
    fn default() -> Self {
        Self {
            gross_cap: default_gross_cap(),
            net_cap: default_net_cap(),
            top_n: None,
            hedge: None,
        }
    }
}

impl PortfolioConstraints {
    pub fn validate(&self, universe: &[String]) -> anyhow::Result<()> {
        if !(self.gross_cap > 0.0 && self.gross_cap <= 2.0) {
            anyhow::bail!("gross_cap must be within (0, 2], got {}", self.gross_cap);
        }
        if !(self.net_cap > 0.0 && self.net_cap <= 1.0) {
            anyhow::bail!("net_cap must be within (0, 1], got {}", self.net_cap);
        }
        if self.top_n == Some(0) {
            anyhow::bail!("top_n must be at least 1 when set");
        }
        if let Some(h) = &self.hedge {
            h.validate()?;
            if universe.contains(&h.index_symbol) {
                anyhow::bail!("hedge index {} must not be part of the traded universe", h.index_symbol);
            }
        }
        Ok(())
    }
}

/// One symbol's proposed weight before portfolio constraints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    pub weight: f64,
    /// Indicator value used for ranking.
    pub score: f64,
}

/// What the constraint pass changed, for reason tags and logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintReport {
    /// Long candidates dropped by the rank cut.
    pub ranked_out: Vec<String>,
    /// Factor applied to all weights by the caps (1.0 = unconstrained).
    pub scale: f64,
    /// Index weight set by the hedge, if configured.
    pub hedge_weight: Option<f64>,
}

/// Apply the constraints in place. The hedge index, when configured, is
/// inserted into `targets`.
pub fn apply_constraints(
    constraints: &PortfolioConstraints,
    proposals: &BTreeMap<String, Proposal>,
    targets: &mut BTreeMap<String, f64>,
) -> ConstraintReport {
    let mut report = ConstraintReport {
        scale: 1.0,
        ..ConstraintReport::default()
    };

    for (symbol, p) in proposals {
        targets.insert(symbol.clone(), sanitize(p.weight));
    }

    // 1. rank cut
    if let Some(n) = constraints.top_n {
        let mut longs: Vec<(&String, f64)> = proposals
            .iter()
            .filter(|(s, _)| targets.get(*s).copied().unwrap_or(0.0) > 0.0)
            .map(|(s, p)| (s, if p.score.is_finite() { p.score } else { f64::NEG_INFINITY }))
            .collect();
        // Stable sort keeps symbol order among equal scores.
        longs.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (symbol, _) in longs.into_iter().skip(n) {
            targets.insert(symbol.clone(), 0.0);
            report.ranked_out.push(symbol.clone());
        }
        report.ranked_out.sort();
    }

    // 2. hedge
    if let Some(hedge) = &constraints.hedge {
        let basket: f64 = targets
            .iter()
            .filter(|(s, _)| **s != hedge.index_symbol)
            .map(|(_, w)| *w)
            .sum();
        let mut index_weight = -hedge.hedge_ratio * basket;
        if index_weight.abs() > hedge.max_index_weight {
            let shrink = hedge.max_index_weight / index_weight.abs();
            for (symbol, w) in targets.iter_mut() {
                if *symbol != hedge.index_symbol {
                    *w *= shrink;
                }
            }
            index_weight = index_weight.signum() * hedge.max_index_weight;
        }
        targets.insert(hedge.index_symbol.clone(), index_weight);
        report.hedge_weight = Some(index_weight);
    }

    // 3. caps
    let gross: f64 = targets.values().map(|w| w.abs()).sum();
    let net: f64 = targets.values().sum();
    let mut scale: f64 = 1.0;
    if gross > constraints.gross_cap {
        scale = scale.min(constraints.gross_cap / gross);
    }
    if net.abs() > constraints.net_cap {
        scale = scale.min(constraints.net_cap / net.abs());
    }
    if scale < 1.0 {
        for w in targets.values_mut() {
            *w *= scale;
        }
        if let Some(h) = report.hedge_weight.as_mut() {
            *h *= scale;
        }
        debug!(
            gross = format!("{:.4}", gross),
            net = format!("{:.4}", net),
            scale = format!("{:.4}", scale),
            "Exposure caps applied"
        );
    }
    report.scale = scale;
    report
}

fn sanitize(w: f64) -> f64 {
    if w.is_finite() {
        w.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposals(items: &[(&str, f64, f64)]) -> BTreeMap<String, Proposal> {
        items
            .iter()
            .map(|(s, w, score)| (s.to_string(), Proposal { weight: *w, score: *score }))
            .collect()
    }

    #[test]
    fn top_n_keeps_highest_scores() {
        let c = PortfolioConstraints {
            top_n: Some(2),
            ..PortfolioConstraints::default()
        };
        let p = proposals(&[
            ("XLE", 0.25, 0.70),
            ("XLF", 0.25, 0.90),
            ("XLK", 0.25, 0.80),
            ("XLU", 0.00, 0.99),
        ]);
        let mut targets = BTreeMap::new();
        let report = apply_constraints(&c, &p, &mut targets);
        assert_eq!(report.ranked_out, vec!["XLE".to_string()]);
        assert_eq!(targets["XLE"], 0.0);
        assert_eq!(targets["XLF"], 0.25);
        assert_eq!(targets["XLK"], 0.25);
    }

    #[test]
    fn gross_cap_scales_proportionally() {
        let c = PortfolioConstraints {
            gross_cap: 0.90,
            ..PortfolioConstraints::default()
        };
        let p = proposals(&[("A", 0.30, 0.0), ("B", 0.30, 0.0), ("C", 0.30, 0.0), ("D", 0.30, 0.0)]);
        let mut targets = BTreeMap::new();
        let report = apply_constraints(&c, &p, &mut targets);
        assert!((report.scale - 0.75).abs() < 1e-12);
        let gross: f64 = targets.values().map(|w| w.abs()).sum();
        assert!((gross - 0.90).abs() < 1e-12);
        assert!((targets["A"] - 0.225).abs() < 1e-12);
    }

    #[test]
    fn net_cap_binds_independently() {
        let c = PortfolioConstraints {
            gross_cap: 2.0,
            net_cap: 0.5,
            ..PortfolioConstraints::default()
        };
        let p = proposals(&[("A", 0.4, 0.0), ("B", 0.4, 0.0)]);
        let mut targets = BTreeMap::new();
        apply_constraints(&c, &p, &mut targets);
        let net: f64 = targets.values().sum();
        assert!((net - 0.5).abs() < 1e-12);
    }

    #[test]
    fn hedge_links_index_to_basket() {
        let c = PortfolioConstraints {
            gross_cap: 2.0,
            hedge: Some(HedgeConfig {
                index_symbol: "SPY".into(),
                hedge_ratio: 0.4,
                max_index_weight: 0.40,
            }),
            ..PortfolioConstraints::default()
        };
        let p = proposals(&[("XLF", 0.1, 0.0), ("XLK", 0.1, 0.0), ("XLV", 0.1, 0.0)]);
        let mut targets = BTreeMap::new();
        let report = apply_constraints(&c, &p, &mut targets);
        assert!((targets["SPY"] + 0.12).abs() < 1e-12);
        assert_eq!(report.hedge_weight, Some(targets["SPY"]));
    }

    #[test]
    fn hedge_cap_shrinks_basket() {
        let c = PortfolioConstraints {
            gross_cap: 2.0,
            hedge: Some(HedgeConfig {
                index_symbol: "SPY".into(),
                hedge_ratio: 1.0,
                max_index_weight: 0.2,
            }),
            ..PortfolioConstraints::default()
        };
        let p = proposals(&[("XLF", 0.2, 0.0), ("XLK", 0.2, 0.0)]);
        let mut targets = BTreeMap::new();
        apply_constraints(&c, &p, &mut targets);
        assert!((targets["SPY"] + 0.2).abs() < 1e-12);
        assert!((targets["XLF"] - 0.1).abs() < 1e-12);
        let basket = targets["XLF"] + targets["XLK"];
        assert!((targets["SPY"] + basket).abs() < 1e-12);
    }

    #[test]
    fn hedge_index_in_universe_is_rejected() {
        let c = PortfolioConstraints {
            hedge: Some(HedgeConfig {
                index_symbol: "SPY".into(),
                hedge_ratio: 0.5,
                max_index_weight: 0.4,
            }),
            ..PortfolioConstraints::default()
        };
        assert!(c.validate(&["SPY".to_string()]).is_err());
        assert!(c.validate(&["XLK".to_string()]).is_ok());
    }
}
