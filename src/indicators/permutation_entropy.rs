// =============================================================================
// Permutation Entropy -- ordinal-pattern complexity of a price series
// =============================================================================
//
// For every sub-sequence of length m (spaced by delay τ) the closes are ranked
// and the resulting ordinal pattern (one of m! permutations) is counted.
//
//   H = -Σ p(π) log2 p(π)        normalised by log2(m!) into [0, 1]
//
//   H near 0  =>  predictable, one pattern dominates (trending)
//   H near 1  =>  every pattern equally likely (noise / chaotic)
//
// Ties are ranked by position, so a flat sub-window always maps to the
// identity pattern and a constant series scores exactly 0.
//
// The rolling state keeps a pattern ring and histogram so each new bar costs
// O(m log m) plus the m! entropy sum.

use std::collections::VecDeque;

use tracing::trace;

/// Minimum number of closes per embedding dimension before a value is valid.
const MIN_BARS_PER_DIMENSION: usize = 4;

/// Compute the normalised permutation entropy of `series`.
///
/// Returns `None` when fewer than `m * 4` values are supplied, when `m < 2`
/// or `delay == 0`, or when no full embedding vector fits.
pub fn permutation_entropy(series: &[f64], m: usize, delay: usize) -> Option<f64> {
    if m < 2 || delay == 0 || series.len() < m * MIN_BARS_PER_DIMENSION {
        return None;
    }
    let span = (m - 1) * delay;
    if series.len() <= span {
        return None;
    }

    let mut counts = vec![0_u32; factorial(m)];
    let mut embedding = vec![0.0_f64; m];
    let mut total = 0_u32;

    for start in 0..series.len() - span {
        for (j, slot) in embedding.iter_mut().enumerate() {
            *slot = series[start + j * delay];
        }
        counts[pattern_index(&embedding)] += 1;
        total += 1;
    }

    Some(normalised_entropy(&counts, total, m))
}

/// Rolling permutation entropy over the last `lookback` closes of one symbol.
#[derive(Debug, Clone)]
pub struct PermutationEntropyState {
    m: usize,
    delay: usize,
    lookback: usize,
    /// Last `(m - 1) * delay + 1` closes, enough to form the newest pattern.
    recent: VecDeque<f64>,
    /// Pattern index of every embedding vector inside the lookback.
    patterns: VecDeque<usize>,
    counts: Vec<u32>,
    /// Closes observed, saturating at `lookback`.
    observed: usize,
}

impl PermutationEntropyState {
    pub fn new(lookback: usize, m: usize, delay: usize) -> Self {
        let m = m.max(2);
        let delay = delay.max(1);
        Self {
            m,
            delay,
            lookback,
            recent: VecDeque::with_capacity((m - 1) * delay + 2),
            patterns: VecDeque::with_capacity(lookback),
            counts: vec![0; factorial(m)],
            observed: 0,
        }
    }

    fn span(&self) -> usize {
        (self.m - 1) * self.delay
    }

    fn max_patterns(&self) -> usize {
        self.lookback.saturating_sub(self.span()).max(1)
    }

    /// Feed the next close.
    pub fn push(&mut self, close: f64) {
        self.observed = (self.observed + 1).min(self.lookback);
        self.recent.push_back(close);
        if self.recent.len() > self.span() + 1 {
            self.recent.pop_front();
        }
        if self.recent.len() < self.span() + 1 {
            return;
        }

        let embedding: Vec<f64> = (0..self.m)
            .map(|j| self.recent[j * self.delay])
            .collect();
        let idx = pattern_index(&embedding);
        self.patterns.push_back(idx);
        self.counts[idx] += 1;

        while self.patterns.len() > self.max_patterns() {
            if let Some(old) = self.patterns.pop_front() {
                self.counts[old] -= 1;
            }
        }
    }

    /// Drop all history (used when a gap invalidates the window).
    pub fn reset(&mut self) {
        self.recent.clear();
        self.patterns.clear();
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.observed = 0;
    }

    /// Number of ordinal patterns currently counted.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Current normalised entropy, `None` until `m * 4` closes are in the
    /// lookback.
    pub fn value(&self) -> Option<f64> {
        if self.observed < self.m * MIN_BARS_PER_DIMENSION || self.patterns.is_empty() {
            trace!(
                observed = self.observed,
                required = self.m * MIN_BARS_PER_DIMENSION,
                "Entropy: insufficient closes"
            );
            return None;
        }
        Some(normalised_entropy(
            &self.counts,
            self.patterns.len() as u32,
            self.m,
        ))
    }
}

/// Shannon entropy of the pattern histogram, normalised by log2(m!).
fn normalised_entropy(counts: &[u32], total: u32, m: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    let max_h = (factorial(m) as f64).log2();
    if max_h <= 0.0 {
        return 0.0;
    }
    (h / max_h).clamp(0.0, 1.0)
}

/// Map an embedding vector to the Lehmer index of its ordinal pattern.
fn pattern_index(embedding: &[f64]) -> usize {
    let m = embedding.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        embedding[a]
            .partial_cmp(&embedding[b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut index = 0_usize;
    for i in 0..m {
        let smaller_after = order[i + 1..].iter().filter(|&&v| v < order[i]).count();
        index = index * (m - i) + smaller_after;
    }
    index
}

fn factorial(n: usize) -> usize {
    (1..=n).product::<usize>().max(1)
}
