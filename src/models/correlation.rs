use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::ProcessedSeries;

/// One ranked counterpart of the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// Candidate ticker or code
    pub identifier: String,

    /// Pearson coefficient in [-1, 1]
    pub coefficient: f64,

    /// Number of aligned value pairs the coefficient was computed on
    pub overlap: usize,

    /// Candidate series restricted to the aligned window
    pub series: ProcessedSeries,
}

/// Candidates left out of a ranking, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    /// Aligned overlap below the minimum point count
    pub insufficient_overlap: usize,

    /// Constant series on either side, coefficient undefined
    pub zero_variance: usize,

    /// Candidate itself too short after truncation/resampling
    pub insufficient_data: usize,

    /// Candidate could not be loaded
    pub unavailable: usize,

    /// Candidate history starts after the start month or ends before the target's last month
    #[serde(default)]
    pub incomplete_coverage: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.insufficient_overlap
            + self.zero_variance
            + self.insufficient_data
            + self.unavailable
            + self.incomplete_coverage
    }

    pub fn merge(&mut self, other: SkipCounts) {
        self.insufficient_overlap += other.insufficient_overlap;
        self.zero_variance += other.zero_variance;
        self.insufficient_data += other.insufficient_data;
        self.unavailable += other.unavailable;
        self.incomplete_coverage += other.incomplete_coverage;
    }
}

/// Ranking of candidates against one target
///
/// `ranked` is ordered by |coefficient| descending, ties by identifier ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub target: String,
    pub ranked: Vec<RankedCandidate>,
    pub skipped: SkipCounts,
}

impl CorrelationResult {
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Strongest positive correlations, most positive first
    pub fn top_positive(&self, n: usize) -> Vec<&RankedCandidate> {
        top_positive(&self.ranked, n)
    }

    /// Strongest negative correlations, most negative first
    pub fn top_negative(&self, n: usize) -> Vec<&RankedCandidate> {
        top_negative(&self.ranked, n)
    }
}

/// Up to `n` candidates with r > 0, most positive first
pub fn top_positive<'a>(candidates: impl IntoIterator<Item = &'a RankedCandidate>, n: usize) -> Vec<&'a RankedCandidate> {
    let mut positive: Vec<&RankedCandidate> = candidates.into_iter().filter(|c| c.coefficient > 0.0).collect();
    positive.sort_by(|a, b| {
        b.coefficient
            .partial_cmp(&a.coefficient)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
    positive.truncate(n);
    positive
}

/// Up to `n` candidates with r < 0, most negative first
pub fn top_negative<'a>(candidates: impl IntoIterator<Item = &'a RankedCandidate>, n: usize) -> Vec<&'a RankedCandidate> {
    let mut negative: Vec<&RankedCandidate> = candidates.into_iter().filter(|c| c.coefficient < 0.0).collect();
    negative.sort_by(|a, b| {
        a.coefficient
            .partial_cmp(&b.coefficient)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
    negative.truncate(n);
    negative
}

/// Ranking order: |coefficient| descending, then identifier ascending
pub fn rank_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.coefficient
        .abs()
        .partial_cmp(&a.coefficient.abs())
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.identifier.cmp(&b.identifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, SourceMode};

    fn candidate(id: &str, coefficient: f64) -> RankedCandidate {
        RankedCandidate {
            identifier: id.to_string(),
            coefficient,
            overlap: 30,
            series: ProcessedSeries {
                identifier: id.to_string(),
                source: SourceMode::Price,
                frequency: Frequency::Daily,
                points: vec![],
                levels: vec![],
            },
        }
    }

    #[test]
    fn test_rank_order_ties_break_by_identifier() {
        let mut ranked = vec![
            candidate("ZZZ", 0.5),
            candidate("AAA", -0.5),
            candidate("MMM", 0.9),
        ];
        ranked.sort_by(rank_order);

        let ids: Vec<&str> = ranked.iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(ids, vec!["MMM", "AAA", "ZZZ"]);
    }

    #[test]
    fn test_top_positive_and_negative() {
        let result = CorrelationResult {
            target: "SPY".to_string(),
            ranked: vec![
                candidate("A", 0.9),
                candidate("B", -0.8),
                candidate("C", 0.3),
                candidate("D", -0.2),
            ],
            skipped: SkipCounts::default(),
        };

        let positive: Vec<&str> = result.top_positive(5).iter().map(|c| c.identifier.as_str()).collect();
        let negative: Vec<&str> = result.top_negative(1).iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(positive, vec!["A", "C"]);
        assert_eq!(negative, vec!["B"]);
    }

    #[test]
    fn test_skip_counts_merge() {
        let mut counts = SkipCounts {
            zero_variance: 1,
            ..SkipCounts::default()
        };
        counts.merge(SkipCounts {
            insufficient_overlap: 2,
            unavailable: 3,
            incomplete_coverage: 4,
            ..SkipCounts::default()
        });
        assert_eq!(counts.total(), 10);
        assert_eq!(counts.incomplete_coverage, 4);
    }
}
