use crate::constants::{MIN_CORRELATION_POINTS, ZERO_VARIANCE_EPSILON};
use crate::error::{AppError, Result};
use crate::models::{rank_order, CorrelationResult, Frequency, ProcessedSeries, RankedCandidate, SkipCounts};
use chrono::Datelike;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Target and candidate values paired on a common timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub target_values: Vec<f64>,
    pub candidate_values: Vec<f64>,

    /// Candidate observations that took part, ascending and unique
    pub candidate_indices: Vec<usize>,
}

impl Alignment {
    pub fn len(&self) -> usize {
        self.target_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_values.is_empty()
    }
}

/// Outcome of scoring one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateScore {
    Ranked(RankedCandidate),
    InsufficientOverlap { overlap: usize },
    ZeroVariance,
}

/// Aligns candidates to a target, scores them and ranks them
#[derive(Debug, Clone, Copy)]
pub struct CorrelationEngine {
    min_points: usize,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(MIN_CORRELATION_POINTS)
    }
}

impl CorrelationEngine {
    pub fn new(min_points: usize) -> Self {
        Self { min_points }
    }

    /// Rank `candidates` by |r| against `target`
    ///
    /// Candidates are scored in parallel; the merged list is then sorted by
    /// |coefficient| descending and identifier ascending, so the output does
    /// not depend on scheduling. `top_n = None` keeps the whole ranking.
    pub fn correlate(
        &self,
        target: &ProcessedSeries,
        candidates: &[ProcessedSeries],
        top_n: Option<usize>,
    ) -> Result<CorrelationResult> {
        if target.len() < self.min_points {
            return Err(AppError::InsufficientData {
                identifier: target.identifier.clone(),
                points: target.len(),
                required: self.min_points,
            });
        }

        let scores: Vec<CandidateScore> = candidates
            .par_iter()
            .map(|candidate| self.score(target, candidate))
            .collect();

        let mut ranked = Vec::with_capacity(scores.len());
        let mut skipped = SkipCounts::default();
        for score in scores {
            match score {
                CandidateScore::Ranked(candidate) => ranked.push(candidate),
                CandidateScore::InsufficientOverlap { .. } => skipped.insufficient_overlap += 1,
                CandidateScore::ZeroVariance => skipped.zero_variance += 1,
            }
        }

        ranked.sort_by(rank_order);
        if let Some(n) = top_n {
            ranked.truncate(n);
        }

        info!(
            "Ranked {} candidates against {} ({} below overlap, {} constant)",
            ranked.len(),
            target.identifier,
            skipped.insufficient_overlap,
            skipped.zero_variance
        );

        Ok(CorrelationResult {
            target: target.identifier.clone(),
            ranked,
            skipped,
        })
    }

    /// Align and score a single candidate
    pub fn score(&self, target: &ProcessedSeries, candidate: &ProcessedSeries) -> CandidateScore {
        let alignment = align(target, candidate);
        if alignment.len() < self.min_points {
            debug!(
                "{}: {} aligned points with {}, need {}",
                candidate.identifier,
                alignment.len(),
                target.identifier,
                self.min_points
            );
            return CandidateScore::InsufficientOverlap {
                overlap: alignment.len(),
            };
        }

        match pearson(&alignment.target_values, &alignment.candidate_values) {
            Some(coefficient) => CandidateScore::Ranked(RankedCandidate {
                identifier: candidate.identifier.clone(),
                coefficient,
                overlap: alignment.len(),
                series: candidate.select(&alignment.candidate_indices),
            }),
            None => {
                debug!("{}: zero variance on the aligned window", candidate.identifier);
                CandidateScore::ZeroVariance
            }
        }
    }
}

/// Pair target and candidate observations
///
/// Same frequency: exact timestamp match. Mixed daily/monthly: the monthly
/// value is held constant across the days of its calendar month.
///
/// The service never pairs mixed frequencies, since a monthly target forces
/// monthly candidates. The held path serves library callers that score
/// series of their own.
pub fn align(target: &ProcessedSeries, candidate: &ProcessedSeries) -> Alignment {
    match (target.frequency, candidate.frequency) {
        (Frequency::Daily, Frequency::Monthly) => {
            let held = hold_monthly(candidate, target);
            Alignment {
                target_values: held.daily_values,
                candidate_values: held.monthly_values,
                candidate_indices: held.monthly_used,
            }
        }
        (Frequency::Monthly, Frequency::Daily) => {
            let held = hold_monthly(target, candidate);
            Alignment {
                target_values: held.monthly_values,
                candidate_values: held.daily_values,
                candidate_indices: held.daily_used,
            }
        }
        _ => align_exact(target, candidate),
    }
}

/// Inner join on identical timestamps; both sides are sorted
fn align_exact(target: &ProcessedSeries, candidate: &ProcessedSeries) -> Alignment {
    let mut alignment = Alignment {
        target_values: Vec::new(),
        candidate_values: Vec::new(),
        candidate_indices: Vec::new(),
    };

    let (mut i, mut j) = (0, 0);
    while i < target.points.len() && j < candidate.points.len() {
        let (t, c) = (&target.points[i], &candidate.points[j]);
        match t.time.cmp(&c.time) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                alignment.target_values.push(t.value);
                alignment.candidate_values.push(c.value);
                alignment.candidate_indices.push(j);
                i += 1;
                j += 1;
            }
        }
    }
    alignment
}

struct HeldMonthly {
    monthly_values: Vec<f64>,
    daily_values: Vec<f64>,
    monthly_used: Vec<usize>,
    daily_used: Vec<usize>,
}

/// Pair each daily observation with its month's monthly value
fn hold_monthly(monthly: &ProcessedSeries, daily: &ProcessedSeries) -> HeldMonthly {
    let by_month: HashMap<(i32, u32), usize> = monthly
        .points
        .iter()
        .enumerate()
        .map(|(idx, p)| ((p.time.year(), p.time.month()), idx))
        .collect();

    let mut held = HeldMonthly {
        monthly_values: Vec::new(),
        daily_values: Vec::new(),
        monthly_used: Vec::new(),
        daily_used: Vec::new(),
    };

    for (daily_idx, point) in daily.points.iter().enumerate() {
        if let Some(&monthly_idx) = by_month.get(&(point.time.year(), point.time.month())) {
            held.monthly_values.push(monthly.points[monthly_idx].value);
            held.daily_values.push(point.value);
            held.daily_used.push(daily_idx);
            // Daily points are sorted, so months arrive in order
            if held.monthly_used.last() != Some(&monthly_idx) {
                held.monthly_used.push(monthly_idx);
            }
        }
    }
    held
}

/// Pearson correlation coefficient
///
/// `None` when either side is (numerically) constant or the inputs are
/// unusable. The result is clamped to [-1, 1].
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if is_constant(var_x / n, mean_x) || is_constant(var_y / n, mean_y) {
        return None;
    }

    let r = cov / (var_x * var_y).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

fn is_constant(variance: f64, mean: f64) -> bool {
    variance <= ZERO_VARIANCE_EPSILON * (1.0 + mean * mean)
}
