use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{CoError, CoResult};

/// Tuning of the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalParams {
    /// Residuals within `±epsilon` samples of zero count as hits.
    pub epsilon: f64,
    /// Global offset search range, in rounds of the known width.
    pub max_round_offset: f64,
}

impl Default for EvalParams {
    fn default() -> Self {
        Self {
            epsilon: 0.005,
            max_round_offset: 300.0,
        }
    }
}

/// Agreement between detected indices and ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStats {
    /// Fraction of found events whose corrected residual is a hit.
    pub hit_rate: f64,
    pub hits: usize,
    /// Mean corrected residual, in rounds.
    pub mean: f64,
    /// Population standard deviation of the residuals, in rounds.
    pub std_dev: f64,
    /// 95th percentile of `|residual|`, in rounds.
    pub quantile_95: f64,
    /// Events with `|residual| >= rounds`.
    pub missed: usize,
    /// Global offset (samples) added to every residual.
    pub correction_offset: i64,
    /// Corrected residuals in rounds, one per found index in ascending order.
    pub residuals_rounds: Vec<f64>,
    /// Counts of `residuals_rounds` in unit bins centered on `-rounds..=rounds`.
    /// Residuals beyond the range land in the edge bins.
    pub histogram: Vec<usize>,
}

/// Signed distance from `x` to the nearest entry of sorted `truth`.
///
/// Equidistant ground-truth entries resolve to the earlier one.
fn nearest_residual(x: i64, truth: &[i64]) -> i64 {
    let i = truth.partition_point(|&t| t < x);
    let after = truth.get(i).map(|&t| x - t);
    let before = i.checked_sub(1).map(|j| x - truth[j]);
    match (before, after) {
        (Some(b), Some(a)) => {
            if b.abs() <= a.abs() {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => 0,
    }
}

/// Global offset within `±max_adj` that turns the most residuals into hits.
///
/// Only offsets within `epsilon` of some `-residual` can score, so each
/// residual votes for its own few candidates instead of scanning the whole
/// range. Ties go to the smallest `|offset|`, negative first; with no hits at
/// all the offset is 0.
fn best_offset(residuals: &[i64], epsilon: f64, max_adj: i64) -> (i64, usize) {
    let mut votes: BTreeMap<i64, usize> = BTreeMap::new();
    for &r in residuals {
        let lo = ((-r as f64) - epsilon).ceil() as i64;
        let hi = ((-r as f64) + epsilon).floor() as i64;
        for adj in lo.max(-max_adj)..=hi.min(max_adj) {
            *votes.entry(adj).or_insert(0) += 1;
        }
    }
    votes
        .into_iter()
        .fold((0, 0), |best, (adj, hits)| {
            let better = hits > best.1
                || (hits == best.1 && (adj.abs(), adj) < (best.0.abs(), best.0));
            if better {
                (adj, hits)
            } else {
                best
            }
        })
}

/// Linearly interpolated quantile of sorted `values`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Score `found` against `truth`.
///
/// Both sets are sorted. Each found index is matched to its nearest truth
/// index, then one global integer offset within
/// `±ceil(known_width * max_round_offset)` is chosen to maximize the hits
/// (smallest `|offset|` on ties) and applied to every residual.
pub fn evaluate(
    found: &[usize],
    truth: &[usize],
    known_width: f64,
    rounds: usize,
    params: &EvalParams,
) -> CoResult<AlignmentStats> {
    if found.is_empty() {
        return Err(CoError::EmptyInput("found indices"));
    }
    if truth.is_empty() {
        return Err(CoError::EmptyInput("ground-truth indices"));
    }
    if !(known_width.is_finite() && known_width > 0.0) {
        return Err(CoError::config("known_width", format!("must be positive, got {known_width}")));
    }
    if !(params.epsilon >= 0.0 && params.max_round_offset >= 0.0) {
        return Err(CoError::config("epsilon", "evaluation tolerances must be >= 0"));
    }

    let mut found: Vec<i64> = found.iter().map(|&x| x as i64).collect();
    let mut truth: Vec<i64> = truth.iter().map(|&x| x as i64).collect();
    found.sort_unstable();
    truth.sort_unstable();

    let residuals: Vec<i64> = found.iter().map(|&x| nearest_residual(x, &truth)).collect();
    let max_adj = (known_width * params.max_round_offset).ceil() as i64;
    let (correction_offset, hits) = best_offset(&residuals, params.epsilon, max_adj);

    let residuals_rounds: Vec<f64> = residuals
        .iter()
        .map(|&r| (r + correction_offset) as f64 / known_width)
        .collect();
    let n = residuals_rounds.len() as f64;
    let mean = residuals_rounds.iter().sum::<f64>() / n;
    let std_dev = (residuals_rounds.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    let mut magnitudes: Vec<f64> = residuals_rounds.iter().map(|r| r.abs()).collect();
    magnitudes.sort_by(f64::total_cmp);
    let quantile_95 = quantile(&magnitudes, 0.95);
    let missed = magnitudes.iter().filter(|&&m| m >= rounds as f64).count();

    let r = rounds as i64;
    let mut histogram = vec![0usize; 2 * rounds + 1];
    for &v in &residuals_rounds {
        let bin = (v.round() as i64).clamp(-r, r) + r;
        histogram[bin as usize] += 1;
    }

    let hit_rate = hits as f64 / residuals.len() as f64;
    tracing::info!(
        hit_rate,
        correction_offset,
        mean,
        std_dev,
        missed,
        "alignment evaluated"
    );

    Ok(AlignmentStats {
        hit_rate,
        hits,
        mean,
        std_dev,
        quantile_95,
        missed,
        correction_offset,
        residuals_rounds,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sets() {
        let truth = vec![100, 900, 300, 500];
        let stats = evaluate(&truth, &truth, 40.0, 4, &EvalParams::default()).unwrap();
        assert_eq!(stats.hit_rate, 1.0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.quantile_95, 0.0);
        assert_eq!(stats.missed, 0);
        assert_eq!(stats.correction_offset, 0);
        assert_eq!(stats.histogram, vec![0, 0, 0, 0, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_global_offset_is_removed() {
        let truth = vec![100, 500, 900];
        let found: Vec<usize> = truth.iter().map(|&t| t + 7).collect();
        let stats = evaluate(&found, &truth, 40.0, 4, &EvalParams::default()).unwrap();
        assert_eq!(stats.correction_offset, -7);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn test_residual_statistics() {
        let truth = vec![1000, 2000, 3000, 4000];
        // Two exact, one 2 rounds late, one 5 rounds early
        let found = vec![1000, 2000, 3080, 3800];
        let params = EvalParams {
            epsilon: 0.5,
            max_round_offset: 0.0,
        };
        let stats = evaluate(&found, &truth, 40.0, 4, &params).unwrap();
        assert_eq!(stats.residuals_rounds, vec![0.0, 0.0, 2.0, -5.0]);
        assert_eq!(stats.hits, 2);
        assert!((stats.hit_rate - 0.5).abs() < 1e-12);
        assert!((stats.mean + 0.75).abs() < 1e-12);
        assert_eq!(stats.missed, 1);
        // |r| sorted: 0, 0, 2, 5 -> pos 2.85 -> 2 + 0.85 * 3
        assert!((stats.quantile_95 - 4.55).abs() < 1e-12);
        // -5 clamps into the -4 edge bin
        assert_eq!(stats.histogram, vec![1, 0, 0, 0, 2, 0, 1, 0, 0]);
    }

    #[test]
    fn test_far_offset_on_wide_rounds() {
        // 2000 events, offset search range ±150000 samples
        let truth: Vec<usize> = (0..2000).map(|e| 1_000 + e * 400_000).collect();
        let found: Vec<usize> = truth.iter().map(|&t| t + 123_456).collect();
        let stats = evaluate(&found, &truth, 500.0, 4, &EvalParams::default()).unwrap();
        assert_eq!(stats.correction_offset, -123_456);
        assert_eq!(stats.hits, 2000);
        assert_eq!(stats.mean, 0.0);
    }

    #[test]
    fn test_offset_tie_prefers_smaller_negative() {
        assert_eq!(best_offset(&[3, -3], 0.005, 100), (-3, 1));
        assert_eq!(best_offset(&[3, -3, 0], 0.005, 100), (0, 1));
        assert_eq!(best_offset(&[7, 7, -2], 0.005, 100), (-7, 2));
        // Out of range offsets cannot win
        assert_eq!(best_offset(&[7, 7, -2], 0.005, 5), (2, 1));
        assert_eq!(best_offset(&[], 0.005, 5), (0, 0));
    }

    #[test]
    fn test_tie_prefers_earlier_truth() {
        assert_eq!(nearest_residual(150, &[100, 200]), 50);
        assert_eq!(nearest_residual(160, &[100, 200]), -40);
        assert_eq!(nearest_residual(50, &[100, 200]), -50);
        assert_eq!(nearest_residual(250, &[100, 200]), 50);
    }

    #[test]
    fn test_empty_inputs() {
        let p = EvalParams::default();
        assert_eq!(
            evaluate(&[], &[1], 10.0, 2, &p).unwrap_err(),
            CoError::EmptyInput("found indices")
        );
        assert!(matches!(
            evaluate(&[1], &[1], 0.0, 2, &p),
            Err(CoError::InvalidConfig { .. })
        ));
    }
}
