use crate::algorithms::common::{sliding_dot_product, to_f64};
use crate::core::error::{CoError, CoResult};
use crate::core::profile::{RollingStats, SimilarityProfile, SENTINEL};
use crate::core::similarity_metric::{Metric, ReferenceStats, SimilarityMetric};
use crate::metrics::correlation::PearsonCorrelation;
use crate::metrics::sad::NegatedSad;

/// Minimum number of positions before dispatching to the thread pool.
#[cfg(feature = "parallel")]
const MIN_PARALLEL_POSITIONS: usize = 1024;

/// Score `reference` against the trace window at every position in `positions`.
///
/// Positions whose window `pos..pos + reference.len()` leaves the trace get
/// [`SENTINEL`]. The result is independent of how positions are split across
/// worker threads.
pub fn score(
    trace: &[f32],
    reference: &[f32],
    positions: &[usize],
    metric: Metric,
) -> CoResult<Vec<f32>> {
    if reference.is_empty() {
        return Err(CoError::EmptyInput("reference window"));
    }
    Ok(match metric {
        Metric::Correlation => score_positions::<PearsonCorrelation>(trace, reference, positions),
        Metric::Sad => score_positions::<NegatedSad>(trace, reference, positions),
    })
}

/// Monomorphized kernel behind [`score`].
pub fn score_positions<S: SimilarityMetric>(
    trace: &[f32],
    reference: &[f32],
    positions: &[usize],
) -> Vec<f32> {
    let n = reference.len();
    let eval = |&pos: &usize| -> f32 {
        match pos.checked_add(n) {
            Some(end) if end <= trace.len() => S::score(&trace[pos..end], reference) as f32,
            _ => SENTINEL,
        }
    };

    #[cfg(feature = "parallel")]
    if positions.len() >= MIN_PARALLEL_POSITIONS {
        use rayon::prelude::*;
        return positions.par_iter().map(eval).collect();
    }

    positions.iter().map(eval).collect()
}

/// Score `reference` on the grid `start, start + step, ...` up to the trace end.
///
/// Grid points whose window does not fit carry [`SENTINEL`], so the profile
/// covers the whole trace.
pub fn grid_profile(
    trace: &[f32],
    reference: &[f32],
    start: usize,
    step: usize,
    metric: Metric,
) -> CoResult<SimilarityProfile> {
    if step == 0 {
        return Err(CoError::config("step", "must be >= 1"));
    }
    let positions: Vec<usize> = (start..trace.len()).step_by(step).collect();
    let scores = score(trace, reference, &positions, metric)?;
    Ok(SimilarityProfile {
        scores,
        start,
        step,
        window: reference.len(),
        metric,
    })
}

/// Score `reference` at every position `0..=trace.len() - reference.len()`.
///
/// Correlation goes through the FFT sliding dot product against the centered
/// reference; SAD falls back to the direct kernel.
pub fn dense_profile(
    trace: &[f32],
    reference: &[f32],
    metric: Metric,
) -> CoResult<SimilarityProfile> {
    if reference.is_empty() {
        return Err(CoError::EmptyInput("reference window"));
    }
    if reference.len() > trace.len() {
        return Err(CoError::InsufficientData {
            required: reference.len(),
            available: trace.len(),
        });
    }
    let scores = match metric {
        Metric::Correlation => dense_scores::<PearsonCorrelation>(trace, reference),
        Metric::Sad => dense_scores::<NegatedSad>(trace, reference),
    };
    Ok(SimilarityProfile::dense(scores, reference.len(), metric))
}

fn dense_scores<S: SimilarityMetric>(trace: &[f32], reference: &[f32]) -> Vec<f32> {
    let m = reference.len();
    if !S::supports_dense_fft() {
        let positions: Vec<usize> = (0..=trace.len() - m).collect();
        return score_positions::<S>(trace, reference, &positions);
    }

    let ts = to_f64(trace);
    let ref_stats = ReferenceStats::compute(reference);
    let centered = ref_stats.centered(reference);
    let qt = sliding_dot_product(&centered, &ts);
    let stats = RollingStats::compute(&ts, m);

    qt.iter()
        .enumerate()
        .map(|(i, &q)| S::qt_to_score(q, i, &stats, &ref_stats) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| ((i as f32) * 0.31).sin() + 0.5 * ((i as f32) * 0.07).cos())
            .collect()
    }

    #[test]
    fn test_self_scores() {
        let trace = wave(200);
        let reference = trace[50..90].to_vec();
        let corr = score(&trace, &reference, &[50], Metric::Correlation).unwrap();
        assert!((corr[0] - 1.0).abs() < 1e-5, "self-correlation {}", corr[0]);
        let sad = score(&trace, &reference, &[50], Metric::Sad).unwrap();
        assert_eq!(sad[0], 0.0);
    }

    #[test]
    fn test_out_of_bounds_is_sentinel() {
        let trace = wave(100);
        let reference = trace[0..30].to_vec();
        let scores = score(&trace, &reference, &[70, 71, usize::MAX], Metric::Sad).unwrap();
        assert_ne!(scores[0], SENTINEL);
        assert_eq!(scores[1], SENTINEL);
        assert_eq!(scores[2], SENTINEL);
    }

    #[test]
    fn test_empty_reference_rejected() {
        let trace = wave(10);
        assert_eq!(
            score(&trace, &[], &[0], Metric::Correlation).unwrap_err(),
            CoError::EmptyInput("reference window")
        );
    }

    #[test]
    fn test_dense_fft_matches_direct() {
        let trace = wave(3000);
        let reference = trace[1000..1100].to_vec();
        let dense = dense_profile(&trace, &reference, Metric::Correlation).unwrap();
        let positions: Vec<usize> = (0..dense.len()).collect();
        let direct = score(&trace, &reference, &positions, Metric::Correlation).unwrap();
        assert_eq!(dense.len(), trace.len() - reference.len() + 1);
        for (i, (a, b)) in dense.scores.iter().zip(direct.iter()).enumerate() {
            assert!((a - b).abs() < 1e-4, "Mismatch at {i}: fft={a}, direct={b}");
        }
        assert_eq!(dense.argmax().map(|(i, _)| i), Some(1000));
    }

    #[test]
    fn test_grid_profile_positions() {
        let trace = wave(100);
        let reference = trace[20..40].to_vec();
        let p = grid_profile(&trace, &reference, 2, 3, Metric::Sad).unwrap();
        assert_eq!(p.len(), 33); // 2, 5, ..., 98
        assert_eq!(p.position(6), 20);
        assert_eq!(p.scores[6], 0.0);
        // 98 + 20 > 100
        assert_eq!(*p.scores.last().unwrap(), SENTINEL);
    }

    #[test]
    fn test_partition_independent() {
        // Enough positions to cross the parallel threshold
        let trace = wave(5000);
        let reference = trace[10..74].to_vec();
        let positions: Vec<usize> = (0..5000).collect();
        let all = score(&trace, &reference, &positions, Metric::Correlation).unwrap();
        let halves: Vec<f32> = positions
            .chunks(777)
            .flat_map(|c| score(&trace, &reference, c, Metric::Correlation).unwrap())
            .collect();
        assert_eq!(all, halves);
    }
}
