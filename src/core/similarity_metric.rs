use serde::{Deserialize, Serialize};

use crate::core::profile::RollingStats;

/// Runtime selector for the similarity metric used by a scan.
///
/// Every metric is oriented so that a higher score is a better match, which
/// lets the width ranking and the peak search treat all metrics as
/// maximization problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Pearson correlation coefficient, in `[-1, 1]`.
    Correlation,
    /// Negated sum of absolute differences, `<= 0`.
    Sad,
}

/// Trait for window similarity metrics used by the scan kernels.
///
/// Designed for static polymorphism: kernels are generic over
/// `S: SimilarityMetric`, so the per-position inner loop is monomorphized and
/// inlined. [`Metric`] maps a runtime choice onto one of the implementations.
pub trait SimilarityMetric: Clone + Send + Sync {
    /// Runtime tag of this metric.
    const METRIC: Metric;

    /// Score a trace window against a reference of the same length.
    fn score(window: &[f32], reference: &[f32]) -> f64;

    /// Whether a dense scan may use the FFT sliding dot product.
    ///
    /// When true, [`SimilarityMetric::qt_to_score`] converts a dot product
    /// against the mean-centered reference into a score.
    fn supports_dense_fft() -> bool {
        false
    }

    /// Convert a dot product against the centered reference into a score.
    ///
    /// Only meaningful when `supports_dense_fft()` returns true.
    fn qt_to_score(
        _qt: f64,
        _i: usize,
        _window_stats: &RollingStats,
        _reference: &ReferenceStats,
    ) -> f64 {
        unimplemented!("qt_to_score not supported for this metric")
    }
}

/// Precomputed statistics of a fixed reference window.
#[derive(Debug, Clone)]
pub struct ReferenceStats {
    /// Reference length.
    pub len: usize,
    /// Mean of the reference.
    pub mean: f64,
    /// Centered sum of squares `sum((r - mean)^2)`.
    pub centered_ss: f64,
}

impl ReferenceStats {
    pub fn compute(reference: &[f32]) -> Self {
        let len = reference.len();
        let mean = reference.iter().map(|&r| r as f64).sum::<f64>() / len.max(1) as f64;
        let centered_ss = reference
            .iter()
            .map(|&r| {
                let d = r as f64 - mean;
                d * d
            })
            .sum();
        Self {
            len,
            mean,
            centered_ss,
        }
    }

    /// The reference with its mean removed, in double precision.
    pub fn centered(&self, reference: &[f32]) -> Vec<f64> {
        reference.iter().map(|&r| r as f64 - self.mean).collect()
    }
}
