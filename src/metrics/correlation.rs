use crate::core::profile::RollingStats;
use crate::core::similarity_metric::{Metric, ReferenceStats, SimilarityMetric};

/// Additive guard in the correlation denominator for constant windows.
pub const CORR_EPSILON: f64 = 1e-9;

/// Pearson correlation coefficient between a window and a reference.
///
/// Formula: `r = cov(x, y) / (sqrt(var(x) * var(y)) + eps)` on centered sums,
/// clamped to `[-1, 1]`. The sign is retained.
///
/// Edge cases:
/// - Either window constant → `r = 0`
/// - Identical non-constant windows → `r = 1` up to the epsilon guard
#[derive(Debug, Clone)]
pub struct PearsonCorrelation;

impl PearsonCorrelation {
    /// Correlation from raw window sums over `n` samples.
    #[inline]
    pub fn from_sums(n: f64, sx: f64, sy: f64, sxx: f64, syy: f64, sxy: f64) -> f64 {
        let cov = sxy - sx * sy / n;
        let var_x = (sxx - sx * sx / n).max(0.0);
        let var_y = (syy - sy * sy / n).max(0.0);
        (cov / ((var_x * var_y).sqrt() + CORR_EPSILON)).clamp(-1.0, 1.0)
    }
}

impl SimilarityMetric for PearsonCorrelation {
    const METRIC: Metric = Metric::Correlation;

    #[inline]
    fn score(window: &[f32], reference: &[f32]) -> f64 {
        let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in window.iter().zip(reference) {
            let (x, y) = (x as f64, y as f64);
            sx += x;
            sy += y;
            sxx += x * x;
            syy += y * y;
            sxy += x * y;
        }
        Self::from_sums(window.len() as f64, sx, sy, sxx, syy, sxy)
    }

    fn supports_dense_fft() -> bool {
        true
    }

    #[inline]
    fn qt_to_score(
        qt: f64,
        i: usize,
        window_stats: &RollingStats,
        reference: &ReferenceStats,
    ) -> f64 {
        // qt is the dot product with the centered reference, i.e. the covariance sum
        let denom = (window_stats.centered_ss(i) * reference.centered_ss).sqrt() + CORR_EPSILON;
        (qt / denom).clamp(-1.0, 1.0)
    }
}
