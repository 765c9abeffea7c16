use crate::core::similarity_metric::{Metric, SimilarityMetric};

/// Negated sum of absolute differences.
///
/// Score formula: `s = -sum(|x_k - y_k|)`. A perfect match scores `0`, every
/// other window scores below it. The sign flip makes SAD a "higher is better"
/// score like the correlation metric.
#[derive(Debug, Clone)]
pub struct NegatedSad;

impl NegatedSad {
    /// Plain (non-negated) SAD between two equal-length windows.
    #[inline]
    pub fn sad(a: &[f32], b: &[f32]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| (x as f64 - y as f64).abs())
            .sum()
    }
}

impl SimilarityMetric for NegatedSad {
    const METRIC: Metric = Metric::Sad;

    #[inline]
    fn score(window: &[f32], reference: &[f32]) -> f64 {
        -Self::sad(window, reference)
    }
}
