use serde::{Deserialize, Serialize};

use crate::core::similarity_metric::Metric;

/// Score carried by positions whose lookahead window leaves the trace.
///
/// It is the minimum representable `f32`, so it can never be selected as a
/// maximum while any real score is present, and it stays finite so moving
/// averages over it do not produce NaN.
pub const SENTINEL: f32 = f32::MIN;

/// A (position, score) pair. Positions are sample indices into the trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub position: usize,
    pub score: f32,
}

/// Position-indexed similarity scores for one reference / width.
///
/// Entry `k` scores the window starting at sample `start + k * step`.
#[derive(Debug, Clone)]
pub struct SimilarityProfile {
    /// One score per profile step. Out-of-bounds positions hold [`SENTINEL`].
    pub scores: Vec<f32>,
    /// Sample position of entry 0.
    pub start: usize,
    /// Samples between consecutive entries (1 for a dense profile).
    pub step: usize,
    /// Lookahead window length in samples.
    pub window: usize,
    /// Metric that produced the scores.
    pub metric: Metric,
}

impl SimilarityProfile {
    /// Dense profile starting at sample 0.
    pub fn dense(scores: Vec<f32>, window: usize, metric: Metric) -> Self {
        Self {
            scores,
            start: 0,
            step: 1,
            window,
            metric,
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Sample position of profile entry `k`.
    #[inline]
    pub fn position(&self, k: usize) -> usize {
        self.start + k * self.step
    }

    /// Highest non-sentinel score; ties resolve to the earliest entry.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        argmax(&self.scores)
    }

    /// The `x` highest-scoring entries as sample-domain peaks, best first.
    ///
    /// Sentinel entries are never returned. Equal scores keep ascending
    /// position order, so the result is fully deterministic.
    pub fn top_x(&self, x: usize) -> Vec<Peak> {
        let mut best: Vec<(usize, f32)> = Vec::with_capacity(x + 1);
        if x == 0 {
            return Vec::new();
        }
        for (k, &s) in self.scores.iter().enumerate() {
            if s <= SENTINEL || s.is_nan() {
                continue;
            }
            if best.len() == x && s <= best[x - 1].1 {
                continue;
            }
            let pos = best.partition_point(|&(_, b)| b >= s);
            best.insert(pos, (k, s));
            best.truncate(x);
        }
        best.into_iter()
            .map(|(k, score)| Peak {
                position: self.position(k),
                score,
            })
            .collect()
    }
}

/// Index and value of the largest non-sentinel entry, first one on ties.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v <= SENTINEL || v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Rolling mean and standard deviation for all windows of length `m`.
///
/// Computed via a single-pass sliding window over cumulative sums and
/// sums-of-squares.
#[derive(Debug, Clone)]
pub struct RollingStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    /// Window length.
    pub m: usize,
}

impl RollingStats {
    /// Compute rolling statistics for windows of length `m`.
    pub fn compute(ts: &[f64], m: usize) -> Self {
        assert!(m > 0, "Window length must be > 0");
        assert!(ts.len() >= m, "Time series must be at least as long as m");

        let n = ts.len();
        let n_subs = n - m + 1;

        let mut cumsum = vec![0.0; n + 1];
        let mut cumsum_sq = vec![0.0; n + 1];
        for i in 0..n {
            cumsum[i + 1] = cumsum[i] + ts[i];
            cumsum_sq[i + 1] = cumsum_sq[i] + ts[i] * ts[i];
        }

        let m_f = m as f64;
        let mut mean = vec![0.0; n_subs];
        let mut std = vec![0.0; n_subs];
        for i in 0..n_subs {
            let mu = (cumsum[i + m] - cumsum[i]) / m_f;
            // Variance via E[X^2] - E[X]^2, clamped to 0 for numerical stability
            let var = ((cumsum_sq[i + m] - cumsum_sq[i]) / m_f - mu * mu).max(0.0);
            mean[i] = mu;
            std[i] = var.sqrt();
        }

        Self { mean, std, m }
    }

    /// Centered sum of squares `m * sigma^2` of window `i`.
    #[inline]
    pub fn centered_ss(&self, i: usize) -> f64 {
        self.m as f64 * self.std[i] * self.std[i]
    }
}
