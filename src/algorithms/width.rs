use serde::{Deserialize, Serialize};

use crate::algorithms::common::detrend_valid_prefix;
use crate::core::error::{CoError, CoResult};
use crate::core::profile::{Peak, SimilarityProfile, SENTINEL};
use crate::core::similarity_metric::{Metric, SimilarityMetric};
use crate::metrics::correlation::PearsonCorrelation;
use crate::metrics::sad::NegatedSad;

/// Positions per block of the prefix-sum correlation path.
///
/// Blocks are fixed-size regardless of thread count, which keeps the
/// floating-point summation order (and thus every score) independent of the
/// worker partition.
const BLOCK_LEN: usize = 1 << 16;

/// Minimum number of positions before the direct path uses the thread pool.
#[cfg(feature = "parallel")]
const MIN_PARALLEL_POSITIONS: usize = 1024;

/// Best positions found for one candidate width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedWidth {
    /// Round width in samples.
    pub width: usize,
    /// Score of the best position.
    pub score: f32,
    /// Sample position of the best score.
    pub position: usize,
    /// Top-`X` positions, best first.
    pub top: Vec<Peak>,
}

/// Result of a width sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WidthRanking {
    /// Widths with at least one valid position, best score first. Equal
    /// scores keep the smaller width first.
    pub ranked: Vec<RankedWidth>,
    /// Widths whose `w * R` window does not fit into the trace.
    pub rejected: Vec<usize>,
}

impl WidthRanking {
    /// The seed width: global maximum over all widths.
    pub fn best(&self) -> Option<&RankedWidth> {
        self.ranked.first()
    }
}

/// Parameters of a width sweep.
#[derive(Debug, Clone)]
pub struct WidthSweep {
    /// Number of consecutive similar rounds (`R`).
    pub rounds: usize,
    /// Positions retained per width.
    pub top_x: usize,
    pub metric: Metric,
    /// Apply a `w * R` moving-average high-pass to each profile.
    pub detrend: bool,
}

/// Sweep `widths` (sorted ascending internally) and rank them by best score.
///
/// The sweep stops at the first width with `w * R > trace.len()`; that width
/// and all larger ones are reported in [`WidthRanking::rejected`]. A trace too
/// short for even the smallest width fails with
/// [`CoError::InsufficientData`] before any scoring happens.
pub fn estimate_widths(
    trace: &[f32],
    widths: &[usize],
    sweep: &WidthSweep,
) -> CoResult<WidthRanking> {
    if sweep.rounds == 0 {
        return Err(CoError::config("similar_rounds", "must be >= 1"));
    }
    let mut widths: Vec<usize> = widths.iter().copied().filter(|&w| w > 0).collect();
    widths.sort_unstable();
    widths.dedup();
    let Some(&smallest) = widths.first() else {
        return Err(CoError::EmptyInput("candidate widths"));
    };
    let required = smallest.saturating_mul(sweep.rounds);
    if required > trace.len() {
        return Err(CoError::InsufficientData {
            required,
            available: trace.len(),
        });
    }

    let mut ranking = WidthRanking::default();
    for (k, &w) in widths.iter().enumerate() {
        if w.saturating_mul(sweep.rounds) > trace.len() {
            tracing::debug!(
                width = w,
                rounds = sweep.rounds,
                len = trace.len(),
                "width exceeds trace, ending sweep"
            );
            ranking.rejected.extend_from_slice(&widths[k..]);
            break;
        }
        let profile = width_profile(trace, w, sweep.rounds, sweep.metric, sweep.detrend);
        let top = profile.top_x(sweep.top_x);
        match top.first().copied() {
            Some(best) => {
                tracing::debug!(width = w, score = best.score, position = best.position, "width scored");
                ranking.ranked.push(RankedWidth {
                    width: w,
                    score: best.score,
                    position: best.position,
                    top,
                });
            }
            None => {
                tracing::debug!(width = w, "no valid position for width");
                ranking.rejected.push(w);
            }
        }
    }

    // Stable sort keeps ascending width order on equal scores
    ranking
        .ranked
        .sort_by(|a, b| b.score.total_cmp(&a.score));
    if let Some(best) = ranking.best() {
        tracing::info!(
            width = best.width,
            score = best.score,
            position = best.position,
            "seed width selected"
        );
    }
    Ok(ranking)
}

/// Round self-similarity profile for one width.
///
/// Entry `i` is the mean over the `R` rounds `trace[i + r*w .. i + (r+1)*w]`
/// of each round's score against the average of all `R` rounds. Entries with
/// `i + R*w >= trace.len()` hold [`SENTINEL`].
pub fn width_profile(
    trace: &[f32],
    width: usize,
    rounds: usize,
    metric: Metric,
    detrend: bool,
) -> SimilarityProfile {
    let mut scores = match metric {
        Metric::Correlation => round_correlation_blocked(trace, width, rounds),
        Metric::Sad => round_similarity_direct::<NegatedSad>(trace, width, rounds),
    };
    if detrend {
        scores = detrend_valid_prefix(&scores, width * rounds);
    }
    SimilarityProfile::dense(scores, width * rounds, metric)
}

/// Number of positions `i` with `i + rounds * width < len`.
fn valid_positions(len: usize, width: usize, rounds: usize) -> usize {
    len.saturating_sub(width.saturating_mul(rounds))
}

/// Score of position `i`, using `avg` (length `width`) as scratch.
#[inline]
fn round_score<S: SimilarityMetric>(
    trace: &[f32],
    i: usize,
    width: usize,
    rounds: usize,
    avg: &mut [f32],
) -> f32 {
    let inv = 1.0 / rounds as f64;
    for (k, a) in avg.iter_mut().enumerate() {
        let s: f64 = (0..rounds).map(|r| trace[i + r * width + k] as f64).sum();
        *a = (s * inv) as f32;
    }
    let avg: &[f32] = avg;
    let total: f64 = (0..rounds)
        .map(|r| {
            let start = i + r * width;
            S::score(&trace[start..start + width], avg)
        })
        .sum();
    (total * inv) as f32
}

/// Direct evaluation of the round self-similarity profile for any metric.
///
/// O(len * R * w). Each worker owns one `w`-sized scratch buffer for the
/// average round, reused across all the positions it handles.
pub fn round_similarity_direct<S: SimilarityMetric>(
    trace: &[f32],
    width: usize,
    rounds: usize,
) -> Vec<f32> {
    let n_valid = valid_positions(trace.len(), width, rounds);
    let mut scores = vec![SENTINEL; trace.len()];
    if n_valid == 0 || width == 0 {
        return scores;
    }

    #[cfg(feature = "parallel")]
    if n_valid >= MIN_PARALLEL_POSITIONS {
        use rayon::prelude::*;
        scores[..n_valid]
            .par_iter_mut()
            .enumerate()
            .for_each_init(
                || vec![0.0_f32; width],
                |avg, (i, out)| *out = round_score::<S>(trace, i, width, rounds, avg),
            );
        return scores;
    }

    let mut avg = vec![0.0_f32; width];
    for (i, out) in scores[..n_valid].iter_mut().enumerate() {
        *out = round_score::<S>(trace, i, width, rounds, &mut avg);
    }
    scores
}

/// Per-worker buffers for one block of the correlation path.
#[derive(Default)]
struct BlockScratch {
    /// Centered trace over the block span, widened to f64.
    x: Vec<f64>,
    /// Round-mean series `y[j] = mean_r x[j + r*w]`.
    y: Vec<f64>,
    px: Vec<f64>,
    pxx: Vec<f64>,
    py: Vec<f64>,
    pyy: Vec<f64>,
    /// `pz[r]` prefix sums of `x[j + r*w] * y[j]`.
    pz: Vec<Vec<f64>>,
}

fn prefix_into(out: &mut Vec<f64>, n: usize, f: impl Fn(usize) -> f64) {
    out.clear();
    out.reserve(n + 1);
    let mut acc = 0.0;
    out.push(acc);
    for j in 0..n {
        acc += f(j);
        out.push(acc);
    }
}

/// Correlation profile for positions `b0 .. b0 + n_pos`, written into `out`.
#[allow(clippy::too_many_arguments)]
fn correlation_block(
    trace: &[f32],
    mean: f64,
    width: usize,
    rounds: usize,
    b0: usize,
    n_pos: usize,
    scratch: &mut BlockScratch,
    out: &mut [f32],
) {
    let span_x = n_pos + rounds * width - 1;
    let span_y = n_pos + width - 1;
    let inv = 1.0 / rounds as f64;

    scratch.x.clear();
    scratch
        .x
        .extend(trace[b0..b0 + span_x].iter().map(|&v| v as f64 - mean));
    let x = &scratch.x;

    scratch.y.clear();
    scratch.y.extend((0..span_y).map(|j| {
        let s: f64 = (0..rounds).map(|r| x[j + r * width]).sum();
        s * inv
    }));
    let y = &scratch.y;

    prefix_into(&mut scratch.px, span_x, |j| x[j]);
    prefix_into(&mut scratch.pxx, span_x, |j| x[j] * x[j]);
    prefix_into(&mut scratch.py, span_y, |j| y[j]);
    prefix_into(&mut scratch.pyy, span_y, |j| y[j] * y[j]);
    scratch.pz.resize_with(rounds, Vec::new);
    for (r, pz) in scratch.pz.iter_mut().enumerate() {
        prefix_into(pz, span_y, |j| x[j + r * width] * y[j]);
    }

    let n = width as f64;
    for (t, o) in out.iter_mut().enumerate().take(n_pos) {
        let sy = scratch.py[t + width] - scratch.py[t];
        let syy = scratch.pyy[t + width] - scratch.pyy[t];
        let mut total = 0.0;
        for r in 0..rounds {
            let off = t + r * width;
            let sx = scratch.px[off + width] - scratch.px[off];
            let sxx = scratch.pxx[off + width] - scratch.pxx[off];
            let sxy = scratch.pz[r][t + width] - scratch.pz[r][t];
            total += PearsonCorrelation::from_sums(n, sx, sy, sxx, syy, sxy);
        }
        *o = (total * inv) as f32;
    }
}

/// Round self-correlation profile in O(len * R) via block-local prefix sums.
///
/// For position `i` the average round is `y[i .. i + w]` where
/// `y[j] = mean_r x[j + r*w]`, so every per-round correlation reduces to
/// window sums over `x`, `x^2`, `y`, `y^2` and `x[j + r*w] * y[j]`. The
/// trace's global mean is removed first to limit cancellation in the sums.
pub fn round_correlation_blocked(trace: &[f32], width: usize, rounds: usize) -> Vec<f32> {
    let n_valid = valid_positions(trace.len(), width, rounds);
    let mut scores = vec![SENTINEL; trace.len()];
    if n_valid == 0 || width == 0 || rounds == 0 {
        return scores;
    }
    let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / trace.len() as f64;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        scores[..n_valid]
            .par_chunks_mut(BLOCK_LEN)
            .enumerate()
            .for_each_init(BlockScratch::default, |scratch, (b, out)| {
                let n_pos = out.len();
                correlation_block(trace, mean, width, rounds, b * BLOCK_LEN, n_pos, scratch, out);
            });
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut scratch = BlockScratch::default();
        for (b, out) in scores[..n_valid].chunks_mut(BLOCK_LEN).enumerate() {
            let n_pos = out.len();
            correlation_block(trace, mean, width, rounds, b * BLOCK_LEN, n_pos, &mut scratch, out);
        }
    }

    scores
}
