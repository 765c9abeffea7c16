use serde::{Deserialize, Serialize};

use crate::algorithms::common::{apply_suppression, detrend_valid_prefix};
use crate::algorithms::kernel::grid_profile;
use crate::algorithms::width::WidthRanking;
use crate::core::cache::ProfileCache;
use crate::core::config::FinderConfig;
use crate::core::error::CoResult;
use crate::core::profile::{argmax, SimilarityProfile};
use crate::core::trace::Trace;

/// A main-peak candidate from the greedy search, in search order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Index into the scan profile.
    pub index: usize,
    /// Sample position in the trace.
    pub position: usize,
    /// Detrended profile value.
    pub score: f32,
    /// Average of the forward and backward equidistant sub-peak counts.
    pub sub_peaks: f64,
}

/// Shape of a greedy main-peak search on one profile.
#[derive(Debug, Clone, Copy)]
pub struct PeakSearch {
    /// Expected spacing between sub-peaks, in profile entries.
    pub distance: usize,
    /// Rounds per event; `rounds - 1` sub-peaks are checked per direction.
    pub rounds: usize,
    /// Neighbor offset for the local-maximum test.
    pub delta: usize,
    /// Half-width of the suppression window, in profile entries.
    pub zone: usize,
    /// Upper bound on candidates examined.
    pub max_peaks: usize,
    /// Stop after the first candidate whose sub-peak count is below this.
    pub min_sub_peaks: f64,
}

/// Everything a [`TemplateScan`] depends on besides the trace, width and metric.
///
/// A cached scan is only reused when its parameters equal the current ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    /// Position the scan template was cut from.
    pub seed_position: usize,
    pub rounds: usize,
    pub rounds_in_template: usize,
    pub avg_round_template: bool,
    pub expected_events: usize,
    pub sub_peak_delta: usize,
    /// Grid step of the scan, derived from the device clock.
    pub step: usize,
}

impl ScanParams {
    pub fn new(
        width: usize,
        seed_position: usize,
        trace: &Trace,
        config: &FinderConfig,
    ) -> CoResult<Self> {
        let spc = trace.samples_per_clock(config.device_frequency()?)?;
        Ok(Self {
            seed_position,
            rounds: config.similar_rounds,
            rounds_in_template: config.rounds_in_template,
            avg_round_template: config.avg_round_template,
            expected_events: config.expected_events,
            sub_peak_delta: config.sub_peak_delta,
            step: scan_step(width, spc),
        })
    }
}

/// Template scan of one candidate width: the cached unit of the threshold sweep.
#[derive(Debug, Clone)]
pub struct TemplateScan {
    pub width: usize,
    pub params: ScanParams,
    pub template: Vec<f32>,
    /// Detrended template-similarity profile.
    pub profile: SimilarityProfile,
    /// Greedy candidates, best first.
    pub candidates: Vec<Candidate>,
}

impl TemplateScan {
    /// Leading candidates whose sub-peak count reaches `threshold`.
    pub fn accepted(&self, threshold: usize) -> &[Candidate] {
        let n = self
            .candidates
            .iter()
            .take_while(|c| c.sub_peaks >= threshold as f64)
            .count();
        &self.candidates[..n]
    }
}

/// Validated detection for one width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub width: usize,
    /// Best position of the width sweep, used to cut the scan template.
    pub seed_position: usize,
    /// Event start positions, ascending.
    pub indices: Vec<usize>,
    /// Accepted main peaks in acceptance order.
    pub peaks: Vec<Candidate>,
    /// Characteristic template at the best accepted event.
    pub template: Vec<f32>,
    /// Sub-peak threshold at which the event count fitted.
    pub sub_peak_threshold: usize,
}

/// Outcome of peak validation. Not fitting is a normal result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    Fitted(Detection),
    NoFit { widths_tried: Vec<usize> },
}

impl FitOutcome {
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::Fitted(d) => Some(d),
            Self::NoFit { .. } => None,
        }
    }

    pub fn into_detection(self) -> Option<Detection> {
        match self {
            Self::Fitted(d) => Some(d),
            Self::NoFit { .. } => None,
        }
    }

    pub fn is_fit(&self) -> bool {
        matches!(self, Self::Fitted(_))
    }
}

/// Whether `x[idx]` is a local maximum at offset `delta` bounded above by `top`.
#[inline]
pub fn is_peak(x: &[f32], idx: usize, delta: usize, top: f32) -> bool {
    if delta == 0 || idx < delta || idx + delta >= x.len() {
        return false;
    }
    let v = x[idx];
    v > x[idx - delta] && v > x[idx + delta] && v <= top
}

/// Number of consecutive sub-peaks after `x[0]` at multiples of `distance`.
///
/// `max_peaks` counts the main peak, so at most `max_peaks - 1` sub-peaks
/// (`k = 1 .. max_peaks`) are checked. Sub-peak `k` may sit anywhere in
/// `k*distance ± (delta - 1)`. Counting stops at the first missing sub-peak or
/// at the end of `x`.
pub fn count_equidistant_peaks(x: &[f32], distance: usize, max_peaks: usize, delta: usize) -> usize {
    let Some(&top) = x.first() else {
        return 0;
    };
    if distance == 0 {
        return 0;
    }
    let tol = delta.saturating_sub(1);
    let mut count = 0;
    for k in 1..max_peaks {
        let sub = k * distance;
        if sub >= x.len() {
            break;
        }
        let lo = sub.saturating_sub(tol);
        let hi = (sub + tol).min(x.len() - 1);
        if !(lo..=hi).any(|idx| is_peak(x, idx, delta, top)) {
            break;
        }
        count += 1;
    }
    count
}

/// Mean of the forward and backward sub-peak counts around `profile[k]`.
pub fn sub_peak_count(profile: &[f32], k: usize, search: &PeakSearch) -> f64 {
    let forward = count_equidistant_peaks(&profile[k..], search.distance, search.rounds, search.delta);
    let reach = search.rounds.saturating_sub(1) * search.distance + search.delta;
    let lo = k.saturating_sub(reach);
    let reversed: Vec<f32> = profile[lo..=k].iter().rev().copied().collect();
    let backward = count_equidistant_peaks(&reversed, search.distance, search.rounds, search.delta);
    (forward + backward) as f64 / 2.0
}

/// Greedy main-peak extraction.
///
/// Repeatedly takes the maximum of a working copy, scores its sub-peaks on the
/// untouched `profile`, and suppresses `±zone` around it in the working copy.
/// The candidate order does not depend on any acceptance threshold, so one
/// search serves a whole threshold sweep.
pub fn greedy_candidates(profile: &[f32], search: &PeakSearch) -> Vec<(usize, f32, f64)> {
    let mut working = profile.to_vec();
    let mut out = Vec::new();
    for _ in 0..search.max_peaks {
        let Some((k, v)) = argmax(&working) else {
            break;
        };
        let sub = sub_peak_count(profile, k, search);
        out.push((k, v, sub));
        if sub < search.min_sub_peaks {
            break;
        }
        apply_suppression(&mut working, k, search.zone);
    }
    out
}

/// Number of peaks to keep from `scores` (best first), or `None` if the count
/// does not fit `expected`.
///
/// Excess trailing peaks are trimmed at the first one below
/// `s[E-1] - 2 * (s[0] - s[E-1]) / E`. The remaining count must lie in
/// `[expected, max_count]`.
pub fn fit_count(scores: &[f32], expected: usize, max_count: usize) -> Option<usize> {
    if expected == 0 || scores.len() < expected {
        return None;
    }
    let mut kept = scores.len();
    if kept > expected {
        let best = scores[0];
        let last = scores[expected - 1];
        let cut = last - (best - last) * 2.0 / expected as f32;
        if let Some(off) = scores[expected..].iter().position(|&s| s < cut) {
            kept = expected + off;
        }
    }
    (kept <= max_count).then_some(expected)
}

/// Sub-peak thresholds of the sweep: `R-1` down to `min(2, R-1)`.
pub fn sub_peak_thresholds(rounds: usize) -> Vec<usize> {
    let hi = rounds.saturating_sub(1).max(1);
    let lo = hi.min(2);
    (lo..=hi).rev().collect()
}

/// Characteristic template cut at `position`.
///
/// With `avg_round`, the `R` rounds at `position` are averaged and the mean
/// round is tiled `R` times. Otherwise the raw `rounds_in_template * width`
/// window is used. `None` if the template would leave the trace.
pub fn characteristic_template(
    trace: &[f32],
    position: usize,
    width: usize,
    config: &FinderConfig,
) -> Option<Vec<f32>> {
    let rounds = config.similar_rounds;
    if config.avg_round_template {
        if position + rounds * width > trace.len() {
            return None;
        }
        let inv = 1.0 / rounds as f64;
        let round: Vec<f32> = (0..width)
            .map(|k| {
                let s: f64 = (0..rounds)
                    .map(|r| trace[position + r * width + k] as f64)
                    .sum();
                (s * inv) as f32
            })
            .collect();
        Some(round.iter().cycle().take(rounds * width).copied().collect())
    } else {
        let len = config.rounds_in_template * width;
        trace.get(position..position + len).map(<[f32]>::to_vec)
    }
}

/// Profile step for a width: `max(1, min(w / 4, samples per clock))`.
pub fn scan_step(width: usize, samples_per_clock: f64) -> usize {
    (width / 4).min(samples_per_clock.floor() as usize).max(1)
}

/// Build the template scan and its greedy candidates for one width.
///
/// Returns `Ok(None)` when the template cut at `seed` leaves the trace.
pub fn scan_width(
    trace: &Trace,
    width: usize,
    seed: usize,
    config: &FinderConfig,
) -> CoResult<Option<TemplateScan>> {
    let params = ScanParams::new(width, seed, trace, config)?;
    let samples = trace.samples();
    let Some(template) = characteristic_template(samples, seed, width, config) else {
        tracing::debug!(width, seed, "template leaves trace, skipping width");
        return Ok(None);
    };

    let step = params.step;
    let mut profile = grid_profile(samples, &template, seed % step, step, config.template_metric)?;
    profile.scores = detrend_valid_prefix(&profile.scores, width / step);

    let rounds = config.similar_rounds;
    let e = config.expected_events;
    let search = PeakSearch {
        distance: ((width as f64 / step as f64).round() as usize).max(1),
        rounds,
        delta: config.sub_peak_delta,
        zone: (0.7 * (rounds * width) as f64 / step as f64) as usize,
        max_peaks: e * 2 + e * config.sub_peak_delta,
        min_sub_peaks: sub_peak_thresholds(rounds).last().copied().unwrap_or(1) as f64,
    };
    let candidates = greedy_candidates(&profile.scores, &search)
        .into_iter()
        .map(|(index, score, sub_peaks)| Candidate {
            index,
            position: profile.position(index),
            score,
            sub_peaks,
        })
        .collect::<Vec<_>>();
    tracing::debug!(
        width,
        step,
        candidates = candidates.len(),
        "template scan complete"
    );

    Ok(Some(TemplateScan {
        width,
        params,
        template,
        profile,
        candidates,
    }))
}

/// Validate the ranked widths and extract `E` event start positions.
///
/// Sweeps the sub-peak threshold from `R-1` down, and for each threshold the
/// widths in rank order; the first combination whose accepted count fits
/// `[E, E + ceil(E * error_margin)]` wins. Scans are stored in `cache` under
/// `(width, template_metric)` and reused across thresholds and calls.
pub fn find_events(
    trace: &Trace,
    ranking: &WidthRanking,
    config: &FinderConfig,
    cache: &mut ProfileCache<TemplateScan>,
) -> CoResult<FitOutcome> {
    config.validate()?;
    let expected = config.expected_events;
    let max_count = config.max_count();
    let metric = config.template_metric;

    for threshold in sub_peak_thresholds(config.similar_rounds) {
        for ranked in &ranking.ranked {
            let width = ranked.width;
            let params = ScanParams::new(width, ranked.position, trace, config)?;
            let scan = match cache.get_valid(trace, width, metric, |s| s.params == params) {
                Some(scan) => scan,
                None => match scan_width(trace, width, ranked.position, config)? {
                    Some(scan) => cache.insert(trace, width, metric, scan),
                    None => continue,
                },
            };

            let accepted = scan.accepted(threshold);
            tracing::debug!(width, threshold, accepted = accepted.len(), "threshold pass");
            let scores: Vec<f32> = accepted.iter().map(|c| c.score).collect();
            let Some(n) = fit_count(&scores, expected, max_count) else {
                continue;
            };

            let peaks = accepted[..n].to_vec();
            let first = peaks[0].position;
            let template = characteristic_template(trace.samples(), first, width, config)
                .unwrap_or_else(|| scan.template.clone());
            let mut indices: Vec<usize> = peaks.iter().map(|c| c.position).collect();
            indices.sort_unstable();
            tracing::info!(width, threshold, events = n, "event count fitted");
            return Ok(FitOutcome::Fitted(Detection {
                width,
                seed_position: ranked.position,
                indices,
                peaks,
                template,
                sub_peak_threshold: threshold,
            }));
        }
    }

    let widths_tried: Vec<usize> = ranking.ranked.iter().map(|r| r.width).collect();
    tracing::warn!(
        expected,
        widths = ?widths_tried,
        "no width matches the expected event count"
    );
    Ok(FitOutcome::NoFit { widths_tried })
}
