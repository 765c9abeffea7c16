use serde::{Deserialize, Serialize};

use crate::core::error::{CoError, CoResult};
use crate::metrics::sad::NegatedSad;

/// Minimum number of events before refining in parallel.
#[cfg(feature = "parallel")]
const MIN_PARALLEL_EVENTS: usize = 16;

/// Drift-corrected event positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    /// Start index of the baseline event every other event was aligned to.
    pub baseline: usize,
    /// Corrected start indices, one per input event, in input order.
    pub indices: Vec<usize>,
    /// `(whole-period offset, sample offset)` applied to each event. The
    /// corrected index is `index - (periods * width + samples)`.
    pub offsets: Vec<(isize, isize)>,
    /// Minimum SAD against the baseline event (0 for the baseline).
    pub min_sad: Vec<f64>,
    /// Average of the best-matching events.
    pub template: Vec<f32>,
}

impl Refinement {
    /// Reorder all per-event fields by ascending corrected index.
    pub fn sort_by_index(&mut self) {
        let mut order: Vec<usize> = (0..self.indices.len()).collect();
        order.sort_by_key(|&e| self.indices[e]);
        self.indices = order.iter().map(|&e| self.indices[e]).collect();
        self.offsets = order.iter().map(|&e| self.offsets[e]).collect();
        self.min_sad = order.iter().map(|&e| self.min_sad[e]).collect();
    }
}

/// Offsets `0, -1, 1, -2, 2, ..` within `±max`, so ties favor small shifts.
fn offsets_by_magnitude(max: isize) -> impl Iterator<Item = isize> {
    std::iter::once(0).chain((1..=max).flat_map(|k| [-k, k]))
}

/// Window start for `index - shift`, if `len` samples fit in the trace.
#[inline]
fn shifted(index: usize, shift: isize, len: usize, trace_len: usize) -> Option<usize> {
    let start = index as isize - shift;
    if start < 0 || start as usize + len > trace_len {
        return None;
    }
    Some(start as usize)
}

/// Best `(offset, sad)` over `candidates`; strict improvement only.
fn minimize_sad(
    trace: &[f32],
    baseline: &[f32],
    candidates: impl Iterator<Item = (isize, usize)>,
) -> Option<(isize, f64)> {
    let mut best: Option<(isize, f64)> = None;
    for (offset, start) in candidates {
        let sad = NegatedSad::sad(&trace[start..start + baseline.len()], baseline);
        if best.map_or(true, |(_, b)| sad < b) {
            best = Some((offset, sad));
        }
    }
    best
}

/// Coarse (whole periods) then fine (samples) alignment of one event.
fn align_event(
    trace: &[f32],
    baseline: &[f32],
    index: usize,
    width: usize,
    max_periods: usize,
) -> Option<((isize, isize), f64)> {
    let w = width as isize;
    let len = baseline.len();
    let coarse = offsets_by_magnitude(max_periods as isize)
        .filter_map(|c| shifted(index, c * w, len, trace.len()).map(|s| (c, s)));
    let (periods, _) = minimize_sad(trace, baseline, coarse)?;

    let fine = offsets_by_magnitude(w)
        .filter_map(|f| shifted(index, periods * w + f, len, trace.len()).map(|s| (f, s)));
    let (samples, sad) = minimize_sad(trace, baseline, fine)?;
    Some(((periods, samples), sad))
}

/// Align every event to the first one (the baseline) by SAD minimization.
///
/// The baseline window is `rounds_in_template * width` samples at
/// `indices[0]`, truncated at the trace end. Each other event is searched over
/// `±rounds_in_template` whole periods, then `±width` samples around the best
/// period. Events whose windows never fit are kept unchanged. The number of
/// events is never changed.
///
/// `top_percent` selects which events feed the refined template: the best
/// `ceil(N * top_percent / 100)` by SAD, always including the baseline. `0`
/// averages all events.
pub fn refine(
    trace: &[f32],
    width: usize,
    indices: &[usize],
    rounds_in_template: usize,
    top_percent: f64,
) -> CoResult<Refinement> {
    if width == 0 {
        return Err(CoError::config("width", "must be >= 1"));
    }
    let Some(&base_index) = indices.first() else {
        return Err(CoError::EmptyInput("event indices"));
    };
    if base_index >= trace.len() {
        return Err(CoError::InsufficientData {
            required: base_index + 1,
            available: trace.len(),
        });
    }
    let len = (rounds_in_template.max(1) * width).min(trace.len() - base_index);
    let baseline = &trace[base_index..base_index + len];

    let align = |&index: &usize| -> ((isize, isize), f64) {
        match align_event(trace, baseline, index, width, rounds_in_template) {
            Some(found) => found,
            None => {
                tracing::warn!(index, width, "no refinement window fits, keeping index");
                ((0, 0), f64::INFINITY)
            }
        }
    };

    let rest = &indices[1..];
    #[cfg(feature = "parallel")]
    let aligned: Vec<((isize, isize), f64)> = if rest.len() >= MIN_PARALLEL_EVENTS {
        use rayon::prelude::*;
        rest.par_iter().map(align).collect()
    } else {
        rest.iter().map(align).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let aligned: Vec<((isize, isize), f64)> = rest.iter().map(align).collect();

    let mut offsets = vec![(0, 0)];
    let mut min_sad = vec![0.0];
    let mut refined = vec![base_index];
    for (&index, &((periods, samples), sad)) in rest.iter().zip(&aligned) {
        let shift = periods * width as isize + samples;
        refined.push((index as isize - shift) as usize);
        offsets.push((periods, samples));
        min_sad.push(sad);
    }

    let template = refined_template(trace, &refined, &min_sad, len, top_percent);
    let moved = offsets.iter().filter(|o| **o != (0, 0)).count();
    tracing::info!(events = refined.len(), moved, "refinement complete");

    Ok(Refinement {
        baseline: base_index,
        indices: refined,
        offsets,
        min_sad,
        template,
    })
}

/// Mean of the `len`-sample windows of the best-matching events.
fn refined_template(
    trace: &[f32],
    indices: &[usize],
    min_sad: &[f64],
    len: usize,
    top_percent: f64,
) -> Vec<f32> {
    let n = indices.len();
    let keep = if top_percent <= 0.0 {
        n
    } else {
        ((n as f64 * top_percent / 100.0).ceil() as usize).clamp(1, n)
    };
    let mut order: Vec<usize> = (0..n).collect();
    // Baseline has SAD 0 and index 0, so the stable sort keeps it first
    order.sort_by(|&a, &b| min_sad[a].total_cmp(&min_sad[b]));

    let mut acc = vec![0.0_f64; len];
    let mut used = 0usize;
    for &e in order.iter().take(keep) {
        let Some(window) = trace.get(indices[e]..indices[e] + len) else {
            continue;
        };
        for (a, &v) in acc.iter_mut().zip(window) {
            *a += v as f64;
        }
        used += 1;
    }
    let inv = 1.0 / used.max(1) as f64;
    acc.into_iter().map(|a| (a * inv) as f32).collect()
}
