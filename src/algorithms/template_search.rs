use serde::{Deserialize, Serialize};

use crate::algorithms::common::{apply_suppression, detrend_valid_prefix};
use crate::algorithms::kernel::{dense_profile, grid_profile};
use crate::core::error::{CoError, CoResult};
use crate::core::profile::argmax;
use crate::core::similarity_metric::Metric;

/// Parameters for locating events with an already known template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSearch {
    /// Round width in samples.
    pub width: usize,
    pub rounds: usize,
    /// Upper bound on the number of events returned.
    pub expected_events: usize,
    pub metric: Metric,
    /// Scan step; 1 scans densely (FFT for correlation).
    pub step: usize,
    /// First scanned position when `step > 1`.
    pub start: usize,
    /// Minimum detrended score of an accepted event.
    pub threshold: f32,
}

impl TemplateSearch {
    /// Dense search with threshold 0.
    pub fn new(width: usize, rounds: usize, expected_events: usize, metric: Metric) -> Self {
        Self {
            width,
            rounds,
            expected_events,
            metric,
            step: 1,
            start: 0,
            threshold: 0.0,
        }
    }
}

/// Events found by [`find_with_template`], ascending by start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatches {
    pub starts: Vec<usize>,
    /// `start + width * rounds` for each event.
    pub ends: Vec<usize>,
    /// Detrended score of each event.
    pub scores: Vec<f32>,
}

impl TemplateMatches {
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// Scan the trace with `template` and greedily take up to `E` events.
///
/// The similarity profile is detrended with a window of one round, then the
/// maximum is taken repeatedly until `expected_events` events are found or
/// the best remaining score falls below `threshold`. Each accepted event
/// suppresses `±0.7` event lengths around it.
pub fn find_with_template(
    trace: &[f32],
    template: &[f32],
    search: &TemplateSearch,
) -> CoResult<TemplateMatches> {
    if search.width == 0 || search.rounds == 0 {
        return Err(CoError::config("width", "width and rounds must be >= 1"));
    }
    let profile = if search.step <= 1 {
        dense_profile(trace, template, search.metric)?
    } else {
        grid_profile(trace, template, search.start, search.step, search.metric)?
    };
    let step = profile.step;
    let filtered = detrend_valid_prefix(&profile.scores, search.width / step);

    let event_len = search.width * search.rounds;
    let zone = (event_len as f64 / step as f64 * 0.7) as usize;
    let mut working = filtered.clone();
    let mut found: Vec<(usize, f32)> = Vec::with_capacity(search.expected_events);
    for _ in 0..search.expected_events {
        let Some((k, _)) = argmax(&working) else {
            break;
        };
        if filtered[k] < search.threshold {
            break;
        }
        found.push((profile.position(k), filtered[k]));
        apply_suppression(&mut working, k, zone);
    }
    found.sort_unstable_by_key(|&(p, _)| p);
    tracing::info!(
        events = found.len(),
        expected = search.expected_events,
        "template search complete"
    );

    Ok(TemplateMatches {
        starts: found.iter().map(|&(p, _)| p).collect(),
        ends: found.iter().map(|&(p, _)| p + event_len).collect(),
        scores: found.iter().map(|&(_, s)| s).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticTrace;

    #[test]
    fn test_finds_all_events_dense() {
        let (samples, starts) = SyntheticTrace::new(30, 4, 5).generate();
        let template = samples[starts[2]..starts[2] + 120].to_vec();
        for metric in [Metric::Correlation, Metric::Sad] {
            let search = TemplateSearch::new(30, 4, 5, metric);
            let found = find_with_template(&samples, &template, &search).unwrap();
            assert_eq!(found.starts, starts, "metric {metric:?}");
            assert_eq!(found.ends[0], starts[0] + 120);
        }
    }

    #[test]
    fn test_decimated_grid() {
        let synth = SyntheticTrace::new(40, 4, 3).samples_per_clock(4);
        let (samples, starts) = synth.generate();
        let template = samples[starts[0]..starts[0] + 160].to_vec();
        let search = TemplateSearch {
            step: 4,
            ..TemplateSearch::new(40, 4, 3, Metric::Sad)
        };
        let found = find_with_template(&samples, &template, &search).unwrap();
        assert_eq!(found.starts, starts);
    }

    #[test]
    fn test_threshold_limits_count() {
        let (samples, starts) = SyntheticTrace::new(30, 4, 3).generate();
        let template = samples[starts[0]..starts[0] + 120].to_vec();
        // Asking for more events than present stops at the threshold
        let search = TemplateSearch {
            threshold: 0.5,
            ..TemplateSearch::new(30, 4, 10, Metric::Correlation)
        };
        let found = find_with_template(&samples, &template, &search).unwrap();
        assert_eq!(found.starts, starts);
        assert_eq!(found.len(), 3);
    }
}
