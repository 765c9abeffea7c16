use serde::{Deserialize, Serialize};

use crate::core::error::{CoError, CoResult};
use crate::core::similarity_metric::Metric;

/// Configuration for the detection and alignment pipeline.
///
/// Loading this from a file is the caller's business; the struct derives
/// `serde` traits so any format can feed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Device clock frequency in Hz. Required to express widths in samples.
    pub device_frequency: Option<f64>,
    /// Number of consecutive similar rounds inside one CO (`R`).
    pub similar_rounds: usize,
    /// Number of rounds covered by the template used for refinement.
    pub rounds_in_template: usize,
    /// Expected number of COs in the trace (`E`).
    pub expected_events: usize,
    /// Approximate round width in clock cycles, the seed of the width sweep.
    pub approx_width_cycles: f64,
    /// Pin the sweep to one exact clock-cycle count.
    pub exact_clock_cycles: Option<usize>,
    /// Relative half-range of the width sweep around `approx_width_cycles`.
    pub width_tolerance: f64,
    /// Number of best positions retained per candidate width.
    pub top_x: usize,
    /// Fraction of `E` by which the detected count may exceed `E`.
    pub error_margin: f64,
    /// Index tolerance (profile steps) when checking for sub-peaks.
    pub sub_peak_delta: usize,
    /// Metric used for the blind width sweep.
    pub width_metric: Metric,
    /// Metric used to scan the characteristic template over the trace.
    pub template_metric: Metric,
    /// Build the template from the average round tiled `R` times instead of
    /// the raw `rounds_in_template * w` window.
    pub avg_round_template: bool,
    /// Detrend the width-sweep profiles with a moving-average high-pass.
    pub detrend_widths: bool,
    /// Percentage of best-matching events averaged into the refined template.
    /// `0` averages all events.
    pub refine_top_percent: f64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            device_frequency: None,
            similar_rounds: 10,
            rounds_in_template: 10,
            expected_events: 1,
            approx_width_cycles: 1.0,
            exact_clock_cycles: None,
            width_tolerance: 0.05,
            top_x: 10,
            error_margin: 0.02,
            sub_peak_delta: 2,
            width_metric: Metric::Correlation,
            template_metric: Metric::Sad,
            avg_round_template: true,
            detrend_widths: false,
            refine_top_percent: 0.0,
        }
    }
}

impl FinderConfig {
    /// Configuration with `R = rounds_in_template = similar_rounds` and `E` events.
    pub fn new(similar_rounds: usize, expected_events: usize) -> Self {
        Self {
            similar_rounds,
            rounds_in_template: similar_rounds,
            expected_events,
            ..Self::default()
        }
    }

    /// Check all scalar values; fails fast on the first invalid one.
    pub fn validate(&self) -> CoResult<()> {
        if self.similar_rounds < 2 {
            return Err(CoError::config("similar_rounds", "must be >= 2"));
        }
        if self.rounds_in_template == 0 {
            return Err(CoError::config("rounds_in_template", "must be >= 1"));
        }
        if self.expected_events == 0 {
            return Err(CoError::config("expected_events", "must be >= 1"));
        }
        if !(self.approx_width_cycles.is_finite() && self.approx_width_cycles > 0.0) {
            return Err(CoError::config(
                "approx_width_cycles",
                format!("must be positive, got {}", self.approx_width_cycles),
            ));
        }
        if self.exact_clock_cycles == Some(0) {
            return Err(CoError::config("exact_clock_cycles", "must be >= 1"));
        }
        if !(0.0..1.0).contains(&self.width_tolerance) {
            return Err(CoError::config("width_tolerance", "must be in [0, 1)"));
        }
        if self.top_x == 0 {
            return Err(CoError::config("top_x", "must be >= 1"));
        }
        if self.sub_peak_delta == 0 {
            return Err(CoError::config("sub_peak_delta", "must be >= 1"));
        }
        if !(self.error_margin.is_finite() && self.error_margin >= 0.0) {
            return Err(CoError::config("error_margin", "must be >= 0"));
        }
        if !(0.0..=100.0).contains(&self.refine_top_percent) {
            return Err(CoError::config("refine_top_percent", "must be in [0, 100]"));
        }
        if let Some(fd) = self.device_frequency {
            if !(fd.is_finite() && fd > 0.0) {
                return Err(CoError::config(
                    "device_frequency",
                    format!("must be positive, got {fd}"),
                ));
            }
        }
        Ok(())
    }

    /// Device clock frequency, or [`CoError::MissingDeviceFrequency`].
    pub fn device_frequency(&self) -> CoResult<f64> {
        self.device_frequency.ok_or(CoError::MissingDeviceFrequency)
    }

    /// Clock-cycle counts covered by the width sweep, ascending.
    ///
    /// `floor(c * (1 - tol)) ..= ceil(c * (1 + tol))`, clamped to at least one
    /// cycle, or only `exact_clock_cycles` when set.
    pub fn cycle_range(&self) -> Vec<usize> {
        if let Some(exact) = self.exact_clock_cycles {
            return vec![exact];
        }
        let lo = ((self.approx_width_cycles * (1.0 - self.width_tolerance)).floor() as usize).max(1);
        let hi = ((self.approx_width_cycles * (1.0 + self.width_tolerance)).ceil() as usize).max(lo);
        (lo..=hi).collect()
    }

    /// Candidate widths in samples for a trace sampled at `sampling_frequency`.
    ///
    /// Duplicates (possible below one sample per clock) are removed.
    pub fn candidate_widths(&self, sampling_frequency: f64) -> CoResult<Vec<usize>> {
        let spc = sampling_frequency / self.device_frequency()?;
        let mut widths: Vec<usize> = self
            .cycle_range()
            .into_iter()
            .map(|c| (spc * c as f64) as usize)
            .filter(|&w| w > 0)
            .collect();
        widths.dedup();
        if widths.is_empty() {
            return Err(CoError::config(
                "approx_width_cycles",
                "no candidate width of at least one sample",
            ));
        }
        Ok(widths)
    }

    /// Nominal round width in samples: `fs / fd * approx_width_cycles`.
    pub fn known_width(&self, sampling_frequency: f64) -> CoResult<f64> {
        Ok(sampling_frequency / self.device_frequency()? * self.approx_width_cycles)
    }

    /// Upper bound on the number of detected events before trimming.
    pub fn max_count(&self) -> usize {
        let e = self.expected_events;
        e + (e as f64 * self.error_margin).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_range_inclusive() {
        let mut config = FinderConfig::new(4, 6);
        config.approx_width_cycles = 10.0;
        assert_eq!(config.cycle_range(), vec![9, 10, 11]);

        config.approx_width_cycles = 5.0;
        // floor(4.75) = 4, ceil(5.25) = 6
        assert_eq!(config.cycle_range(), vec![4, 5, 6]);

        config.exact_clock_cycles = Some(7);
        assert_eq!(config.cycle_range(), vec![7]);
    }

    #[test]
    fn test_candidate_widths_need_device_frequency() {
        let mut config = FinderConfig::new(4, 6);
        config.approx_width_cycles = 10.0;
        assert_eq!(
            config.candidate_widths(100e6).unwrap_err(),
            CoError::MissingDeviceFrequency
        );
        config.device_frequency = Some(25e6);
        assert_eq!(config.candidate_widths(100e6).unwrap(), vec![36, 40, 44]);
        assert!((config.known_width(100e6).unwrap() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(FinderConfig::new(4, 6).validate().is_ok());
        assert!(matches!(
            FinderConfig::new(1, 6).validate(),
            Err(CoError::InvalidConfig {
                field: "similar_rounds",
                ..
            })
        ));
        assert!(matches!(
            FinderConfig::new(4, 0).validate(),
            Err(CoError::InvalidConfig {
                field: "expected_events",
                ..
            })
        ));
        let mut config = FinderConfig::new(4, 6);
        config.device_frequency = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_count() {
        let mut config = FinderConfig::new(4, 10);
        assert_eq!(config.max_count(), 11); // ceil(10 * 0.02) = 1
        config.error_margin = 0.0;
        assert_eq!(config.max_count(), 10);
        config.error_margin = 0.25;
        assert_eq!(config.max_count(), 13);
    }
}
