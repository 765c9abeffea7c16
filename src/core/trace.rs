use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{CoError, CoResult};

static NEXT_TRACE_ID: AtomicU64 = AtomicU64::new(1);

/// A side-channel trace: power or EM samples at a fixed sampling frequency.
///
/// Samples are stored in single precision. All bulk scans read `f32` samples
/// and accumulate per-window sums in `f64`.
///
/// A trace is immutable once built. Every constructed trace gets a
/// process-unique id, which [`crate::ProfileCache`] uses to detect that the
/// underlying samples changed.
#[derive(Debug)]
pub struct Trace {
    samples: Vec<f32>,
    sampling_frequency: f64,
    trigger: Option<Vec<f32>>,
    id: u64,
}

impl Trace {
    /// Create a trace from single-precision samples.
    pub fn new(samples: Vec<f32>, sampling_frequency: f64) -> CoResult<Self> {
        if samples.is_empty() {
            return Err(CoError::EmptyInput("trace samples"));
        }
        if !(sampling_frequency.is_finite() && sampling_frequency > 0.0) {
            return Err(CoError::config(
                "sampling_frequency",
                format!("must be positive and finite, got {sampling_frequency}"),
            ));
        }
        Ok(Self {
            samples,
            sampling_frequency,
            trigger: None,
            id: NEXT_TRACE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Create a trace from double-precision samples (narrowed to `f32`).
    pub fn from_f64(samples: &[f64], sampling_frequency: f64) -> CoResult<Self> {
        Self::new(
            samples.iter().map(|&x| x as f32).collect(),
            sampling_frequency,
        )
    }

    /// Attach a trigger sequence of the same length as the samples.
    pub fn with_trigger(mut self, trigger: Vec<f32>) -> CoResult<Self> {
        if trigger.len() != self.samples.len() {
            return Err(CoError::LengthMismatch {
                expected: self.samples.len(),
                actual: trigger.len(),
            });
        }
        self.trigger = Some(trigger);
        Ok(self)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sampling frequency in Hz.
    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn trigger(&self) -> Option<&[f32]> {
        self.trigger.as_deref()
    }

    /// Process-unique identity of this trace's samples.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of samples per device clock cycle.
    pub fn samples_per_clock(&self, device_frequency: f64) -> CoResult<f64> {
        if !(device_frequency.is_finite() && device_frequency > 0.0) {
            return Err(CoError::MissingDeviceFrequency);
        }
        Ok(self.sampling_frequency / device_frequency)
    }

    /// Indices where the trigger crosses `threshold` upwards.
    ///
    /// Returns an empty list when the trace has no trigger.
    pub fn trigger_edges(&self, threshold: f32) -> Vec<usize> {
        let Some(trigger) = self.trigger.as_deref() else {
            return Vec::new();
        };
        trigger
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] < threshold && w[1] >= threshold)
            .map(|(i, _)| i + 1)
            .collect()
    }
}
