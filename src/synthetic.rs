//! Seeded synthetic traces with known event positions.
//!
//! Each event is one random round waveform repeated `rounds` times, pasted
//! over Gaussian background at clock-aligned starts. Additive noise covers the
//! whole trace.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::core::error::CoResult;
use crate::core::trace::Trace;

#[derive(Debug, Clone)]
pub struct SyntheticTrace {
    /// Round width in samples.
    pub width: usize,
    pub rounds: usize,
    pub events: usize,
    /// Event starts are rounded down to a multiple of this.
    pub samples_per_clock: usize,
    pub noise_std: f64,
    pub background_std: f64,
    /// Moving-average length applied to the round waveform (1 = white).
    pub smoothing: usize,
    /// Samples before the first event.
    pub lead: usize,
    /// Distance between consecutive event starts.
    pub spacing: usize,
    /// Total length; defaults to the last event plus `lead` trailing samples.
    pub len: Option<usize>,
    pub seed: u64,
}

impl SyntheticTrace {
    pub fn new(width: usize, rounds: usize, events: usize) -> Self {
        Self {
            width,
            rounds,
            events,
            samples_per_clock: 1,
            noise_std: 0.01,
            background_std: 1.0,
            smoothing: 1,
            lead: 2 * rounds * width,
            spacing: 3 * rounds * width,
            len: None,
            seed: 0x5eed,
        }
    }

    pub fn samples_per_clock(mut self, spc: usize) -> Self {
        self.samples_per_clock = spc.max(1);
        self
    }

    pub fn noise(mut self, std: f64) -> Self {
        self.noise_std = std;
        self
    }

    pub fn smoothing(mut self, k: usize) -> Self {
        self.smoothing = k.max(1);
        self
    }

    pub fn lead(mut self, lead: usize) -> Self {
        self.lead = lead;
        self
    }

    pub fn spacing(mut self, spacing: usize) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn length(mut self, len: usize) -> Self {
        self.len = Some(len);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Event start positions, dropping events that would not fit.
    pub fn starts(&self) -> Vec<usize> {
        let spc = self.samples_per_clock.max(1);
        let event_len = self.width * self.rounds;
        let total = self.total_len();
        (0..self.events)
            .map(|e| (self.lead + e * self.spacing) / spc * spc)
            .filter(|&s| s + event_len <= total)
            .collect()
    }

    fn total_len(&self) -> usize {
        let event_len = self.width * self.rounds;
        self.len.unwrap_or_else(|| {
            self.lead + self.events.saturating_sub(1) * self.spacing + event_len + self.lead
        })
    }

    /// Samples and ground-truth event starts.
    pub fn generate(&self) -> (Vec<f32>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let k = self.smoothing.max(1);
        let raw: Vec<f64> = (0..self.width + k - 1)
            .map(|_| rng.sample(StandardNormal))
            .collect();
        let round: Vec<f64> = (0..self.width)
            .map(|i| raw[i..i + k].iter().sum::<f64>() / k as f64)
            .collect();

        let mut samples: Vec<f64> = (0..self.total_len())
            .map(|_| self.background_std * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let starts = self.starts();
        let event_len = self.width * self.rounds;
        for &s in &starts {
            for (dst, &v) in samples[s..s + event_len].iter_mut().zip(round.iter().cycle()) {
                *dst = v;
            }
        }
        let samples = samples
            .into_iter()
            .map(|v| (v + self.noise_std * rng.sample::<f64, _>(StandardNormal)) as f32)
            .collect();
        (samples, starts)
    }

    /// Generate and wrap the samples in a [`Trace`].
    pub fn trace(&self, sampling_frequency: f64) -> CoResult<(Trace, Vec<usize>)> {
        let (samples, starts) = self.generate();
        Ok((Trace::new(samples, sampling_frequency)?, starts))
    }
}
