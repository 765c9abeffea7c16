pub mod algorithms;
pub mod core;
pub mod metrics;
pub mod synthetic;

use std::time::{Duration, Instant};

pub use crate::algorithms::evaluate::{evaluate, AlignmentStats, EvalParams};
pub use crate::algorithms::kernel::score;
pub use crate::algorithms::peaks::{
    find_events, Candidate, Detection, FitOutcome, ScanParams, TemplateScan,
};
pub use crate::algorithms::refine::{refine, Refinement};
pub use crate::algorithms::template_search::{find_with_template, TemplateMatches, TemplateSearch};
pub use crate::algorithms::width::{estimate_widths, RankedWidth, WidthRanking, WidthSweep};
pub use crate::core::cache::ProfileCache;
pub use crate::core::config::FinderConfig;
pub use crate::core::error::{CoError, CoResult};
pub use crate::core::profile::{Peak, RollingStats, SimilarityProfile, SENTINEL};
pub use crate::core::similarity_metric::{Metric, SimilarityMetric};
pub use crate::core::trace::Trace;
pub use crate::metrics::correlation::PearsonCorrelation;
pub use crate::metrics::sad::NegatedSad;

/// Cache of per-width template scans shared across pipeline runs on one trace.
pub type ScanCache = ProfileCache<TemplateScan>;

/// Wall-clock duration of each pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub width_estimation: Duration,
    pub peak_validation: Duration,
    pub refinement: Duration,
    pub evaluation: Duration,
}

/// Everything a completed pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Chosen round width in samples.
    pub width: usize,
    pub ranking: WidthRanking,
    /// Coarse event indices and characteristic template.
    pub detection: Detection,
    /// Drift-corrected indices and refined template.
    pub refinement: Refinement,
    /// Present when ground truth was supplied.
    pub stats: Option<AlignmentStats>,
    pub timings: StageTimings,
}

/// Result of [`CoFinder::run`].
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed(PipelineReport),
    /// No width matched the expected event count. Refinement and evaluation
    /// were not run.
    NoFit {
        ranking: WidthRanking,
        widths_tried: Vec<usize>,
        timings: StageTimings,
    },
}

impl PipelineOutcome {
    pub fn report(&self) -> Option<&PipelineReport> {
        match self {
            Self::Completed(r) => Some(r),
            Self::NoFit { .. } => None,
        }
    }
}

/// High-level facade for crypto-operation detection and alignment.
///
/// # Examples
///
/// ```
/// use cofind_rs::synthetic::SyntheticTrace;
/// use cofind_rs::{CoFinder, FinderConfig};
///
/// let (trace, truth) = SyntheticTrace::new(40, 4, 6)
///     .samples_per_clock(4)
///     .trace(100e6)
///     .unwrap();
/// let mut config = FinderConfig::new(4, 6);
/// config.device_frequency = Some(25e6);
/// config.approx_width_cycles = 10.0;
///
/// let finder = CoFinder::new(config).unwrap();
/// let outcome = finder.run(&trace, Some(&truth)).unwrap();
/// let report = outcome.report().unwrap();
/// assert_eq!(report.width, 40);
/// assert_eq!(report.refinement.indices, truth);
/// ```
#[derive(Debug, Clone)]
pub struct CoFinder {
    config: FinderConfig,
    eval: EvalParams,
}

impl CoFinder {
    /// Create a finder; the configuration is validated up front.
    pub fn new(config: FinderConfig) -> CoResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            eval: EvalParams::default(),
        })
    }

    /// Override the evaluation tolerances.
    pub fn with_eval_params(mut self, eval: EvalParams) -> Self {
        self.eval = eval;
        self
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Width-sweep parameters derived from the configuration.
    pub fn sweep(&self) -> WidthSweep {
        WidthSweep {
            rounds: self.config.similar_rounds,
            top_x: self.config.top_x,
            metric: self.config.width_metric,
            detrend: self.config.detrend_widths,
        }
    }

    /// Rank the configured candidate widths on `trace`.
    pub fn estimate_widths(&self, trace: &Trace) -> CoResult<WidthRanking> {
        let widths = self.config.candidate_widths(trace.sampling_frequency())?;
        tracing::debug!(widths = ?widths, "candidate widths");
        estimate_widths(trace.samples(), &widths, &self.sweep())
    }

    /// Validate the ranked widths and extract the event start indices.
    pub fn find_events(
        &self,
        trace: &Trace,
        ranking: &WidthRanking,
        cache: &mut ScanCache,
    ) -> CoResult<FitOutcome> {
        find_events(trace, ranking, &self.config, cache)
    }

    /// Align the detected events to the best-scoring one.
    ///
    /// Events are refined in acceptance order, so the baseline is the
    /// strongest peak; the result is sorted by corrected index.
    pub fn refine(&self, trace: &Trace, detection: &Detection) -> CoResult<Refinement> {
        let by_score: Vec<usize> = detection.peaks.iter().map(|c| c.position).collect();
        let mut refinement = refine(
            trace.samples(),
            detection.width,
            &by_score,
            self.config.rounds_in_template,
            self.config.refine_top_percent,
        )?;
        refinement.sort_by_index();
        Ok(refinement)
    }

    /// Compare `found` with ground truth using the nominal round width.
    pub fn evaluate(
        &self,
        trace: &Trace,
        found: &[usize],
        truth: &[usize],
    ) -> CoResult<AlignmentStats> {
        let known_width = self.config.known_width(trace.sampling_frequency())?;
        evaluate(found, truth, known_width, self.config.similar_rounds, &self.eval)
    }

    /// Locate events with a known template (for example a refined one).
    pub fn find_with_template(
        &self,
        trace: &Trace,
        template: &[f32],
        width: usize,
    ) -> CoResult<TemplateMatches> {
        let search = TemplateSearch::new(
            width,
            self.config.similar_rounds,
            self.config.expected_events,
            self.config.template_metric,
        );
        find_with_template(trace.samples(), template, &search)
    }

    /// Run the full pipeline with a fresh scan cache.
    pub fn run(&self, trace: &Trace, truth: Option<&[usize]>) -> CoResult<PipelineOutcome> {
        let mut cache = ScanCache::new();
        self.run_with_cache(trace, truth, &mut cache)
    }

    /// Run the full pipeline, reusing template scans from `cache`.
    ///
    /// Stages run strictly in order; a no-fit stops the run before
    /// refinement.
    pub fn run_with_cache(
        &self,
        trace: &Trace,
        truth: Option<&[usize]>,
        cache: &mut ScanCache,
    ) -> CoResult<PipelineOutcome> {
        let mut timings = StageTimings::default();

        let t = Instant::now();
        let ranking = self.estimate_widths(trace)?;
        timings.width_estimation = t.elapsed();

        let t = Instant::now();
        let outcome = self.find_events(trace, &ranking, cache)?;
        timings.peak_validation = t.elapsed();
        let detection = match outcome {
            FitOutcome::Fitted(d) => d,
            FitOutcome::NoFit { widths_tried } => {
                return Ok(PipelineOutcome::NoFit {
                    ranking,
                    widths_tried,
                    timings,
                });
            }
        };

        let t = Instant::now();
        let refinement = self.refine(trace, &detection)?;
        timings.refinement = t.elapsed();

        let t = Instant::now();
        let stats = truth
            .map(|truth| self.evaluate(trace, &refinement.indices, truth))
            .transpose()?;
        timings.evaluation = t.elapsed();

        tracing::info!(
            width = detection.width,
            events = refinement.indices.len(),
            elapsed_ms = (timings.width_estimation
                + timings.peak_validation
                + timings.refinement
                + timings.evaluation)
                .as_millis() as u64,
            "pipeline complete"
        );

        Ok(PipelineOutcome::Completed(PipelineReport {
            width: detection.width,
            ranking,
            detection,
            refinement,
            stats,
            timings,
        }))
    }
}
