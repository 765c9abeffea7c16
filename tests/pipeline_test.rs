use cofind_rs::synthetic::SyntheticTrace;
use cofind_rs::{
    estimate_widths, refine, CoError, CoFinder, FinderConfig, PipelineOutcome, ScanCache,
    Trace, WidthSweep,
};

const FS: f64 = 100e6;
const FD: f64 = 25e6;

/// Width 40 = 10 clock cycles at 4 samples per clock, 4 rounds, 6 events.
fn synthetic(events: usize) -> (Trace, Vec<usize>) {
    SyntheticTrace::new(40, 4, events)
        .samples_per_clock(4)
        .trace(FS)
        .unwrap()
}

fn config(expected_events: usize) -> FinderConfig {
    let mut config = FinderConfig::new(4, expected_events);
    config.device_frequency = Some(FD);
    config.approx_width_cycles = 10.0;
    config
}

#[test]
fn test_pipeline_recovers_synthetic_events() {
    let (trace, truth) = synthetic(6);
    let finder = CoFinder::new(config(6)).unwrap();
    let outcome = finder.run(&trace, Some(&truth)).unwrap();
    let report = outcome.report().expect("pipeline should fit");

    assert_eq!(report.width, 40);
    assert_eq!(report.ranking.ranked.len(), 3);
    assert_eq!(report.detection.indices, truth);
    assert_eq!(report.detection.template.len(), 160);
    assert_eq!(report.detection.sub_peak_threshold, 3);
    assert_eq!(report.refinement.indices, truth);

    let stats = report.stats.as_ref().unwrap();
    assert_eq!(stats.hit_rate, 1.0);
    assert_eq!(stats.mean, 0.0);
    assert_eq!(stats.std_dev, 0.0);
    assert_eq!(stats.missed, 0);
    assert_eq!(stats.histogram.iter().sum::<usize>(), 6);
}

#[test]
fn test_pipeline_sad_width_metric() {
    let (trace, truth) = synthetic(4);
    let mut cfg = config(4);
    cfg.width_metric = cofind_rs::Metric::Sad;
    cfg.avg_round_template = false;
    let finder = CoFinder::new(cfg).unwrap();
    let report = finder.run(&trace, None).unwrap().report().cloned().unwrap();
    assert_eq!(report.width, 40);
    assert_eq!(report.refinement.indices, truth);
    assert!(report.stats.is_none());
}

#[test]
fn test_no_fit_when_fewer_events_than_expected() {
    let (trace, truth) = synthetic(6);
    let finder = CoFinder::new(config(10)).unwrap();
    match finder.run(&trace, Some(&truth)).unwrap() {
        PipelineOutcome::NoFit {
            widths_tried,
            timings,
            ..
        } => {
            assert!(widths_tried.contains(&40));
            assert_eq!(timings.refinement, std::time::Duration::ZERO);
        }
        PipelineOutcome::Completed(r) => {
            panic!("expected no fit, got {} events", r.detection.indices.len())
        }
    }
}

#[test]
fn test_oversized_width_is_excluded() {
    let (trace, _) = synthetic(2);
    let too_big = trace.len() / 4 + 1;
    let sweep = WidthSweep {
        rounds: 4,
        top_x: 10,
        metric: cofind_rs::Metric::Correlation,
        detrend: false,
    };
    let ranking = estimate_widths(trace.samples(), &[36, 40, 44, too_big], &sweep).unwrap();
    assert_eq!(ranking.rejected, vec![too_big]);
    assert_eq!(ranking.ranked.len(), 3);
    assert_eq!(ranking.best().unwrap().width, 40);
}

#[test]
fn test_configuration_errors() {
    let (trace, _) = synthetic(2);
    let mut cfg = config(2);
    cfg.device_frequency = None;
    let finder = CoFinder::new(cfg).unwrap();
    assert_eq!(
        finder.run(&trace, None).unwrap_err(),
        CoError::MissingDeviceFrequency
    );

    let mut cfg = config(2);
    cfg.expected_events = 0;
    assert!(matches!(
        CoFinder::new(cfg),
        Err(CoError::InvalidConfig {
            field: "expected_events",
            ..
        })
    ));
}

#[test]
fn test_short_trace_is_insufficient() {
    let trace = Trace::new(vec![0.25; 100], FS).unwrap();
    let finder = CoFinder::new(config(1)).unwrap();
    assert!(matches!(
        finder.run(&trace, None),
        Err(CoError::InsufficientData { available: 100, .. })
    ));
}

#[test]
fn test_scan_cache_is_reused_and_invalidated() {
    let (trace, _) = synthetic(6);
    let finder = CoFinder::new(config(6)).unwrap();
    let mut cache = ScanCache::new();

    let first = finder.run_with_cache(&trace, None, &mut cache).unwrap();
    let misses = cache.stats().1;
    let second = finder.run_with_cache(&trace, None, &mut cache).unwrap();
    assert_eq!(cache.stats().1, misses);
    assert!(cache.stats().0 >= 1);
    assert_eq!(
        first.report().unwrap().detection,
        second.report().unwrap().detection
    );

    let (other, truth) = synthetic(6);
    let third = finder.run_with_cache(&other, None, &mut cache).unwrap();
    assert!(cache.stats().1 > misses);
    assert_eq!(third.report().unwrap().detection.indices, truth);
}

#[test]
fn test_scan_cache_shared_between_configurations() {
    let (trace, truth) = synthetic(6);
    let mut cache = ScanCache::new();

    let single = CoFinder::new(config(1)).unwrap();
    single.run_with_cache(&trace, None, &mut cache).unwrap();
    let misses = cache.stats().1;

    // A scan built for one expected event holds too few candidates for six
    let finder = CoFinder::new(config(6)).unwrap();
    let outcome = finder.run_with_cache(&trace, None, &mut cache).unwrap();
    assert!(cache.stats().1 > misses);
    let report = outcome.report().expect("six events should fit");
    assert_eq!(report.detection.indices, truth);

    // A different template layout is rescanned too
    let mut raw = config(6);
    raw.avg_round_template = false;
    let misses = cache.stats().1;
    let outcome = CoFinder::new(raw)
        .unwrap()
        .run_with_cache(&trace, None, &mut cache)
        .unwrap();
    assert!(cache.stats().1 > misses);
    assert_eq!(outcome.report().unwrap().detection.indices, truth);
}

#[test]
fn test_refinement_baseline_is_best_peak() {
    let (trace, truth) = synthetic(6);
    let finder = CoFinder::new(config(6)).unwrap();
    let report = finder.run(&trace, None).unwrap().report().cloned().unwrap();

    let best = report.detection.peaks[0].position;
    assert_eq!(report.refinement.baseline, best);
    let at = truth.iter().position(|&t| t == best).unwrap();
    assert_eq!(report.refinement.min_sad[at], 0.0);
    assert_eq!(report.refinement.indices, truth);
}

#[test]
fn test_refiner_is_idempotent() {
    let (trace, truth) = synthetic(6);
    let once = refine(trace.samples(), 40, &truth, 4, 0.0).unwrap();
    let twice = refine(trace.samples(), 40, &once.indices, 4, 0.0).unwrap();
    assert!(twice.offsets.iter().all(|&o| o == (0, 0)));
    assert_eq!(twice.indices, truth);
}

#[test]
fn test_template_search_with_detected_template() {
    let (trace, truth) = synthetic(6);
    let finder = CoFinder::new(config(6)).unwrap();
    let report = finder.run(&trace, None).unwrap().report().cloned().unwrap();
    let found = finder
        .find_with_template(&trace, &report.refinement.template, report.width)
        .unwrap();
    assert_eq!(found.starts, truth);
    assert!(found.ends.iter().zip(&truth).all(|(e, s)| e - s == 160));
}

#[test]
#[ignore = "10M samples; run with --release -- --ignored"]
fn test_ten_million_samples() {
    let synth = SyntheticTrace::new(500, 4, 10)
        .samples_per_clock(10)
        .length(10_000_000)
        .lead(300_000)
        .spacing(950_000);
    let (trace, truth) = synth.trace(FS).unwrap();
    assert_eq!(truth.len(), 10);

    let mut cfg = FinderConfig::new(4, 10);
    cfg.device_frequency = Some(FS / 10.0);
    cfg.approx_width_cycles = 50.0;
    let finder = CoFinder::new(cfg).unwrap();
    let report = finder.run(&trace, Some(&truth)).unwrap().report().cloned().unwrap();

    assert!(report.width.abs_diff(500) <= 1, "width {}", report.width);
    assert_eq!(report.refinement.indices.len(), 10);
    for (found, known) in report.refinement.indices.iter().zip(&truth) {
        assert!(found.abs_diff(*known) <= 2, "found {found}, known {known}");
    }
    assert!(report.stats.unwrap().hit_rate >= 0.95);
}
