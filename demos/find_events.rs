//! End-to-end detection on a synthetic trace with clock drift.
//!
//! A noisy trace with 12 repeated operations is generated and the full
//! pipeline is run against the known event starts.
//!
//! Run with: cargo run --release --example find_events

use cofind_rs::synthetic::SyntheticTrace;
use cofind_rs::{CoFinder, FinderConfig, Metric, PipelineOutcome};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let fs = 100e6;
    let fd = 25e6;
    let (trace, truth) = SyntheticTrace::new(40, 6, 12)
        .samples_per_clock(4)
        .noise(0.05)
        .smoothing(3)
        .trace(fs)?;

    let mut config = FinderConfig::new(6, 12);
    config.device_frequency = Some(fd);
    config.approx_width_cycles = 10.0;
    config.template_metric = Metric::Sad;

    println!("Crypto-operation finder");
    println!("=======================");
    println!(
        "Trace: {} samples at {:.0} MS/s, device clock {:.0} MHz",
        trace.len(),
        fs / 1e6,
        fd / 1e6
    );
    println!("Candidate widths: {:?}\n", config.candidate_widths(fs)?);

    let finder = CoFinder::new(config)?;
    let report = match finder.run(&trace, Some(&truth))? {
        PipelineOutcome::Completed(report) => report,
        PipelineOutcome::NoFit { widths_tried, .. } => {
            println!("No width produced 12 events (tried {widths_tried:?})");
            return Ok(());
        }
    };

    println!("Width ranking:");
    println!("{:>8}  {:>10}  {:>10}", "Width", "Score", "Position");
    println!("{:-<32}", "");
    for w in &report.ranking.ranked {
        println!("{:>8}  {:>10.4}  {:>10}", w.width, w.score, w.position);
    }

    println!(
        "\nChosen width {} at sub-peak threshold {}",
        report.width, report.detection.sub_peak_threshold
    );
    println!("{:>8}  {:>10}  {:>10}  {:>12}", "Truth", "Coarse", "Refined", "Offset");
    println!("{:-<46}", "");
    for (i, &t) in truth.iter().enumerate() {
        let coarse = report.detection.indices.get(i).copied().unwrap_or(0);
        let refined = report.refinement.indices.get(i).copied().unwrap_or(0);
        let offset = report.refinement.offsets.get(i).copied().unwrap_or((0, 0));
        println!("{t:>8}  {coarse:>10}  {refined:>10}  {offset:>12?}");
    }

    if let Some(stats) = &report.stats {
        println!("\nAlignment:");
        println!("  hit rate     {:.3}", stats.hit_rate);
        println!("  mean         {:.4} rounds", stats.mean);
        println!("  std dev      {:.4} rounds", stats.std_dev);
        println!("  95th pct     {:.4} rounds", stats.quantile_95);
        println!("  missed       {}", stats.missed);
        println!("  histogram    {:?}", stats.histogram);
    }
    println!("\nTimings: {:?}", report.timings);
    Ok(())
}
