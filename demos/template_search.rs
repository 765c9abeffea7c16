//! Reusing a refined template on a second trace.
//!
//! The pipeline runs on a profiling trace to learn the round width and a
//! refined template. That template then locates the operations in a second
//! trace with a different layout, without another width sweep.
//!
//! Run with: cargo run --release --example template_search

use cofind_rs::synthetic::SyntheticTrace;
use cofind_rs::{CoFinder, FinderConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let fs = 100e6;
    let mut config = FinderConfig::new(4, 8);
    config.device_frequency = Some(25e6);
    config.approx_width_cycles = 10.0;
    let finder = CoFinder::new(config)?;

    // Profiling trace
    let (profiling, _) = SyntheticTrace::new(40, 4, 8).samples_per_clock(4).trace(fs)?;
    let outcome = finder.run(&profiling, None)?;
    let Some(report) = outcome.report() else {
        println!("Profiling trace did not fit; nothing to search with");
        return Ok(());
    };
    println!(
        "Learned width {} and a {}-sample template",
        report.width,
        report.refinement.template.len()
    );

    // Same operation at a different spacing
    let (target, truth) = SyntheticTrace::new(40, 4, 8)
        .samples_per_clock(4)
        .spacing(700)
        .trace(fs)?;
    let template = &report.refinement.template;
    let matches = finder.find_with_template(&target, template, report.width)?;

    println!("\n{:>8}  {:>8}  {:>8}  {:>10}", "Truth", "Start", "End", "Score");
    println!("{:-<40}", "");
    for (i, &t) in truth.iter().enumerate() {
        match (matches.starts.get(i), matches.ends.get(i), matches.scores.get(i)) {
            (Some(s), Some(e), Some(sc)) => println!("{t:>8}  {s:>8}  {e:>8}  {sc:>10.4}"),
            _ => println!("{t:>8}  {:>8}", "-"),
        }
    }
    println!("\nFound {} of {} events", matches.len(), truth.len());
    Ok(())
}
