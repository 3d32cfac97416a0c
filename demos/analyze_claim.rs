use std::{env, path::PathBuf};

use claim_forensics::{
    AnalysisConfig, ForensicsAnalyzer, Signal, error::Result, retrieval::index::IndexBuilder,
};

fn main() -> Result<()> {
    let args = env::args().collect::<Vec<_>>();
    if args.len() < 3 {
        eprintln!("Usage: {} <reference_dir> <claim_image> [overlay_dir]", args[0]);
        std::process::exit(1);
    }

    let reference_dir = PathBuf::from(&args[1]);
    let claim_image = PathBuf::from(&args[2]);

    let config = AnalysisConfig::default();
    let summary = IndexBuilder::new(&reference_dir).build(&config.retrieval.hash_index_path)?;
    println!(
        "Indexed {} reference images ({} skipped) into {}",
        summary.entries,
        summary.skipped,
        summary.index_path.display()
    );

    let analyzer = ForensicsAnalyzer::new(config)?;
    let analysis = analyzer.analyze(&claim_image)?;

    println!("\nFinal score: {:.2}", analysis.aggregate.final_score);
    println!("{}", analysis.aggregate.explanation_text());

    println!("\nSimilar reference images:");
    for m in &analysis.similar {
        println!("  {} label={} distance={}", m.path, m.label, m.distance);
    }

    if let Some(dir) = args.get(3) {
        std::fs::create_dir_all(dir)?;
        for signal in [Signal::Ela, Signal::Noise, Signal::Edges] {
            let overlay = analysis.aggregate.overlay(signal);
            let stored = overlay.persist(PathBuf::from(dir).join(format!("{signal}_overlay.png")))?;
            println!("Saved {signal} overlay: {stored:?}");
        }
    }

    println!("\n{}", analysis.to_report().to_json().unwrap_or_default());

    Ok(())
}
