use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use echoguard_detector::{Dataset, DatasetBuilder, FileFailure};
use echoguard_domain::{DetectorConfig, Label};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Extract MFCC statistics from labelled speech folders"
)]
struct Args {
    /// Folder of genuine recordings
    #[arg(long, default_value = "Real_Audio")]
    real: PathBuf,
    /// Folder of synthetic recordings
    #[arg(long, default_value = "Fake_Audio")]
    fake: PathBuf,
    /// Where X_features.json and y_labels.json are written
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// YAML or JSON detector configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct BuildReport<'a> {
    rows: usize,
    dimension: usize,
    real: usize,
    fake: usize,
    failures: &'a [FileFailure],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DetectorConfig::from_path(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DetectorConfig::default(),
    };
    let builder = DatasetBuilder::new(&config)?;

    let real = builder
        .build(&args.real, Label::Real)
        .with_context(|| format!("reading {}", args.real.display()))?;
    let fake = builder
        .build(&args.fake, Label::Fake)
        .with_context(|| format!("reading {}", args.fake.display()))?;

    let mut failures = real.failures;
    failures.extend(fake.failures);
    for failure in &failures {
        warn!(path = %failure.path.display(), reason = %failure.reason, "file left out");
    }

    let dataset = Dataset::concat(&[real.dataset, fake.dataset])?;
    std::fs::create_dir_all(&args.out_dir)?;
    let features_path = args.out_dir.join("X_features.json");
    let labels_path = args.out_dir.join("y_labels.json");
    dataset.save(&features_path, &labels_path)?;

    let [real_rows, fake_rows] = dataset.class_counts();
    info!(
        rows = dataset.len(),
        dimension = dataset.dimension(),
        real = real_rows,
        fake = fake_rows,
        "dataset written"
    );

    let report = BuildReport {
        rows: dataset.len(),
        dimension: dataset.dimension(),
        real: real_rows,
        fake: fake_rows,
        failures: &failures,
    };
    let writer = BufWriter::new(File::create(args.out_dir.join("build_report.json"))?);
    serde_json::to_writer_pretty(writer, &report)?;

    println!(
        "Features shape: ({}, {}), labels: {} ({} REAL, {} FAKE), skipped {} file(s)",
        dataset.len(),
        dataset.dimension(),
        dataset.len(),
        real_rows,
        fake_rows,
        failures.len()
    );
    Ok(())
}
