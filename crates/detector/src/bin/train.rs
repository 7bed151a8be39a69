use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use echoguard_detector::{Dataset, TrainingPipeline};
use echoguard_domain::DetectorConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the REAL/FAKE speech classifier", long_about = None)]
struct Cli {
    /// Feature matrix written by dataset-pipeline
    #[arg(long, default_value = "X_features.json")]
    features: PathBuf,
    /// Label codes written by dataset-pipeline
    #[arg(long, default_value = "y_labels.json")]
    labels: PathBuf,
    /// Where the trained model artifact is written
    #[arg(short, long, default_value = "svm_model.json")]
    model: PathBuf,
    /// YAML or JSON detector configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Also write the evaluation as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DetectorConfig::from_path(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DetectorConfig::default(),
    };
    let dataset = Dataset::load(&cli.features, &cli.labels).context("loading dataset")?;
    let [real, fake] = dataset.class_counts();
    info!(rows = dataset.len(), real, fake, "loaded dataset");

    let pipeline = TrainingPipeline::new(config)?;
    let outcome = pipeline.run(&dataset)?;
    println!("{}", outcome.evaluation);

    outcome
        .artifact
        .save(&cli.model)
        .with_context(|| format!("saving model to {}", cli.model.display()))?;
    if let Some(report) = &cli.report {
        std::fs::write(report, serde_json::to_vec_pretty(&outcome)?)?;
    }
    println!("Model saved to {}", cli.model.display());
    Ok(())
}
