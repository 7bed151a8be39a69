use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use echoguard_detector::Detector;
use echoguard_domain::DetectorConfig;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify audio files as REAL or FAKE speech", long_about = None)]
struct Cli {
    /// Audio files to classify
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Trained model artifact
    #[arg(short, long, default_value = "svm_model.json")]
    model: PathBuf,
    /// YAML or JSON detector configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Prediction {
    file_name: String,
    prediction: String,
    label: u8,
    confidence: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DetectorConfig::from_path(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DetectorConfig::default(),
    };
    let detector = Detector::load(&cli.model, &config)?;

    for input in &cli.inputs {
        let verdict = detector
            .classify_file(input)
            .with_context(|| format!("classifying {}", input.display()))?;
        let prediction = Prediction {
            file_name: input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            prediction: verdict.label.to_string(),
            label: verdict.label.code(),
            confidence: verdict.confidence,
        };
        println!("{}", serde_json::to_string(&prediction)?);
    }
    Ok(())
}
