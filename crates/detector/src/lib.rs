pub mod dataset;
pub mod metrics;
pub mod scaler;
pub mod service;
pub mod store;
pub mod svm;
pub mod training;

pub use dataset::{Dataset, DatasetBuilder, DirectoryBuild, FileFailure};
pub use metrics::{ClassMetrics, ConfusionMatrix, Evaluation};
pub use scaler::Normalizer;
pub use service::{Detector, DetectorSummary, Verdict};
pub use store::{ModelArtifact, ARTIFACT_VERSION};
pub use svm::SvmModel;
pub use training::{evaluate, TrainingOutcome, TrainingPipeline};
