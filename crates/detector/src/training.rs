use echoguard_domain::{DetectorConfig, EchoguardError, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::dataset::Dataset;
use crate::metrics::Evaluation;
use crate::scaler::Normalizer;
use crate::store::ModelArtifact;
use crate::svm::SvmModel;

#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    #[serde(skip)]
    pub artifact: ModelArtifact,
    pub evaluation: Evaluation,
    pub train_rows: usize,
    pub test_rows: usize,
}

pub struct TrainingPipeline {
    config: DetectorConfig,
}

impl TrainingPipeline {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Split, fit on the training side only, score the held-out side.
    #[instrument(skip_all, fields(rows = dataset.len()))]
    pub fn run(&self, dataset: &Dataset) -> Result<TrainingOutcome> {
        let training = &self.config.training;
        let (train, test) = dataset.stratified_split(training.test_fraction, training.seed)?;
        info!(
            train = train.len(),
            test = test.len(),
            "split dataset into train and test partitions"
        );
        let artifact = self.fit(&train)?;
        let evaluation = evaluate(&artifact, &test)?;
        info!(accuracy = evaluation.accuracy, "evaluation complete");
        Ok(TrainingOutcome {
            artifact,
            evaluation,
            train_rows: train.len(),
            test_rows: test.len(),
        })
    }

    /// Fits the normalizer and the classifier on `train` and pairs them.
    pub fn fit(&self, train: &Dataset) -> Result<ModelArtifact> {
        if train.is_empty() {
            return Err(EchoguardError::EmptyDataset);
        }
        let expected = self.config.features.dimension();
        if train.dimension() != expected {
            return Err(EchoguardError::DimensionMismatch {
                expected,
                actual: train.dimension(),
            });
        }
        let normalizer = Normalizer::fit(train.features())?;
        let scaled = normalizer.transform(train.features())?;
        let classifier = SvmModel::fit(&scaled, train.labels(), &self.config.svm)?;
        ModelArtifact::new(self.config.features.clone(), normalizer, classifier)
    }
}

pub fn evaluate(artifact: &ModelArtifact, test: &Dataset) -> Result<Evaluation> {
    let predicted = artifact.predict(test.features())?;
    Evaluation::compute(test.labels(), &predicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoguard_domain::{FeatureConfig, Label};
    use ndarray::Array2;

    fn separable(rows_per_class: usize, dimension: usize) -> Dataset {
        let rows = rows_per_class * 2;
        let features = Array2::from_shape_fn((rows, dimension), |(r, c)| {
            let centre = if r < rows_per_class { -2.0 } else { 2.0 };
            centre + ((r * 31 + c * 17) % 11) as f64 * 0.05
        });
        let mut labels = vec![Label::Real; rows_per_class];
        labels.extend(vec![Label::Fake; rows_per_class]);
        Dataset::new(features, labels).unwrap()
    }

    fn config(n_coefficients: usize) -> DetectorConfig {
        DetectorConfig {
            features: FeatureConfig {
                n_coefficients,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn run_trains_and_scores_held_out_rows() {
        let pipeline = TrainingPipeline::new(config(2)).unwrap();
        let outcome = pipeline.run(&separable(20, 12)).unwrap();
        assert_eq!(outcome.train_rows, 32);
        assert_eq!(outcome.test_rows, 8);
        assert_eq!(outcome.evaluation.accuracy, 1.0);
        assert_eq!(outcome.evaluation.per_class[0].support, 4);
    }

    #[test]
    fn fit_rejects_wrong_feature_width() {
        let pipeline = TrainingPipeline::new(config(13)).unwrap();
        assert!(matches!(
            pipeline.fit(&separable(5, 12)),
            Err(EchoguardError::DimensionMismatch { expected: 78, actual: 12 })
        ));
    }

    #[test]
    fn single_class_training_set_fails() {
        let pipeline = TrainingPipeline::new(config(2)).unwrap();
        let features = Array2::from_shape_fn((4, 12), |(r, c)| (r + c) as f64);
        let dataset = Dataset::new(features, vec![Label::Fake; 4]).unwrap();
        assert!(matches!(
            pipeline.fit(&dataset),
            Err(EchoguardError::SingleClass(_))
        ));
        assert!(matches!(
            pipeline.fit(&Dataset::empty(12)),
            Err(EchoguardError::EmptyDataset)
        ));
    }
}
