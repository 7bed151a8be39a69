use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use echoguard_domain::{EchoguardError, FeatureConfig, Label, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::scaler::Normalizer;
use crate::svm::SvmModel;

pub const ARTIFACT_VERSION: u32 = 1;

/// The unit that is persisted and served: classifier and normalizer are only
/// ever saved, loaded and applied together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    version: u32,
    dimension: usize,
    features: FeatureConfig,
    normalizer: Normalizer,
    classifier: SvmModel,
    #[serde(with = "time::serde::rfc3339")]
    trained_at: OffsetDateTime,
}

impl ModelArtifact {
    pub fn new(features: FeatureConfig, normalizer: Normalizer, classifier: SvmModel) -> Result<Self> {
        let artifact = Self {
            version: ARTIFACT_VERSION,
            dimension: features.dimension(),
            features,
            normalizer,
            classifier,
            trained_at: OffsetDateTime::now_utc(),
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn features(&self) -> &FeatureConfig {
        &self.features
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn classifier(&self) -> &SvmModel {
        &self.classifier
    }

    pub fn trained_at(&self) -> OffsetDateTime {
        self.trained_at
    }

    /// Every component must agree on the feature dimension.
    pub fn validate(&self) -> Result<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(EchoguardError::validation(format!(
                "artifact format {} is not supported (expected {ARTIFACT_VERSION})",
                self.version
            )));
        }
        self.features.validate()?;
        self.normalizer.validate()?;
        self.classifier.validate()?;
        let expected = self.features.dimension();
        for actual in [
            self.dimension,
            self.normalizer.dimension(),
            self.classifier.dimension(),
        ] {
            if actual != expected {
                return Err(EchoguardError::DimensionMismatch { expected, actual });
            }
        }
        Ok(())
    }

    /// Raw (unnormalised) features in, signed decision values out.
    pub fn decision_function(&self, raw: &Array2<f64>) -> Result<Array1<f64>> {
        let scaled = self.normalizer.transform(raw)?;
        self.classifier.decision_function(&scaled)
    }

    pub fn predict(&self, raw: &Array2<f64>) -> Result<Vec<Label>> {
        Ok(self
            .decision_function(raw)?
            .iter()
            .map(|&value| Label::from_decision(value))
            .collect())
    }

    /// Writes to a sibling temporary file first so a crash never leaves a
    /// half-written artifact behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        let written = self
            .write_to(&tmp)
            .and_then(|()| fs::rename(&tmp, path).map_err(EchoguardError::from));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        info!(
            path = %path.display(),
            dimension = self.dimension,
            support_vectors = self.classifier.n_support(),
            "saved model artifact"
        );
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)
            .map_err(|err| EchoguardError::Serialization(err.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    /// Any failure, including an internally inconsistent artifact, is
    /// reported as [`EchoguardError::Load`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| EchoguardError::load(path, err.to_string()))?;
        let artifact: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| EchoguardError::load(path, err.to_string()))?;
        artifact
            .validate()
            .map_err(|err| EchoguardError::load(path, err.to_string()))?;
        info!(
            path = %path.display(),
            dimension = artifact.dimension,
            "loaded model artifact"
        );
        Ok(artifact)
    }
}
