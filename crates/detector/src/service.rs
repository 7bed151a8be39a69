use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use echoguard_audio::{AudioDecoder, FeatureExtractor, FeatureVector, Waveform};
use echoguard_domain::{DetectorConfig, EchoguardError, Label, Result};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinError;
use tracing::{debug, info, instrument};

use crate::store::ModelArtifact;

/// Outcome of classifying one clip. `confidence` is the magnitude of the
/// decision value, not a probability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub label: Label,
    pub confidence: f64,
    pub decision_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorSummary {
    pub dimension: usize,
    pub sample_rate: u32,
    pub support_vectors: usize,
    pub trained_at: String,
}

struct DetectorInner {
    artifact: ModelArtifact,
    extractor: FeatureExtractor,
    config: DetectorConfig,
}

/// Immutable inference context. Build it once at startup and clone it into
/// whatever needs to classify; clones share the loaded model.
#[derive(Clone)]
pub struct Detector {
    inner: Arc<DetectorInner>,
}

impl Detector {
    /// Pairs a trained artifact with the serving configuration. Serving with
    /// analysis settings other than the ones the model was trained on is
    /// refused.
    pub fn new(artifact: ModelArtifact, config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        artifact.validate()?;
        if artifact.features() != &config.features {
            return Err(EchoguardError::validation(format!(
                "serving feature settings {:?} differ from the trained ones {:?}",
                config.features,
                artifact.features()
            )));
        }
        let extractor = FeatureExtractor::new(config.features.clone())?;
        if extractor.dimension() != artifact.dimension() {
            return Err(EchoguardError::DimensionMismatch {
                expected: artifact.dimension(),
                actual: extractor.dimension(),
            });
        }
        Ok(Self {
            inner: Arc::new(DetectorInner {
                artifact,
                extractor,
                config: config.clone(),
            }),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P, config: &DetectorConfig) -> Result<Self> {
        let artifact = ModelArtifact::load(path)?;
        Self::new(artifact, config)
    }

    pub fn dimension(&self) -> usize {
        self.inner.artifact.dimension()
    }

    pub fn summary(&self) -> DetectorSummary {
        let artifact = &self.inner.artifact;
        DetectorSummary {
            dimension: artifact.dimension(),
            sample_rate: artifact.features().sample_rate,
            support_vectors: artifact.classifier().n_support(),
            trained_at: artifact
                .trained_at()
                .format(&Rfc3339)
                .unwrap_or_else(|_| artifact.trained_at().to_string()),
        }
    }

    /// Classifies an already extracted, unnormalised feature vector.
    pub fn classify_features(&self, features: &FeatureVector) -> Result<Verdict> {
        let artifact = &self.inner.artifact;
        if features.len() != artifact.dimension() {
            return Err(EchoguardError::DimensionMismatch {
                expected: artifact.dimension(),
                actual: features.len(),
            });
        }
        let scaled = artifact.normalizer().transform_row(features.view())?;
        let decision_value = artifact.classifier().decision_value(scaled.view())?;
        if !decision_value.is_finite() {
            return Err(EchoguardError::validation("decision value is not finite"));
        }
        let verdict = Verdict {
            label: Label::from_decision(decision_value),
            confidence: decision_value.abs(),
            decision_value,
        };
        debug!(label = %verdict.label, confidence = verdict.confidence, "classified");
        Ok(verdict)
    }

    /// Downmixes and resamples when needed, then extracts and classifies.
    pub fn classify_waveform(&self, waveform: &Waveform) -> Result<Verdict> {
        let rate = self.inner.config.features.sample_rate;
        let features = if waveform.is_mono() && waveform.sample_rate == rate {
            self.inner.extractor.extract(waveform)?
        } else {
            let prepared = waveform.clone().into_analysis(rate)?;
            self.inner.extractor.extract(&prepared)?
        };
        self.classify_features(&features)
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn classify_file<P: AsRef<Path>>(&self, path: P) -> Result<Verdict> {
        let path = path.as_ref();
        self.check_extension(path)?;
        let waveform = AudioDecoder::load(path, self.inner.config.features.sample_rate)?;
        let verdict = self.classify_waveform(&waveform)?;
        info!(label = %verdict.label, confidence = verdict.confidence, "file classified");
        Ok(verdict)
    }

    /// Entry point for uploaded clips: the allow-list is checked before any
    /// decoding happens.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn classify_upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<Verdict> {
        let extension = self.check_extension(Path::new(file_name))?;
        let waveform = AudioDecoder::decode_bytes(bytes, Some(&extension))?;
        let verdict = self.classify_waveform(&waveform)?;
        info!(label = %verdict.label, confidence = verdict.confidence, "upload classified");
        Ok(verdict)
    }

    /// Runs [`Detector::classify_upload`] on the blocking pool and gives up
    /// after `timeout`. The abandoned computation finishes in the background
    /// and its result is dropped.
    pub async fn classify_upload_with_timeout(
        &self,
        file_name: String,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<Verdict> {
        let detector = self.clone();
        let task =
            tokio::task::spawn_blocking(move || detector.classify_upload(&file_name, bytes));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(task_failure(join)),
            Err(_) => Err(EchoguardError::Timeout(timeout)),
        }
    }

    fn check_extension(&self, path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if self.inner.config.allows(path) {
            Ok(extension)
        } else {
            Err(EchoguardError::UnsupportedFormat {
                extension,
                allowed: self.inner.config.allowed_extensions.join(", "),
            })
        }
    }
}

fn task_failure(err: JoinError) -> EchoguardError {
    if err.is_panic() {
        EchoguardError::TaskFailed("classification panicked".into())
    } else {
        EchoguardError::TaskFailed(err.to_string())
    }
}
