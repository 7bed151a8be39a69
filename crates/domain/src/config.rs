use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::EchoguardError;

/// Fixed analysis settings. Training and serving must agree on every field,
/// which is why the model artifact records the copy it was trained with.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_coefficients: usize,
    /// Savitzky-Golay window (frames) for delta features. Must be odd.
    pub delta_width: usize,
    pub top_db: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_coefficients: 13,
            delta_width: 9,
            top_db: 80.0,
        }
    }
}

impl FeatureConfig {
    /// Length of the vector produced by the extractor.
    pub fn dimension(&self) -> usize {
        6 * self.n_coefficients
    }

    pub fn validate(&self) -> Result<(), EchoguardError> {
        if self.sample_rate == 0 {
            return Err(EchoguardError::validation("sample rate must be positive"));
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return Err(EchoguardError::validation(
                "n_fft must be at least 2 and hop length positive",
            ));
        }
        if self.n_coefficients == 0 || self.n_coefficients > self.n_mels {
            return Err(EchoguardError::validation(format!(
                "n_coefficients must be in 1..={}, got {}",
                self.n_mels, self.n_coefficients
            )));
        }
        if self.delta_width < 3 || self.delta_width % 2 == 0 {
            return Err(EchoguardError::validation(
                "delta width must be odd and at least 3",
            ));
        }
        if !(self.top_db > 0.0) {
            return Err(EchoguardError::validation("top_db must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SvmParams {
    /// Regularization strength.
    pub c: f64,
    /// RBF bandwidth. `None` derives it from the training data as
    /// `1 / (n_features * Var(X))`.
    pub gamma: Option<f64>,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 10.0,
            gamma: None,
            tolerance: 1e-3,
            max_iterations: 1_000_000,
        }
    }
}

impl SvmParams {
    pub fn validate(&self) -> Result<(), EchoguardError> {
        if !(self.c > 0.0) {
            return Err(EchoguardError::validation("C must be positive"));
        }
        if let Some(gamma) = self.gamma {
            if !(gamma > 0.0) || !gamma.is_finite() {
                return Err(EchoguardError::validation("gamma must be positive"));
            }
        }
        if !(self.tolerance > 0.0) || self.max_iterations == 0 {
            return Err(EchoguardError::validation(
                "tolerance and iteration cap must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub features: FeatureConfig,
    pub svm: SvmParams,
    pub training: TrainingConfig,
    /// Lowercase file extensions accepted by dataset building and uploads.
    pub allowed_extensions: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            svm: SvmParams::default(),
            training: TrainingConfig::default(),
            allowed_extensions: vec!["wav".into(), "mp3".into(), "flac".into()],
        }
    }
}

impl DetectorConfig {
    /// Reads a YAML or JSON file, chosen by extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, EchoguardError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .map_err(|err| EchoguardError::Serialization(err.to_string()))?,
            _ => serde_yaml::from_str(&text)
                .map_err(|err| EchoguardError::Serialization(err.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EchoguardError> {
        self.features.validate()?;
        self.svm.validate()?;
        let fraction = self.training.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(EchoguardError::validation(
                "test fraction must be between 0 and 1",
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(EchoguardError::validation(
                "at least one audio extension must be allowed",
            ));
        }
        Ok(())
    }

    /// Case-insensitive allow-list check on a path's extension.
    pub fn allows<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}
