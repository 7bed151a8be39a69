use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EchoguardError {
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("feature extraction failed: {0}")]
    Extraction(String),
    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{0} used before it was fitted or loaded")]
    Unfitted(&'static str),
    #[error("could not load model artifact {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("training set is empty")]
    EmptyDataset,
    #[error("training set contains a single class ({0})")]
    SingleClass(String),
    #[error("unsupported audio format {extension:?}; allowed: {allowed}")]
    UnsupportedFormat { extension: String, allowed: String },
    #[error("classification timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("background classification task failed: {0}")]
    TaskFailed(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EchoguardError {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode<T: Into<String>>(message: T) -> Self {
        Self::Decode(message.into())
    }

    pub fn extraction<T: Into<String>>(message: T) -> Self {
        Self::Extraction(message.into())
    }

    pub fn load<P: Into<PathBuf>, T: Into<String>>(path: P, reason: T) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Failures that only affect a single input file. Dataset building records
    /// these and moves on; everything else aborts the batch.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Extraction(_) | Self::Io(_))
    }
}

pub type Result<T, E = EchoguardError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_message_names_both_sides() {
        let err = EchoguardError::DimensionMismatch {
            expected: 78,
            actual: 60,
        };
        assert_eq!(
            err.to_string(),
            "feature dimension mismatch: expected 78, got 60"
        );
    }

    #[test]
    fn per_file_errors_are_recoverable() {
        assert!(EchoguardError::decode("bad header").is_per_file());
        assert!(EchoguardError::extraction("too short").is_per_file());
        assert!(!EchoguardError::EmptyDataset.is_per_file());
        assert!(!EchoguardError::load("model.json", "missing").is_per_file());
    }
}
