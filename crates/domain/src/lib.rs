pub mod config;
pub mod error;
pub mod label;

pub use crate::config::{DetectorConfig, FeatureConfig, SvmParams, TrainingConfig};
pub use crate::error::{EchoguardError, Result};
pub use crate::label::Label;
