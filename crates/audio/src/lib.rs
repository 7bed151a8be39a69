pub mod dsp;
pub mod features;
pub mod io;

pub use dsp::{downmix, resample};
pub use features::{extract_features, FeatureExtractor, FeatureVector};
pub use io::{AudioDecoder, Waveform};
