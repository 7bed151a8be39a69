//! Cepstral feature extraction.
//!
//! A clip becomes a fixed-length vector in five steps: a centred STFT power
//! spectrum, a Slaney mel filterbank, decibel compression, an orthonormal
//! DCT-II that keeps the first `n_coefficients` cepstral rows, and finally the
//! per-row mean and standard deviation of the coefficients together with their
//! first and second Savitzky-Golay derivatives. The result has
//! `6 * n_coefficients` entries laid out as
//! `[mean(base), mean(delta), mean(delta2), std(base), std(delta), std(delta2)]`.

use std::sync::Arc;

use echoguard_domain::{EchoguardError, FeatureConfig, Result};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use realfft::{RealFftPlanner, RealToComplex};
use tracing::{debug, instrument};

use crate::dsp::has_non_finite;
use crate::io::Waveform;

pub type FeatureVector = Array1<f64>;

const AMIN: f64 = 1e-10;

pub struct FeatureExtractor {
    config: FeatureConfig,
    window: Vec<f64>,
    /// n_mels x (n_fft / 2 + 1)
    mel_filters: Array2<f64>,
    /// n_coefficients x n_mels
    dct: Array2<f64>,
    fft: Arc<dyn RealToComplex<f64>>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(config.n_fft);
        let window = hann_window(config.n_fft);
        let mel_filters = mel_filterbank(config.sample_rate, config.n_fft, config.n_mels);
        let dct = dct_matrix(config.n_coefficients, config.n_mels);
        debug!(
            sample_rate = config.sample_rate,
            n_fft = config.n_fft,
            hop_length = config.hop_length,
            n_mels = config.n_mels,
            n_coefficients = config.n_coefficients,
            "feature extractor ready"
        );
        Ok(Self {
            config,
            window,
            mel_filters,
            dct,
            fft,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension()
    }

    /// Smallest input, in samples, that yields a full analysis window.
    pub fn min_samples(&self) -> usize {
        self.config.n_fft
    }

    pub fn extract(&self, waveform: &Waveform) -> Result<FeatureVector> {
        if !waveform.is_mono() {
            return Err(EchoguardError::extraction(format!(
                "expected mono input, got {} channels",
                waveform.channels
            )));
        }
        self.extract_samples(&waveform.samples, waveform.sample_rate)
    }

    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub fn extract_samples(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureVector> {
        if sample_rate != self.config.sample_rate {
            return Err(EchoguardError::extraction(format!(
                "analysis rate is {} Hz, input is {} Hz",
                self.config.sample_rate, sample_rate
            )));
        }
        let cepstrum = self.cepstrum(samples)?;
        let d1 = delta(&cepstrum, self.config.delta_width, 1)?;
        let d2 = delta(&cepstrum, self.config.delta_width, 2)?;
        let stacked = concatenate(Axis(0), &[cepstrum.view(), d1.view(), d2.view()])
            .map_err(|err| EchoguardError::extraction(err.to_string()))?;

        let frames = stacked.ncols() as f64;
        let means = stacked.sum_axis(Axis(1)) / frames;
        let stds = Array1::from_iter(stacked.outer_iter().zip(means.iter()).map(|(row, mean)| {
            (row.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / frames).sqrt()
        }));
        let features = concatenate(Axis(0), &[means.view(), stds.view()])
            .map_err(|err| EchoguardError::extraction(err.to_string()))?;

        if features.iter().any(|v| !v.is_finite()) {
            return Err(EchoguardError::extraction("non-finite feature value"));
        }
        debug!(frames = stacked.ncols(), dimension = features.len(), "extracted features");
        Ok(features)
    }

    /// Cepstral coefficients shaped `[n_coefficients, frames]`.
    pub fn cepstrum(&self, samples: &[f32]) -> Result<Array2<f64>> {
        if samples.is_empty() {
            return Err(EchoguardError::extraction("empty waveform"));
        }
        if samples.len() < self.min_samples() {
            return Err(EchoguardError::extraction(format!(
                "waveform has {} samples, need at least {}",
                samples.len(),
                self.min_samples()
            )));
        }
        if has_non_finite(samples) {
            return Err(EchoguardError::extraction("waveform contains NaN or infinity"));
        }

        let log_mel = self.log_mel_spectrogram(samples)?;
        Ok(self.dct.dot(&log_mel))
    }

    fn log_mel_spectrogram(&self, samples: &[f32]) -> Result<Array2<f64>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;
        let mut padded = vec![0.0f64; pad];
        padded.extend(samples.iter().map(|&s| s as f64));
        padded.extend(std::iter::repeat(0.0).take(pad));
        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let n_bins = n_fft / 2 + 1;

        let mut power = Array2::<f64>::zeros((n_bins, n_frames));
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        for frame in 0..n_frames {
            let start = frame * hop;
            for (slot, (sample, w)) in input
                .iter_mut()
                .zip(padded[start..start + n_fft].iter().zip(&self.window))
            {
                *slot = sample * w;
            }
            self.fft
                .process(&mut input, &mut spectrum)
                .map_err(|err| EchoguardError::extraction(err.to_string()))?;
            for (bin, value) in spectrum.iter().enumerate() {
                power[[bin, frame]] = value.norm_sqr();
            }
        }

        let mut mel = self.mel_filters.dot(&power);
        mel.mapv_inplace(|v| 10.0 * v.max(AMIN).log10());
        let peak = mel.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let floor = peak - self.config.top_db;
        mel.mapv_inplace(|v| v.max(floor));
        Ok(mel)
    }
}

/// Extracts a feature vector with the reference analysis settings and the
/// given coefficient count. Input at any rate other than the reference
/// analysis rate is rejected; resample it first.
pub fn extract_features(
    samples: &[f32],
    sample_rate: u32,
    n_coefficients: usize,
) -> Result<FeatureVector> {
    let config = FeatureConfig {
        n_coefficients,
        ..FeatureConfig::default()
    };
    FeatureExtractor::new(config)?.extract_samples(samples, sample_rate)
}

/// Savitzky-Golay derivative of each row, polynomial order equal to the
/// derivative order. Edge frames are evaluated on a polynomial fitted to the
/// first (or last) full window. Short inputs shrink the window to the largest
/// odd frame count.
pub fn delta(data: &Array2<f64>, width: usize, order: usize) -> Result<Array2<f64>> {
    let frames = data.ncols();
    let mut w = width.min(frames);
    if w % 2 == 0 {
        w -= 1;
    }
    if w < 3 || w <= order {
        return Err(EchoguardError::extraction(format!(
            "{frames} frames are too few for order {order} deltas"
        )));
    }
    let half = w / 2;
    let mut out = Array2::<f64>::zeros(data.raw_dim());

    let centre = savgol_weights(w, order, 0.0)?;
    for i in half..frames - half {
        let window = data.slice(s![.., i - half..i + half + 1]);
        out.column_mut(i).assign(&window.dot(&centre));
    }

    let head = data.slice(s![.., 0..w]);
    let tail = data.slice(s![.., frames - w..frames]);
    for k in 0..half {
        let left = savgol_weights(w, order, k as f64 - half as f64)?;
        out.column_mut(k).assign(&head.dot(&left));
        let right = savgol_weights(w, order, (half + 1 + k) as f64 - half as f64)?;
        out.column_mut(frames - half + k).assign(&tail.dot(&right));
    }
    Ok(out)
}

/// Least-squares weights that evaluate the `order`-th derivative, at offset
/// `at`, of an order-`order` polynomial fitted to `w` samples centred on 0.
fn savgol_weights(w: usize, order: usize, at: f64) -> Result<Array1<f64>> {
    let half = (w / 2) as f64;
    let terms = order + 1;
    let vander = Array2::from_shape_fn((w, terms), |(j, k)| (j as f64 - half).powi(k as i32));
    let gram = vander.t().dot(&vander);
    let mut rhs = Array1::<f64>::zeros(terms);
    for k in order..terms {
        let falling: f64 = ((k - order + 1)..=k).map(|f| f as f64).product();
        rhs[k] = falling * at.powi((k - order) as i32);
    }
    let coeffs = solve(gram, rhs)?;
    Ok(vander.dot(&coeffs))
}

/// Gaussian elimination with partial pivoting for the tiny normal equations
/// above.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| a[[x, col]].abs().total_cmp(&a[[y, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(EchoguardError::extraction("singular derivative filter"));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / size as f64).cos())
        .collect()
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        hz / MEL_F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        mel * MEL_F_SP
    }
}

/// Triangular filters between 0 Hz and Nyquist with Slaney area normalisation.
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * nyquist / (n_bins - 1) as f64)
        .collect();
    let mel_max = hz_to_mel(nyquist);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = Array2::<f64>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (lo, centre, hi) = (edges[m], edges[m + 1], edges[m + 2]);
        let norm = 2.0 / (hi - lo);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let rising = (f - lo) / (centre - lo);
            let falling = (hi - f) / (hi - centre);
            filters[[m, k]] = rising.min(falling).max(0.0) * norm;
        }
    }
    filters
}

/// Orthonormal DCT-II basis, first `n_out` rows.
fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f64> {
    let n = n_in as f64;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        scale * (std::f64::consts::PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos()
    })
}
