use echoguard_domain::{EchoguardError, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Averages interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Converts mono samples from `from_rate` to `to_rate`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(EchoguardError::decode("sample rate must be positive"));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    debug!(from_rate, to_rate, frames = samples.len(), "resampling");
    let mut resampler = FastFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        samples.len(),
        1,
    )
    .map_err(|e| EchoguardError::decode(format!("create resampler: {e}")))?;
    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| EchoguardError::decode(format!("resample: {e}")))?;
    Ok(output.pop().unwrap_or_default())
}

pub fn has_non_finite(samples: &[f32]) -> bool {
    samples.iter().any(|s| !s.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let stereo = vec![0.5, 0.3, 0.6, 0.4, -1.0, 1.0];
        let mono = downmix(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.4).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
        assert_eq!(mono[2], 0.0);
    }

    #[test]
    fn same_rate_is_a_copy() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000).unwrap(), input);
    }

    #[test]
    fn halving_the_rate_halves_the_length() {
        let input: Vec<f32> = (0..8_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = resample(&input, 32_000, 16_000).unwrap();
        let expected = 4_000i64;
        assert!((output.len() as i64 - expected).abs() < 100);
    }

    #[test]
    fn detects_nan() {
        assert!(has_non_finite(&[0.0, f32::NAN]));
        assert!(!has_non_finite(&[0.0, 1.0]));
    }
}
