use echoguard_domain::{EchoguardError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Per-column standardisation learned from the training partition.
///
/// Fitting happens once, at training time. After that the parameters are
/// read-only: `transform` is the only operation serving code has.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Normalizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Normalizer {
    /// Learns mean and population standard deviation per column. Columns
    /// without variance get a scale of 1 and therefore map to 0.
    pub fn fit(matrix: &Array2<f64>) -> Result<Self> {
        if matrix.nrows() == 0 {
            return Err(EchoguardError::EmptyDataset);
        }
        if matrix.ncols() == 0 {
            return Err(EchoguardError::validation("feature matrix has no columns"));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(EchoguardError::validation(
                "feature matrix contains non-finite values",
            ));
        }
        let mean = matrix.mean_axis(Axis(0)).ok_or(EchoguardError::EmptyDataset)?;
        let std = matrix.std_axis(Axis(0), 0.0);
        let scale = Array1::from_iter(std.iter().zip(mean.iter()).map(|(&s, &m)| {
            if s <= 10.0 * f64::EPSILON * m.abs().max(1.0) {
                1.0
            } else {
                s
            }
        }));
        Ok(Self { mean, scale })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(matrix.ncols())?;
        Ok((matrix - &self.mean) / &self.scale)
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_width(row.len())?;
        Ok((&row - &self.mean) / &self.scale)
    }

    /// Structural checks used when parameters come from disk.
    pub fn validate(&self) -> Result<()> {
        if self.mean.is_empty() {
            return Err(EchoguardError::Unfitted("normalizer"));
        }
        if self.scale.len() != self.mean.len() {
            return Err(EchoguardError::DimensionMismatch {
                expected: self.mean.len(),
                actual: self.scale.len(),
            });
        }
        if self.mean.iter().any(|v| !v.is_finite())
            || self.scale.iter().any(|v| !(v.is_finite() && *v > 0.0))
        {
            return Err(EchoguardError::validation(
                "normalizer parameters must be finite with positive scale",
            ));
        }
        Ok(())
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if self.mean.is_empty() {
            return Err(EchoguardError::Unfitted("normalizer"));
        }
        if width != self.dimension() {
            return Err(EchoguardError::DimensionMismatch {
                expected: self.dimension(),
                actual: width,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample() -> Array2<f64> {
        array![
            [1.0, 10.0, 5.0],
            [2.0, 20.0, 5.0],
            [3.0, 35.0, 5.0],
            [6.0, 15.0, 5.0]
        ]
    }

    #[test]
    fn fit_transform_standardises_columns() {
        let data = sample();
        let normalizer = Normalizer::fit(&data).unwrap();
        let scaled = normalizer.transform(&data).unwrap();
        for col in 0..2 {
            let column = scaled.column(col);
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn constant_column_maps_to_zero() {
        let data = sample();
        let normalizer = Normalizer::fit(&data).unwrap();
        assert_eq!(normalizer.scale()[2], 1.0);
        let scaled = normalizer.transform(&data).unwrap();
        assert!(scaled.column(2).iter().all(|v| *v == 0.0));
        let unseen = normalizer.transform_row(array![0.0, 0.0, 9.0].view()).unwrap();
        assert!(unseen.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn transform_is_pure() {
        let normalizer = Normalizer::fit(&sample()).unwrap();
        let before = normalizer.clone();
        let row = array![4.0, 12.0, 5.0];
        let a = normalizer.transform_row(row.view()).unwrap();
        let b = normalizer.transform_row(row.view()).unwrap();
        assert_eq!(a, b);
        assert_eq!(normalizer, before);
    }

    #[test]
    fn single_row_matches_batch_row() {
        let data = sample();
        let normalizer = Normalizer::fit(&data).unwrap();
        let batch = normalizer.transform(&data).unwrap();
        let single = normalizer.transform_row(data.row(1)).unwrap();
        assert_eq!(batch.row(1), single);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let normalizer = Normalizer::fit(&sample()).unwrap();
        let result = normalizer.transform_row(array![1.0, 2.0].view());
        assert!(matches!(
            result,
            Err(EchoguardError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn empty_parameters_from_disk_are_unfitted() {
        let empty = r#"{"mean":{"v":1,"dim":[0],"data":[]},"scale":{"v":1,"dim":[0],"data":[]}}"#;
        let normalizer: Normalizer = serde_json::from_str(empty).unwrap();
        assert!(matches!(
            normalizer.transform_row(array![1.0, 2.0].view()),
            Err(EchoguardError::Unfitted(_))
        ));
        assert!(matches!(
            normalizer.validate(),
            Err(EchoguardError::Unfitted(_))
        ));
    }

    #[test]
    fn empty_matrix_cannot_be_fitted() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            Normalizer::fit(&empty),
            Err(EchoguardError::EmptyDataset)
        ));
    }
}
