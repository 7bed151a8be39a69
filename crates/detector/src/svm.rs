//! Soft-margin support vector classifier with an RBF kernel.
//!
//! Training solves the standard dual problem
//!
//! ```text
//! min ½ αᵀQα − eᵀα   subject to   0 ≤ αᵢ ≤ C,  yᵀα = 0,   Qᵢⱼ = yᵢyⱼK(xᵢ, xⱼ)
//! ```
//!
//! with sequential minimal optimisation, picking the maximal violating pair
//! each step. The decision value of a row is `Σ αᵢyᵢK(svᵢ, x) + b`; positive
//! values mean [`Label::Fake`].

use echoguard_domain::{EchoguardError, Label, Result, SvmParams};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const TAU: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SvmModel {
    dimension: usize,
    gamma: f64,
    c: f64,
    support_vectors: Array2<f64>,
    /// αᵢyᵢ for each support vector.
    dual_coef: Array1<f64>,
    intercept: f64,
}

/// `1 / (n_features * Var(X))`, or 1 when the matrix has no variance.
pub fn scale_gamma(x: &Array2<f64>) -> f64 {
    let variance = x.var(0.0);
    if variance > 0.0 && x.ncols() > 0 {
        1.0 / (x.ncols() as f64 * variance)
    } else {
        1.0
    }
}

fn rbf(gamma: f64, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let distance: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * distance).exp()
}

fn kernel_matrix(x: &Array2<f64>, gamma: f64) -> Array2<f64> {
    let norms: Array1<f64> = x.map_axis(Axis(1), |row| row.dot(&row));
    let mut gram = x.dot(&x.t());
    for ((i, j), value) in gram.indexed_iter_mut() {
        let distance = (norms[i] + norms[j] - 2.0 * *value).max(0.0);
        *value = (-gamma * distance).exp();
    }
    gram
}

impl SvmModel {
    pub fn fit(x: &Array2<f64>, labels: &[Label], params: &SvmParams) -> Result<Self> {
        params.validate()?;
        let n = x.nrows();
        if n == 0 {
            return Err(EchoguardError::EmptyDataset);
        }
        if labels.len() != n {
            return Err(EchoguardError::validation(format!(
                "{n} training rows but {} labels",
                labels.len()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(EchoguardError::validation(
                "training matrix contains non-finite values",
            ));
        }
        let first = labels[0];
        if labels.iter().all(|label| *label == first) {
            return Err(EchoguardError::SingleClass(first.to_string()));
        }

        let gamma = params.gamma.unwrap_or_else(|| scale_gamma(x));
        let c = params.c;
        let y: Vec<f64> = labels.iter().map(|label| label.sign()).collect();
        let kernel = kernel_matrix(x, gamma);
        debug!(rows = n, gamma, c, "kernel matrix ready");

        let mut alpha = vec![0.0f64; n];
        let mut gradient = vec![-1.0f64; n];
        let mut iterations = 0usize;
        let converged = loop {
            let Some((i, j)) = select_working_set(&y, &alpha, &gradient, c, params.tolerance)
            else {
                break true;
            };
            if iterations >= params.max_iterations {
                break false;
            }
            iterations += 1;

            let (old_i, old_j) = (alpha[i], alpha[j]);
            let k_ij = kernel[[i, j]];
            let quad = (kernel[[i, i]] + kernel[[j, j]] - 2.0 * k_ij).max(TAU);
            if y[i] != y[j] {
                let delta = (-gradient[i] - gradient[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0.0 {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if diff > 0.0 {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = c - diff;
                    }
                } else if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            } else {
                let delta = (gradient[i] - gradient[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > c {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = sum - c;
                    }
                } else if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = sum;
                }
                if sum > c {
                    if alpha[j] > c {
                        alpha[j] = c;
                        alpha[i] = sum - c;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = sum;
                }
            }

            let (d_i, d_j) = (alpha[i] - old_i, alpha[j] - old_j);
            for k in 0..n {
                gradient[k] +=
                    y[k] * (y[i] * kernel[[i, k]] * d_i + y[j] * kernel[[j, k]] * d_j);
            }
        };
        if !converged {
            warn!(
                iterations,
                "SMO hit the iteration cap before converging; model may be suboptimal"
            );
        }

        let intercept = -compute_rho(&y, &alpha, &gradient, c);
        let support: Vec<usize> = (0..n).filter(|&i| alpha[i] > 0.0).collect();
        let support_vectors = x.select(Axis(0), &support);
        let dual_coef = Array1::from_iter(support.iter().map(|&i| alpha[i] * y[i]));
        info!(
            iterations,
            support_vectors = support.len(),
            intercept,
            "classifier trained"
        );

        Ok(Self {
            dimension: x.ncols(),
            gamma,
            c,
            support_vectors,
            dual_coef,
            intercept,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn n_support(&self) -> usize {
        self.support_vectors.nrows()
    }

    pub fn decision_value(&self, row: ArrayView1<f64>) -> Result<f64> {
        self.check_ready(row.len())?;
        Ok(self.raw_decision(row))
    }

    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_ready(x.ncols())?;
        Ok(x.map_axis(Axis(1), |row| self.raw_decision(row)))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<Label>> {
        Ok(self
            .decision_function(x)?
            .iter()
            .map(|&value| Label::from_decision(value))
            .collect())
    }

    /// Structural checks used when a model comes from disk.
    pub fn validate(&self) -> Result<()> {
        if self.n_support() == 0 {
            return Err(EchoguardError::Unfitted("classifier"));
        }
        if self.support_vectors.ncols() != self.dimension {
            return Err(EchoguardError::DimensionMismatch {
                expected: self.dimension,
                actual: self.support_vectors.ncols(),
            });
        }
        if self.dual_coef.len() != self.n_support() {
            return Err(EchoguardError::validation(
                "one dual coefficient per support vector is required",
            ));
        }
        if !(self.gamma > 0.0 && self.gamma.is_finite()) || !self.intercept.is_finite() {
            return Err(EchoguardError::validation(
                "classifier parameters must be finite",
            ));
        }
        Ok(())
    }

    fn raw_decision(&self, row: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .outer_iter()
            .zip(self.dual_coef.iter())
            .map(|(sv, coef)| coef * rbf(self.gamma, sv, row))
            .sum::<f64>()
            + self.intercept
    }

    fn check_ready(&self, width: usize) -> Result<()> {
        if self.n_support() == 0 {
            return Err(EchoguardError::Unfitted("classifier"));
        }
        if width != self.dimension {
            return Err(EchoguardError::DimensionMismatch {
                expected: self.dimension,
                actual: width,
            });
        }
        Ok(())
    }
}

fn in_upper_set(y: f64, alpha: f64, c: f64) -> bool {
    (y > 0.0 && alpha < c) || (y < 0.0 && alpha > 0.0)
}

fn in_lower_set(y: f64, alpha: f64, c: f64) -> bool {
    (y > 0.0 && alpha > 0.0) || (y < 0.0 && alpha < c)
}

/// Maximal violating pair, or `None` once the KKT gap is below `tolerance`.
fn select_working_set(
    y: &[f64],
    alpha: &[f64],
    gradient: &[f64],
    c: f64,
    tolerance: f64,
) -> Option<(usize, usize)> {
    let mut g_max = f64::NEG_INFINITY;
    let mut g_min = f64::INFINITY;
    let mut i = None;
    let mut j = None;
    for t in 0..y.len() {
        let value = -y[t] * gradient[t];
        if in_upper_set(y[t], alpha[t], c) && value >= g_max {
            g_max = value;
            i = Some(t);
        }
        if in_lower_set(y[t], alpha[t], c) && value <= g_min {
            g_min = value;
            j = Some(t);
        }
    }
    match (i, j) {
        (Some(i), Some(j)) if g_max - g_min >= tolerance => Some((i, j)),
        _ => None,
    }
}

/// Offset from the free support vectors, or the midpoint of the feasible
/// interval when every α sits at a bound.
fn compute_rho(y: &[f64], alpha: &[f64], gradient: &[f64], c: f64) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_sum = 0.0;
    let mut free_count = 0usize;
    for t in 0..y.len() {
        let yg = y[t] * gradient[t];
        if alpha[t] >= c {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if alpha[t] <= 0.0 {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            free_count += 1;
            free_sum += yg;
        }
    }
    if free_count > 0 {
        free_sum / free_count as f64
    } else {
        (upper + lower) / 2.0
    }
}
