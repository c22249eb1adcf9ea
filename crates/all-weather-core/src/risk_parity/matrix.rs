use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::types::Weight;
use crate::AllocationResult;

/// Absolute tolerance for the symmetry check.
const SYMMETRY_TOLERANCE: Decimal = dec!(0.0000001);

/// Pivot tolerance of the semi-definiteness check, relative to the largest variance.
const PIVOT_TOLERANCE: Decimal = dec!(0.000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Square, symmetric covariance matrix over a fixed ordered set of labels
/// (tickers at the inner layer, environments at the outer layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    labels: Vec<String>,
    rows: Vec<Vec<Decimal>>,
}

impl CovarianceMatrix {
    /// Build a labelled matrix, checking shape and symmetry.
    pub fn new(labels: Vec<String>, rows: Vec<Vec<Decimal>>) -> AllocationResult<Self> {
        let n = labels.len();
        if n == 0 {
            return Err(AllocationError::InputShape {
                field: "covariance_matrix".into(),
                reason: "At least one row required".into(),
            });
        }
        validate_shape(&rows, n)?;
        Ok(Self { labels, rows })
    }

    /// Build a matrix whose labels are the row indices.
    pub fn from_rows(rows: Vec<Vec<Decimal>>) -> AllocationResult<Self> {
        let labels = (0..rows.len()).map(|i| i.to_string()).collect();
        Self::new(labels, rows)
    }

    pub fn dim(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, i: usize, j: usize) -> Decimal {
        self.rows[i][j]
    }

    pub fn diagonal(&self) -> Vec<Decimal> {
        (0..self.dim()).map(|i| self.rows[i][i]).collect()
    }

    /// Per-label volatility, sqrt of the diagonal.
    pub fn volatilities(&self) -> Vec<Decimal> {
        self.diagonal().into_iter().map(sqrt_decimal).collect()
    }

    /// Sigma * w.
    pub fn mat_vec(&self, v: &[Decimal]) -> Vec<Decimal> {
        self.rows.iter().map(|row| vec_dot(row, v)).collect()
    }

    /// Portfolio variance: w' * Sigma * w.
    pub fn portfolio_variance(&self, weights: &[Weight]) -> Decimal {
        vec_dot(weights, &self.mat_vec(weights))
    }

    /// Fractional risk contributions: w_i * (Sigma w)_i / (w' Sigma w).
    pub fn risk_contributions(&self, weights: &[Weight]) -> AllocationResult<Vec<Decimal>> {
        if weights.len() != self.dim() {
            return Err(AllocationError::InputShape {
                field: "weights".into(),
                reason: format!("Expected {} weights, got {}", self.dim(), weights.len()),
            });
        }
        let sigma_w = self.mat_vec(weights);
        let variance = vec_dot(weights, &sigma_w);
        if variance <= Decimal::ZERO {
            return Err(AllocationError::SingularInput {
                context: "risk_contributions".into(),
                reason: "Portfolio variance is zero; risk contributions are undefined".into(),
            });
        }
        Ok(weights
            .iter()
            .zip(sigma_w.iter())
            .map(|(w, sw)| *w * *sw / variance)
            .collect())
    }

    /// Verify every variance is strictly positive and the matrix is positive
    /// semi-definite, via an LDL' factorisation that tolerates zero pivots.
    ///
    /// Rank-deficient matrices (e.g. perfectly correlated instruments) pass;
    /// a negative pivot, or a zero pivot with a non-zero residual in its column,
    /// does not.
    #[allow(clippy::needless_range_loop)]
    pub fn check_positive_semidefinite(&self) -> AllocationResult<()> {
        let n = self.dim();
        self.check_variances()?;

        let max_var = self
            .diagonal()
            .into_iter()
            .fold(Decimal::ZERO, |acc, v| acc.max(v));
        let tol = max_var * PIVOT_TOLERANCE;

        let mut l = vec![vec![Decimal::ZERO; n]; n];
        let mut d = vec![Decimal::ZERO; n];

        for k in 0..n {
            let mut pivot = self.rows[k][k];
            for j in 0..k {
                pivot -= l[k][j] * l[k][j] * d[j];
            }
            if pivot < -tol {
                return Err(AllocationError::SingularInput {
                    context: "covariance_matrix".into(),
                    reason: format!(
                        "Matrix is not positive semi-definite (negative pivot {} at '{}')",
                        pivot, self.labels[k]
                    ),
                });
            }
            let zero_pivot = pivot <= tol;
            d[k] = if zero_pivot { Decimal::ZERO } else { pivot };

            for i in (k + 1)..n {
                let mut residual = self.rows[i][k];
                for j in 0..k {
                    residual -= l[i][j] * l[k][j] * d[j];
                }
                if zero_pivot {
                    if residual.abs() > tol {
                        return Err(AllocationError::SingularInput {
                            context: "covariance_matrix".into(),
                            reason: format!(
                                "Matrix is not positive semi-definite ('{}' is collinear with earlier rows but '{}' is not)",
                                self.labels[k], self.labels[i]
                            ),
                        });
                    }
                } else {
                    l[i][k] = residual / d[k];
                }
            }
        }
        Ok(())
    }
}

impl CovarianceMatrix {
    /// The matrix divided by its largest variance, together with that variance.
    ///
    /// Risk contributions do not change under positive scaling, and on the
    /// scaled matrix every entry of a valid covariance lies in [-1, 1], so the
    /// solver's products stay far inside `Decimal`'s range.
    pub fn normalised(&self) -> AllocationResult<(CovarianceMatrix, Decimal)> {
        self.check_variances()?;
        let scale = self
            .diagonal()
            .into_iter()
            .fold(Decimal::ZERO, |acc, v| acc.max(v));

        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| {
                        v.checked_div(scale).ok_or_else(|| AllocationError::InvalidInput {
                            field: "covariance_matrix".into(),
                            reason: format!(
                                "cov[{}][{}]={} cannot be scaled by the largest variance {}",
                                i, j, v, scale
                            ),
                        })
                    })
                    .collect::<AllocationResult<Vec<Decimal>>>()
            })
            .collect::<AllocationResult<Vec<Vec<Decimal>>>>()?;

        Ok((
            CovarianceMatrix {
                labels: self.labels.clone(),
                rows,
            },
            scale,
        ))
    }

    fn check_variances(&self) -> AllocationResult<()> {
        for (i, var) in self.diagonal().iter().enumerate() {
            if *var <= Decimal::ZERO {
                return Err(AllocationError::SingularInput {
                    context: format!("covariance_matrix[{}]", self.labels[i]),
                    reason: format!("Variance must be positive, got {}", var),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Dot product of two vectors.
pub(crate) fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Square root that maps non-positive input to zero.
pub(crate) fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

#[allow(clippy::needless_range_loop)]
fn validate_shape(rows: &[Vec<Decimal>], n: usize) -> AllocationResult<()> {
    if rows.len() != n {
        return Err(AllocationError::InputShape {
            field: "covariance_matrix".into(),
            reason: format!("Expected {}x{} matrix but got {} rows", n, n, rows.len()),
        });
    }
    for (i, row) in rows.iter().enumerate() {
        if row.len() != n {
            return Err(AllocationError::InputShape {
                field: "covariance_matrix".into(),
                reason: format!("Row {} has {} columns, expected {}", i, row.len(), n),
            });
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if (rows[i][j] - rows[j][i]).abs() > SYMMETRY_TOLERANCE {
                return Err(AllocationError::InputShape {
                    field: "covariance_matrix".into(),
                    reason: format!(
                        "Matrix is not symmetric: cov[{}][{}]={} != cov[{}][{}]={}",
                        i, j, rows[i][j], j, i, rows[j][i]
                    ),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
