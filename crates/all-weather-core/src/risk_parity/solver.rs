use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::budget::RiskBudget;
use super::matrix::{sqrt_decimal, vec_dot, CovarianceMatrix};
use crate::error::AllocationError;
use crate::types::Weight;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Stopping rules for the coordinate-descent solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum |risk contribution - budget| accepted as converged
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    /// Number of full coordinate passes before giving up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_tolerance() -> Decimal {
    dec!(0.000001)
}

fn default_max_iterations() -> u32 {
    10_000
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Converged long-only, fully invested risk-parity portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParitySolution {
    /// Non-negative weights summing to one, in matrix order
    pub weights: Vec<Weight>,
    /// Fractional risk contributions implied by `weights`
    pub risk_contributions: Vec<Decimal>,
    /// Full coordinate passes performed
    pub iterations: u32,
    /// Largest |risk contribution - budget| at exit
    pub max_deviation: Decimal,
    /// sqrt(w' Sigma w)
    pub portfolio_volatility: Decimal,
}

/// Risk-budgeting solver.
///
/// Minimises `sqrt(x' Sigma x) - sum(b_i ln x_i)` over the positive orthant by
/// cyclical coordinate descent. At the optimum `x_i (Sigma x)_i = b_i sqrt(x' Sigma x)`,
/// so the normalised `w = x / sum(x)` has risk contributions equal to `b`.
/// Each coordinate step is the positive root of
/// `Sigma_ii x_i^2 + c_i x_i - b_i * sigma(x) = 0` with `c_i = sum_{j != i} Sigma_ij x_j`.
#[derive(Debug, Clone, Default)]
pub struct RiskParitySolver {
    config: SolverConfig,
}

impl RiskParitySolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Solve for weights whose risk contributions match `budget`.
    pub fn solve(
        &self,
        cov: &CovarianceMatrix,
        budget: &RiskBudget,
    ) -> AllocationResult<RiskParitySolution> {
        let n = cov.dim();
        if budget.len() != n {
            return Err(AllocationError::InputShape {
                field: "risk_budget".into(),
                reason: format!(
                    "Budget has {} entries but the covariance matrix is {}x{}",
                    budget.len(),
                    n,
                    n
                ),
            });
        }
        if self.config.tolerance <= Decimal::ZERO || self.config.max_iterations == 0 {
            return Err(AllocationError::InvalidInput {
                field: "solver".into(),
                reason: "tolerance and max_iterations must be positive".into(),
            });
        }
        // Solve on the matrix scaled to unit largest variance; the weights are
        // unchanged and only the volatility needs the scale put back.
        let (cov, scale) = cov.normalised()?;
        cov.check_positive_semidefinite()?;

        let b = budget.as_slice();
        let diag = cov.diagonal();
        let two = dec!(2);
        let four = dec!(4);

        let mut x = vec![Decimal::ONE / Decimal::from(n as u64); n];
        let mut sigma_x = cov.mat_vec(&x);
        let mut last_delta = Decimal::MAX;

        for iteration in 1..=self.config.max_iterations {
            for i in 0..n {
                let variance = vec_dot(&x, &sigma_x);
                if variance <= Decimal::ZERO {
                    return Err(zero_variance());
                }
                let vol = variance.sqrt().ok_or_else(zero_variance)?;

                let c = sigma_x[i] - diag[i] * x[i];
                let b_vol = b[i] * vol;
                let root = (c * c + four * diag[i] * b_vol)
                    .sqrt()
                    .ok_or_else(zero_variance)?;
                // Pick the cancellation-free form of the positive root.
                let updated = if c >= Decimal::ZERO {
                    two * b_vol / (root + c)
                } else {
                    (root - c) / (two * diag[i])
                };

                let delta = updated - x[i];
                if !delta.is_zero() {
                    for (k, s) in sigma_x.iter_mut().enumerate() {
                        *s += cov.get(k, i) * delta;
                    }
                    x[i] = updated;
                }
            }

            let weights = normalise(&x)?;
            let risk_contributions = cov.risk_contributions(&weights)?;
            last_delta = max_abs_deviation(&risk_contributions, b);

            if last_delta < self.config.tolerance {
                let portfolio_volatility =
                    sqrt_decimal(cov.portfolio_variance(&weights)) * sqrt_decimal(scale);
                debug!(
                    assets = n,
                    iterations = iteration,
                    max_deviation = %last_delta,
                    "risk parity solver converged"
                );
                return Ok(RiskParitySolution {
                    weights,
                    risk_contributions,
                    iterations: iteration,
                    max_deviation: last_delta,
                    portfolio_volatility,
                });
            }
        }

        Err(AllocationError::ConvergenceFailure {
            function: "risk_parity_coordinate_descent".into(),
            iterations: self.config.max_iterations,
            last_delta,
        })
    }
}

/// Largest absolute elementwise difference.
pub fn max_abs_deviation(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x - *y).abs())
        .fold(Decimal::ZERO, |acc, d| acc.max(d))
}

fn normalise(x: &[Decimal]) -> AllocationResult<Vec<Weight>> {
    let total: Decimal = x.iter().sum();
    if total <= Decimal::ZERO {
        return Err(zero_variance());
    }
    Ok(x.iter().map(|v| *v / total).collect())
}

fn zero_variance() -> AllocationError {
    AllocationError::SingularInput {
        context: "risk_parity_solver".into(),
        reason: "Long-only portfolio variance vanished; the covariance matrix admits a riskless combination"
            .into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
