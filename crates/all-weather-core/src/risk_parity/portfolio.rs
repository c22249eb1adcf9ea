use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::budget::RiskBudget;
use super::matrix::CovarianceMatrix;
use super::solver::{RiskParitySolver, SolverConfig};
use super::validation::{ValidationConfig, ValidationGuard};
use crate::error::AllocationError;
use crate::types::{with_metadata, ComputationOutput, Weight};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input for a single risk-budgeting solve on an explicit covariance matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParityInput {
    /// Asset names, in covariance-matrix order
    pub assets: Vec<String>,
    /// NxN covariance matrix (row-major)
    pub covariance_matrix: Vec<Vec<Decimal>>,
    /// Target risk contributions; uniform when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_budget: Option<Vec<Decimal>>,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// A single asset weight in the optimal portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetAllocation {
    pub name: String,
    pub weight: Weight,
    /// Fraction of portfolio variance attributable to this asset
    pub risk_contribution: Decimal,
    pub risk_budget: Decimal,
    /// (Sigma * w)_i / sigma_p
    pub marginal_risk: Decimal,
}

/// Output of the risk-parity optimiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParityOutput {
    pub allocations: Vec<AssetAllocation>,
    pub portfolio_volatility: Decimal,
    /// Weighted-average vol / portfolio vol
    pub diversification_ratio: Decimal,
    /// Herfindahl-based effective number of assets: 1 / sum(w_i^2)
    pub effective_num_assets: Decimal,
    pub iterations: u32,
    pub max_deviation: Decimal,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Solve, validate and describe a risk-budgeted portfolio.
pub fn design_risk_parity(
    input: &RiskParityInput,
) -> AllocationResult<ComputationOutput<RiskParityOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = input.assets.len();
    if n == 0 {
        return Err(AllocationError::InputShape {
            field: "assets".into(),
            reason: "At least one asset required".into(),
        });
    }

    let cov = CovarianceMatrix::new(input.assets.clone(), input.covariance_matrix.clone())?;
    let budget = RiskBudget::custom_or_uniform(input.risk_budget.as_deref(), n)?;
    let solution = RiskParitySolver::new(input.solver.clone()).solve(&cov, &budget)?;
    ValidationGuard::new(input.validation.clone()).enforce(
        "risk_parity",
        &solution.risk_contributions,
        &budget,
    )?;

    let weights = &solution.weights;
    let port_vol = solution.portfolio_volatility;
    let sigma_w = cov.mat_vec(weights);
    let vols = cov.volatilities();

    let weighted_avg_vol: Decimal = weights.iter().zip(vols.iter()).map(|(w, v)| *w * *v).sum();
    let diversification_ratio = if port_vol.is_zero() {
        Decimal::ONE
    } else {
        weighted_avg_vol / port_vol
    };

    let hhi: Decimal = weights.iter().map(|w| *w * *w).sum();
    let effective_num_assets = if hhi.is_zero() {
        Decimal::ZERO
    } else {
        Decimal::ONE / hhi
    };

    let allocations: Vec<AssetAllocation> = (0..n)
        .map(|i| AssetAllocation {
            name: input.assets[i].clone(),
            weight: weights[i],
            risk_contribution: solution.risk_contributions[i],
            risk_budget: budget.as_slice()[i],
            marginal_risk: if port_vol.is_zero() {
                Decimal::ZERO
            } else {
                sigma_w[i] / port_vol
            },
        })
        .collect();

    for alloc in &allocations {
        if alloc.weight > dec!(0.50) {
            warnings.push(format!(
                "Concentrated position: {} has weight {:.2}%",
                alloc.name,
                alloc.weight * dec!(100)
            ));
        }
    }

    let output = RiskParityOutput {
        allocations,
        portfolio_volatility: port_vol,
        diversification_ratio,
        effective_num_assets,
        iterations: solution.iterations,
        max_deviation: solution.max_deviation,
    };

    let budget_kind = if input.risk_budget.is_some() {
        "custom"
    } else {
        "uniform"
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Risk Budgeting (cyclical coordinate descent)",
        &serde_json::json!({
            "num_assets": n,
            "budget": budget_kind,
            "solver_tolerance": input.solver.tolerance.to_string(),
            "validation_mode": input.validation.mode,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn two_asset_input(vol1: Decimal, vol2: Decimal, corr: Decimal) -> RiskParityInput {
        let cov12 = corr * vol1 * vol2;
        RiskParityInput {
            assets: vec!["A".into(), "B".into()],
            covariance_matrix: vec![vec![vol1 * vol1, cov12], vec![cov12, vol2 * vol2]],
            risk_budget: None,
            solver: SolverConfig::default(),
            validation: ValidationConfig::default(),
        }
    }

    #[test]
    fn test_equal_vols_give_equal_weights() {
        let input = two_asset_input(dec!(0.20), dec!(0.20), dec!(0.5));
        let result = design_risk_parity(&input).unwrap();
        let a = &result.result.allocations;
        assert!((a[0].weight - a[1].weight).abs() < dec!(0.0001));
    }

    #[test]
    fn test_two_assets_inverse_vol() {
        // With two assets risk parity is inverse volatility whatever the correlation
        let input = two_asset_input(dec!(0.20), dec!(0.10), dec!(0.3));
        let result = design_risk_parity(&input).unwrap();
        let a = &result.result.allocations;
        assert!((a[0].weight - Decimal::ONE / dec!(3)).abs() < dec!(0.0001));
        assert!((a[1].weight - dec!(2) / dec!(3)).abs() < dec!(0.0001));
        assert!(result.warnings.iter().any(|w| w.contains("Concentrated")));
    }

    #[test]
    fn test_metrics() {
        let input = two_asset_input(dec!(0.15), dec!(0.10), dec!(0.2));
        let out = design_risk_parity(&input).unwrap().result;
        assert!(out.diversification_ratio >= dec!(0.99));
        assert!(out.effective_num_assets > Decimal::ONE);
        assert!(out.effective_num_assets <= dec!(2));
        assert!(out.portfolio_volatility > Decimal::ZERO);
    }

    #[test]
    fn test_large_covariance_entries() {
        // Variances of 1e16 and 4e16
        let input = two_asset_input(dec!(100000000), dec!(200000000), dec!(0.25));
        let out = design_risk_parity(&input).unwrap().result;
        let a = &out.allocations;
        assert!((a[0].weight - dec!(2) / dec!(3)).abs() < dec!(0.0001));
        assert!((a[1].weight - Decimal::ONE / dec!(3)).abs() < dec!(0.0001));
        assert!(out.portfolio_volatility > dec!(100000000) / dec!(2));
        assert!(out.diversification_ratio >= Decimal::ONE);
    }

    #[test]
    fn test_zero_budget_entry_rejected() {
        let mut input = two_asset_input(dec!(0.15), dec!(0.10), dec!(0.2));
        input.risk_budget = Some(vec![Decimal::ONE, Decimal::ZERO]);
        let err = design_risk_parity(&input).unwrap_err();
        assert!(matches!(err, AllocationError::SingularInput { .. }));
    }

    #[test]
    fn test_empty_assets() {
        let input = RiskParityInput {
            assets: vec![],
            covariance_matrix: vec![],
            risk_budget: None,
            solver: SolverConfig::default(),
            validation: ValidationConfig::default(),
        };
        assert!(matches!(
            design_risk_parity(&input),
            Err(AllocationError::InputShape { .. })
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let input: RiskParityInput = serde_json::from_str(
            r#"{
                "assets": ["A", "B"],
                "covariance_matrix": [["1", "0"], ["0", "4"]]
            }"#,
        )
        .unwrap();
        let out = design_risk_parity(&input).unwrap().result;
        assert!((out.allocations[0].weight - dec!(2) / dec!(3)).abs() < dec!(0.0001));
    }
}
