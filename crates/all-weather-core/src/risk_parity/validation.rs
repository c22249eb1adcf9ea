use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::budget::RiskBudget;
use crate::error::AllocationError;
use crate::AllocationResult;

/// How solved risk contributions are compared with their budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// max |contribution - budget| < tolerance
    #[default]
    AbsoluteTolerance,
    /// Both vectors rounded (half to even) to `decimal_places` must be equal.
    /// Discontinuous at rounding boundaries; kept for reproducing legacy runs.
    RoundedEquality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
}

fn default_tolerance() -> Decimal {
    dec!(0.005)
}

fn default_decimal_places() -> u32 {
    2
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            tolerance: default_tolerance(),
            decimal_places: default_decimal_places(),
        }
    }
}

/// Post-solve check that contributions match the budget. A failure is fatal
/// for the whole allocation, even when the solver reported convergence.
#[derive(Debug, Clone, Default)]
pub struct ValidationGuard {
    config: ValidationConfig,
}

impl ValidationGuard {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// True when every contribution matches its budget entry.
    pub fn validate(&self, contributions: &[Decimal], budget: &[Decimal]) -> bool {
        contributions.len() == budget.len() && self.first_mismatch(contributions, budget).is_none()
    }

    /// Like [`validate`](Self::validate), but reports the offending component.
    pub fn enforce(
        &self,
        context: &str,
        contributions: &[Decimal],
        budget: &RiskBudget,
    ) -> AllocationResult<()> {
        let budget = budget.as_slice();
        if contributions.len() != budget.len() {
            return Err(AllocationError::InputShape {
                field: format!("{} risk_contributions", context),
                reason: format!(
                    "Expected {} contributions, got {}",
                    budget.len(),
                    contributions.len()
                ),
            });
        }
        match self.first_mismatch(contributions, budget) {
            None => Ok(()),
            Some(index) => Err(AllocationError::ValidationMismatch {
                context: context.to_string(),
                index,
                contribution: contributions[index],
                budget: budget[index],
                tolerance: self.effective_tolerance(),
            }),
        }
    }

    fn first_mismatch(&self, contributions: &[Decimal], budget: &[Decimal]) -> Option<usize> {
        match self.config.mode {
            ValidationMode::AbsoluteTolerance => {
                // Report the worst component rather than the first one over the line
                let (index, deviation) = contributions
                    .iter()
                    .zip(budget.iter())
                    .map(|(c, b)| (*c - *b).abs())
                    .enumerate()
                    .max_by(|a, b| a.1.cmp(&b.1))?;
                (deviation >= self.config.tolerance).then_some(index)
            }
            ValidationMode::RoundedEquality => {
                let dp = self.config.decimal_places;
                contributions.iter().zip(budget.iter()).position(|(c, b)| {
                    round_half_even(*c, dp) != round_half_even(*b, dp)
                })
            }
        }
    }

    fn effective_tolerance(&self) -> Decimal {
        match self.config.mode {
            ValidationMode::AbsoluteTolerance => self.config.tolerance,
            ValidationMode::RoundedEquality => {
                Decimal::new(5, self.config.decimal_places + 1)
            }
        }
    }
}

fn round_half_even(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}
