use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::AllocationResult;

/// Allowed distance of a custom budget's total from one.
const BUDGET_SUM_TOLERANCE: Decimal = dec!(0.000001);

/// Target fractional risk contribution per index, in matrix order.
///
/// Entries are strictly positive and sum to one. A zero entry could only be
/// met by a zero weight, so it is rejected rather than silently honoured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Decimal>", into = "Vec<Decimal>")]
pub struct RiskBudget(Vec<Decimal>);

impl RiskBudget {
    /// Equal risk contribution across `n` indices (true risk parity).
    pub fn uniform(n: usize) -> AllocationResult<Self> {
        if n == 0 {
            return Err(AllocationError::InputShape {
                field: "risk_budget".into(),
                reason: "A risk budget needs at least one entry".into(),
            });
        }
        let share = Decimal::ONE / Decimal::from(n as u64);
        Ok(Self(vec![share; n]))
    }

    /// Custom budget; every entry must be positive and the total must be one.
    pub fn new(values: Vec<Decimal>) -> AllocationResult<Self> {
        if values.is_empty() {
            return Err(AllocationError::InputShape {
                field: "risk_budget".into(),
                reason: "A risk budget needs at least one entry".into(),
            });
        }
        if let Some((i, b)) = values.iter().enumerate().find(|(_, b)| **b <= Decimal::ZERO) {
            return Err(AllocationError::SingularInput {
                context: format!("risk_budget[{}]", i),
                reason: format!("Budget entries must be strictly positive, got {}", b),
            });
        }
        let total: Decimal = values.iter().sum();
        if (total - Decimal::ONE).abs() > BUDGET_SUM_TOLERANCE {
            return Err(AllocationError::InvalidInput {
                field: "risk_budget".into(),
                reason: format!("Budget entries must sum to 1, got {}", total),
            });
        }
        Ok(Self(values))
    }

    /// Use `custom` when given, otherwise a uniform budget over `n` indices.
    pub fn custom_or_uniform(custom: Option<&[Decimal]>, n: usize) -> AllocationResult<Self> {
        let budget = match custom {
            Some(values) => Self::new(values.to_vec())?,
            None => Self::uniform(n)?,
        };
        if budget.len() != n {
            return Err(AllocationError::InputShape {
                field: "risk_budget".into(),
                reason: format!("Expected {} entries, got {}", n, budget.len()),
            });
        }
        Ok(budget)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Decimal] {
        &self.0
    }
}

impl TryFrom<Vec<Decimal>> for RiskBudget {
    type Error = AllocationError;

    fn try_from(values: Vec<Decimal>) -> AllocationResult<Self> {
        Self::new(values)
    }
}

impl From<RiskBudget> for Vec<Decimal> {
    fn from(budget: RiskBudget) -> Self {
        budget.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_uniform_budget() {
        let budget = RiskBudget::uniform(4).unwrap();
        assert_eq!(budget.as_slice(), &[dec!(0.25); 4]);
        assert!(RiskBudget::uniform(0).is_err());
    }

    #[test]
    fn test_custom_budget() {
        let budget = RiskBudget::new(vec![dec!(0.7), dec!(0.3)]).unwrap();
        assert_eq!(budget.len(), 2);
    }

    #[test]
    fn test_zero_entry_is_singular() {
        let err = RiskBudget::new(vec![dec!(1), Decimal::ZERO]).unwrap_err();
        assert!(matches!(err, AllocationError::SingularInput { .. }));
    }

    #[test]
    fn test_negative_entry_is_singular() {
        let err = RiskBudget::new(vec![dec!(1.2), dec!(-0.2)]).unwrap_err();
        assert!(matches!(err, AllocationError::SingularInput { .. }));
    }

    #[test]
    fn test_sum_must_be_one() {
        let err = RiskBudget::new(vec![dec!(0.5), dec!(0.4)]).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidInput { .. }));
    }

    #[test]
    fn test_custom_or_uniform_shape() {
        let custom = [dec!(0.5), dec!(0.5)];
        let err = RiskBudget::custom_or_uniform(Some(&custom), 3).unwrap_err();
        assert!(matches!(err, AllocationError::InputShape { .. }));
        let uniform = RiskBudget::custom_or_uniform(None, 3).unwrap();
        assert_eq!(uniform.len(), 3);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: RiskBudget = serde_json::from_str(r#"["0.6", "0.4"]"#).unwrap();
        assert_eq!(ok.as_slice(), &[dec!(0.6), dec!(0.4)]);
        assert!(serde_json::from_str::<RiskBudget>(r#"["0.6", "0"]"#).is_err());
    }
}
