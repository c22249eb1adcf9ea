use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::AllocationError;
use crate::risk_parity::{SolverConfig, ValidationConfig};
use crate::types::Ticker;
use crate::AllocationResult;

/// A named economic-environment bucket and its member tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub tickers: Vec<Ticker>,
    /// Risk budget over `tickers`; uniform when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_budget: Option<Vec<Decimal>>,
}

impl Environment {
    pub fn new(name: impl Into<String>, tickers: Vec<Ticker>) -> Self {
        Self {
            name: name.into(),
            tickers,
            risk_budget: None,
        }
    }
}

/// Everything one allocation run needs besides the return data.
///
/// Built once by the caller and passed by reference into the allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Environments in output order
    pub environments: Vec<Environment>,
    /// Risk budget across environments; uniform when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_budget: Option<Vec<Decimal>>,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Solve the within-environment layer on worker threads
    #[serde(default)]
    pub parallel: bool,
}

impl AllocationConfig {
    pub fn new(environments: Vec<Environment>) -> Self {
        Self {
            environments,
            environment_budget: None,
            solver: SolverConfig::default(),
            validation: ValidationConfig::default(),
            parallel: false,
        }
    }

    /// Check environment membership before any data is touched.
    pub fn validate(&self) -> AllocationResult<()> {
        if self.environments.is_empty() {
            return Err(AllocationError::InputShape {
                field: "environments".into(),
                reason: "At least one environment required".into(),
            });
        }

        let mut names = HashSet::with_capacity(self.environments.len());
        for env in &self.environments {
            if !names.insert(env.name.as_str()) {
                return Err(AllocationError::InputShape {
                    field: "environments".into(),
                    reason: format!("Environment '{}' is defined more than once", env.name),
                });
            }
            if env.tickers.is_empty() {
                return Err(AllocationError::InputShape {
                    field: format!("environments.{}", env.name),
                    reason: "An environment needs at least one ticker".into(),
                });
            }
            let mut members = HashSet::with_capacity(env.tickers.len());
            for ticker in &env.tickers {
                if !members.insert(ticker.as_str()) {
                    return Err(AllocationError::InputShape {
                        field: format!("environments.{}", env.name),
                        reason: format!("Ticker '{}' is listed more than once", ticker),
                    });
                }
            }
            if let Some(budget) = &env.risk_budget {
                if budget.len() != env.tickers.len() {
                    return Err(AllocationError::InputShape {
                        field: format!("environments.{}.risk_budget", env.name),
                        reason: format!(
                            "Expected {} entries (one per ticker), got {}",
                            env.tickers.len(),
                            budget.len()
                        ),
                    });
                }
            }
        }

        if let Some(budget) = &self.environment_budget {
            if budget.len() != self.environments.len() {
                return Err(AllocationError::InputShape {
                    field: "environment_budget".into(),
                    reason: format!(
                        "Expected {} entries (one per environment), got {}",
                        self.environments.len(),
                        budget.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Distinct tickers across all environments, sorted.
    pub fn tickers(&self) -> Vec<Ticker> {
        self.environments
            .iter()
            .flat_map(|e| e.tickers.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.iter().map(|e| e.name.clone()).collect()
    }
}
