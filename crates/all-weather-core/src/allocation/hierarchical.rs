use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{info, warn};

use super::config::{AllocationConfig, Environment};
use crate::error::AllocationError;
use crate::returns::covariance::sample_covariance;
use crate::returns::panel::{simple_to_log, weighted_sum, ReturnPanel};
use crate::risk_parity::{RiskBudget, RiskParitySolver, ValidationGuard};
use crate::types::{with_metadata, ComputationOutput, Rate, Ticker, Weight};
use crate::AllocationResult;

const BETWEEN_LAYER: &str = "between-environment";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One row of the within-environment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithinEnvironmentWeight {
    pub environment: String,
    pub ticker: Ticker,
    pub weight: Weight,
    pub risk_contribution: Decimal,
}

/// One row of the between-environment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetweenEnvironmentWeight {
    pub environment: String,
    pub weight: Weight,
    pub risk_contribution: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalTickerWeight {
    pub ticker: Ticker,
    pub weight: Weight,
}

/// Per-date returns of each environment's within-weighted portfolio.
/// Panel columns are named after the environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentReturns {
    pub simple: ReturnPanel,
    pub log: ReturnPanel,
}

/// Everything produced by one hierarchical allocation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutput {
    pub within_environment: Vec<WithinEnvironmentWeight>,
    pub between_environments: Vec<BetweenEnvironmentWeight>,
    /// Sorted by ticker, sums to one
    pub final_weights: Vec<FinalTickerWeight>,
    pub environment_returns: EnvironmentReturns,
}

/// Solved weights for one environment, in the environment's ticker order.
#[derive(Debug, Clone)]
struct EnvironmentSolution {
    weights: Vec<Weight>,
    risk_contributions: Vec<Decimal>,
}

/// Two-level risk-parity allocator.
///
/// Step 1 solves each environment over its own tickers, step 2 turns those
/// weights into one return stream per environment, step 3 solves across the
/// environment streams and step 4 multiplies the two layers back down to
/// per-ticker weights.
pub struct HierarchicalAllocator<'a> {
    config: &'a AllocationConfig,
    solver: RiskParitySolver,
    guard: ValidationGuard,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl<'a> HierarchicalAllocator<'a> {
    pub fn new(config: &'a AllocationConfig) -> Self {
        Self {
            config,
            solver: RiskParitySolver::new(config.solver.clone()),
            guard: ValidationGuard::new(config.validation.clone()),
        }
    }

    /// Run all four steps on a log-return panel. Nothing is returned unless
    /// every solve and every validation succeeds.
    pub fn allocate(
        &self,
        log_returns: &ReturnPanel,
    ) -> AllocationResult<ComputationOutput<AllocationOutput>> {
        let start = Instant::now();
        let mut warnings: Vec<String> = Vec::new();

        self.config.validate()?;
        if log_returns.is_empty() {
            return Err(AllocationError::InputShape {
                field: "log_returns".into(),
                reason: "The return panel has no observations".into(),
            });
        }

        let solutions = self.solve_environments(log_returns)?;
        let within_environment = within_rows(&self.config.environments, &solutions);
        info!(
            environments = self.config.environments.len(),
            observations = log_returns.len(),
            "within-environment weights solved"
        );

        let environment_returns = self.environment_returns(log_returns, &solutions)?;

        let between_environments = self
            .solve_between(&environment_returns.log)
            .map_err(|e| e.in_layer(BETWEEN_LAYER))?;
        info!(
            environments = between_environments.len(),
            "between-environment weights solved"
        );

        let final_weights = combine_weights(&within_environment, &between_environments)?;

        for env in &self.config.environments {
            if env.tickers.len() == 1 {
                warnings.push(format!(
                    "Environment '{}' holds a single ticker; its within-environment weight is 1",
                    env.name
                ));
            }
            if log_returns.len() <= env.tickers.len() {
                warnings.push(format!(
                    "Environment '{}' has {} tickers but only {} observations; its covariance estimate is rank deficient",
                    env.name,
                    env.tickers.len(),
                    log_returns.len()
                ));
            }
        }
        for fw in &final_weights {
            if fw.weight > dec!(0.50) {
                warn!(ticker = %fw.ticker, weight = %fw.weight, "concentrated final weight");
                warnings.push(format!(
                    "Concentrated position: {} has final weight {:.2}%",
                    fw.ticker,
                    fw.weight * dec!(100)
                ));
            }
        }

        let output = AllocationOutput {
            within_environment,
            between_environments,
            final_weights,
            environment_returns,
        };

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Hierarchical Risk Parity (within- and between-environment risk budgeting)",
            &serde_json::json!({
                "environments": self.config.environment_names(),
                "observations": log_returns.len(),
                "covariance": "sample (n-1) on daily log returns",
                "environment_returns": "sum of within weights times simple returns, converted back to log",
                "solver_tolerance": self.config.solver.tolerance.to_string(),
                "validation_mode": self.config.validation.mode,
                "parallel": self.config.parallel,
            }),
            warnings,
            elapsed,
            output,
        ))
    }

    // Step 1

    fn solve_environments(
        &self,
        log_returns: &ReturnPanel,
    ) -> AllocationResult<Vec<EnvironmentSolution>> {
        let environments = &self.config.environments;
        if self.config.parallel {
            // Indexed collect keeps configuration order
            environments
                .par_iter()
                .map(|env| self.solve_environment(env, log_returns))
                .collect()
        } else {
            environments
                .iter()
                .map(|env| self.solve_environment(env, log_returns))
                .collect()
        }
    }

    fn solve_environment(
        &self,
        env: &Environment,
        log_returns: &ReturnPanel,
    ) -> AllocationResult<EnvironmentSolution> {
        let layer = format!("within-environment '{}'", env.name);
        let columns = log_returns
            .select(&env.tickers)
            .map_err(|e| e.in_layer(layer.as_str()))?;
        let cov = sample_covariance(env.tickers.clone(), &columns)
            .map_err(|e| e.in_layer(layer.as_str()))?;
        let budget = RiskBudget::custom_or_uniform(env.risk_budget.as_deref(), env.tickers.len())
            .map_err(|e| e.in_layer(layer.as_str()))?;
        let solution = self
            .solver
            .solve(&cov, &budget)
            .map_err(|e| e.in_layer(layer.as_str()))?;
        self.guard
            .enforce(&layer, &solution.risk_contributions, &budget)
            .map_err(|e| e.in_layer(layer.as_str()))?;

        Ok(EnvironmentSolution {
            weights: solution.weights,
            risk_contributions: solution.risk_contributions,
        })
    }

    // Step 2

    fn environment_returns(
        &self,
        log_returns: &ReturnPanel,
        solutions: &[EnvironmentSolution],
    ) -> AllocationResult<EnvironmentReturns> {
        let simple_panel = log_returns.to_simple()?;
        let mut simple_columns = Vec::with_capacity(solutions.len());
        let mut log_columns = Vec::with_capacity(solutions.len());

        for (env, solution) in self.config.environments.iter().zip(solutions) {
            let layer = format!("environment returns '{}'", env.name);
            let columns = simple_panel
                .select(&env.tickers)
                .map_err(|e| e.in_layer(layer.as_str()))?;
            let simple = weighted_sum(&columns, &solution.weights)
                .map_err(|e| e.in_layer(layer.as_str()))?;
            let log = simple
                .iter()
                .map(|s| simple_to_log(*s))
                .collect::<AllocationResult<Vec<Rate>>>()
                .map_err(|e| e.in_layer(layer.as_str()))?;
            simple_columns.push(simple);
            log_columns.push(log);
        }

        let names = self.config.environment_names();
        let dates = log_returns.dates().to_vec();
        Ok(EnvironmentReturns {
            simple: ReturnPanel::new(dates.clone(), names.clone(), simple_columns)?,
            log: ReturnPanel::new(dates, names, log_columns)?,
        })
    }

    // Step 3

    fn solve_between(
        &self,
        environment_log_returns: &ReturnPanel,
    ) -> AllocationResult<Vec<BetweenEnvironmentWeight>> {
        let names = self.config.environment_names();
        let columns = environment_log_returns.select(&names)?;
        let cov = sample_covariance(names.clone(), &columns)?;
        let budget = RiskBudget::custom_or_uniform(
            self.config.environment_budget.as_deref(),
            names.len(),
        )?;
        let solution = self.solver.solve(&cov, &budget)?;
        self.guard
            .enforce(BETWEEN_LAYER, &solution.risk_contributions, &budget)?;

        Ok(names
            .into_iter()
            .zip(solution.weights)
            .zip(solution.risk_contributions)
            .map(|((environment, weight), risk_contribution)| BetweenEnvironmentWeight {
                environment,
                weight,
                risk_contribution,
            })
            .collect())
    }
}

// Step 4

/// Final weight of each ticker: the sum over every environment holding it of
/// within-weight times that environment's between-weight. Sorted by ticker.
pub fn combine_weights(
    within: &[WithinEnvironmentWeight],
    between: &[BetweenEnvironmentWeight],
) -> AllocationResult<Vec<FinalTickerWeight>> {
    let environment_weight: HashMap<&str, Weight> = between
        .iter()
        .map(|b| (b.environment.as_str(), b.weight))
        .collect();

    let mut totals: BTreeMap<&str, Weight> = BTreeMap::new();
    for row in within {
        let env_weight = environment_weight
            .get(row.environment.as_str())
            .ok_or_else(|| AllocationError::InputShape {
                field: "between_environments".into(),
                reason: format!("No between-environment weight for '{}'", row.environment),
            })?;
        *totals.entry(row.ticker.as_str()).or_insert(Decimal::ZERO) += row.weight * *env_weight;
    }

    Ok(totals
        .into_iter()
        .map(|(ticker, weight)| FinalTickerWeight {
            ticker: ticker.to_string(),
            weight,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn within_rows(
    environments: &[Environment],
    solutions: &[EnvironmentSolution],
) -> Vec<WithinEnvironmentWeight> {
    environments
        .iter()
        .zip(solutions)
        .flat_map(|(env, solution)| {
            env.tickers
                .iter()
                .zip(solution.weights.iter())
                .zip(solution.risk_contributions.iter())
                .map(|((ticker, weight), rc)| WithinEnvironmentWeight {
                    environment: env.name.clone(),
                    ticker: ticker.clone(),
                    weight: *weight,
                    risk_contribution: *rc,
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal_macros::dec;
    use statrs::distribution::Normal;

    use crate::allocation::config::Environment;
    use crate::risk_parity::{ValidationConfig, ValidationMode};

    const TICKERS: [&str; 5] = ["VTI", "TLT", "GLD", "DBC", "TIP"];

    /// Seeded synthetic log returns: a common factor plus ticker-specific noise
    /// scaled differently per ticker.
    fn synthetic_panel(days: usize, seed: u64) -> ReturnPanel {
        let mut rng = StdRng::seed_from_u64(seed);
        let factor = Normal::new(0.0, 0.01).unwrap();
        let noise = Normal::new(0.0, 0.01).unwrap();
        let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        let dates: Vec<NaiveDate> = (0..days).map(|i| start + Duration::days(i as i64)).collect();

        let loadings = [1.0, -0.3, 0.2, 0.6, 0.1];
        let scales = [1.5, 1.0, 1.2, 2.0, 0.4];
        let mut columns = vec![Vec::with_capacity(days); TICKERS.len()];
        for _ in 0..days {
            let f: f64 = rng.sample(factor);
            for (k, column) in columns.iter_mut().enumerate() {
                let e: f64 = rng.sample(noise);
                let r = loadings[k] * f + scales[k] * e;
                column.push(Decimal::from_f64(r).unwrap().round_dp(10));
            }
        }
        ReturnPanel::new(dates, TICKERS.iter().map(|t| t.to_string()).collect(), columns).unwrap()
    }

    fn all_weather_config() -> AllocationConfig {
        AllocationConfig::new(vec![
            Environment::new("RISING_GROWTH", vec!["VTI".into(), "DBC".into()]),
            Environment::new("FALLING_GROWTH", vec!["TLT".into(), "TIP".into()]),
            Environment::new("RISING_INFLATION", vec!["GLD".into(), "DBC".into(), "TIP".into()]),
            Environment::new("FALLING_INFLATION", vec!["VTI".into(), "TLT".into()]),
        ])
    }

    #[test]
    fn test_combine_shared_ticker() {
        let within = vec![
            WithinEnvironmentWeight {
                environment: "E1".into(),
                ticker: "T".into(),
                weight: dec!(0.5),
                risk_contribution: dec!(0.5),
            },
            WithinEnvironmentWeight {
                environment: "E1".into(),
                ticker: "U".into(),
                weight: dec!(0.5),
                risk_contribution: dec!(0.5),
            },
            WithinEnvironmentWeight {
                environment: "E2".into(),
                ticker: "T".into(),
                weight: dec!(0.4),
                risk_contribution: dec!(0.5),
            },
            WithinEnvironmentWeight {
                environment: "E2".into(),
                ticker: "A".into(),
                weight: dec!(0.6),
                risk_contribution: dec!(0.5),
            },
        ];
        let between = vec![
            BetweenEnvironmentWeight {
                environment: "E1".into(),
                weight: dec!(0.6),
                risk_contribution: dec!(0.5),
            },
            BetweenEnvironmentWeight {
                environment: "E2".into(),
                weight: dec!(0.4),
                risk_contribution: dec!(0.5),
            },
        ];
        let combined = combine_weights(&within, &between).unwrap();
        assert_eq!(
            combined,
            vec![
                FinalTickerWeight { ticker: "A".into(), weight: dec!(0.24) },
                FinalTickerWeight { ticker: "T".into(), weight: dec!(0.46) },
                FinalTickerWeight { ticker: "U".into(), weight: dec!(0.30) },
            ]
        );
    }

    #[test]
    fn test_combine_missing_environment() {
        let within = vec![WithinEnvironmentWeight {
            environment: "E1".into(),
            ticker: "T".into(),
            weight: Decimal::ONE,
            risk_contribution: Decimal::ONE,
        }];
        let err = combine_weights(&within, &[]).unwrap_err();
        assert!(matches!(err, AllocationError::InputShape { .. }));
    }

    #[test]
    fn test_full_allocation_conserves_weight() {
        let config = all_weather_config();
        let panel = synthetic_panel(250, 7);
        let out = HierarchicalAllocator::new(&config).allocate(&panel).unwrap();
        let result = &out.result;

        assert_eq!(result.within_environment.len(), 9);
        assert_eq!(result.between_environments.len(), 4);
        assert_eq!(
            result
                .final_weights
                .iter()
                .map(|f| f.ticker.as_str())
                .collect::<Vec<_>>(),
            vec!["DBC", "GLD", "TIP", "TLT", "VTI"]
        );

        let total: Decimal = result.final_weights.iter().map(|f| f.weight).sum();
        assert!((total - Decimal::ONE).abs() < dec!(0.0000001), "total = {}", total);

        for env in &config.environments {
            let env_total: Decimal = result
                .within_environment
                .iter()
                .filter(|r| r.environment == env.name)
                .map(|r| r.weight)
                .sum();
            assert!((env_total - Decimal::ONE).abs() < dec!(0.0000001));
        }
        for row in &result.between_environments {
            assert!((row.risk_contribution - dec!(0.25)).abs() < dec!(0.005));
            assert!(row.weight > Decimal::ZERO);
        }
    }

    #[test]
    fn test_environment_returns_follow_within_weights() {
        let config = all_weather_config();
        let panel = synthetic_panel(120, 11);
        let result = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap()
            .result;

        let returns = &result.environment_returns;
        assert_eq!(returns.simple.tickers(), config.environment_names().as_slice());
        assert_eq!(returns.simple.dates(), panel.dates());

        // Recompute the first day of RISING_GROWTH by hand
        let weights: Vec<&WithinEnvironmentWeight> = result
            .within_environment
            .iter()
            .filter(|r| r.environment == "RISING_GROWTH")
            .collect();
        let expected: Decimal = weights
            .iter()
            .map(|w| {
                let r = panel.column(&w.ticker).unwrap()[0];
                w.weight * crate::returns::panel::log_to_simple(r).unwrap()
            })
            .sum();
        let simple = returns.simple.column("RISING_GROWTH").unwrap()[0];
        assert!((simple - expected).abs() < dec!(0.000000001));

        let log = returns.log.column("RISING_GROWTH").unwrap()[0];
        assert!((log - simple_to_log(simple).unwrap()).abs() < dec!(0.000000001));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut config = all_weather_config();
        let panel = synthetic_panel(200, 3);
        let sequential = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap()
            .result;
        config.parallel = true;
        let parallel = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap()
            .result;
        assert_eq!(sequential.within_environment, parallel.within_environment);
        assert_eq!(sequential.between_environments, parallel.between_environments);
        assert_eq!(sequential.final_weights, parallel.final_weights);
    }

    #[test]
    fn test_deterministic() {
        let config = all_weather_config();
        let panel = synthetic_panel(150, 5);
        let allocator = HierarchicalAllocator::new(&config);
        let a = allocator.allocate(&panel).unwrap().result;
        let b = allocator.allocate(&panel).unwrap().result;
        assert_eq!(a.final_weights, b.final_weights);
    }

    #[test]
    fn test_custom_environment_budget() {
        let mut config = all_weather_config();
        config.environment_budget = Some(vec![dec!(0.4), dec!(0.3), dec!(0.2), dec!(0.1)]);
        let panel = synthetic_panel(250, 13);
        let result = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap()
            .result;
        let rc: Vec<Decimal> = result
            .between_environments
            .iter()
            .map(|b| b.risk_contribution)
            .collect();
        for (c, b) in rc.iter().zip([dec!(0.4), dec!(0.3), dec!(0.2), dec!(0.1)]) {
            assert!((*c - b).abs() < dec!(0.005));
        }
    }

    #[test]
    fn test_unknown_ticker_names_environment() {
        let mut config = all_weather_config();
        config.environments[2].tickers.push("BTC".into());
        let panel = synthetic_panel(60, 1);
        let err = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap_err();
        assert!(err.to_string().contains("RISING_INFLATION"));
        assert!(matches!(err.root(), AllocationError::InputShape { .. }));
    }

    #[test]
    fn test_empty_environment_rejected() {
        let mut config = all_weather_config();
        config.environments[0].tickers.clear();
        let panel = synthetic_panel(60, 1);
        let err = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap_err();
        assert!(matches!(err.root(), AllocationError::InputShape { .. }));
    }

    #[test]
    fn test_zero_budget_entry_aborts() {
        let mut config = all_weather_config();
        config.environments[1].risk_budget = Some(vec![Decimal::ONE, Decimal::ZERO]);
        let panel = synthetic_panel(60, 1);
        let err = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap_err();
        assert!(err.to_string().contains("FALLING_GROWTH"));
        assert!(matches!(err.root(), AllocationError::SingularInput { .. }));
    }

    #[test]
    fn test_guard_rejects_converged_but_loose_solution() {
        // The solver stops at 1e-3 but the guard demands 1e-9
        let mut config = all_weather_config();
        config.solver.tolerance = dec!(0.001);
        config.validation = ValidationConfig {
            mode: ValidationMode::AbsoluteTolerance,
            tolerance: dec!(0.000000001),
            decimal_places: 2,
        };
        let panel = synthetic_panel(120, 17);
        let err = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap_err();
        assert!(matches!(err.root(), AllocationError::ValidationMismatch { .. }));
    }

    #[test]
    fn test_single_ticker_environment_warns() {
        let config = AllocationConfig::new(vec![
            Environment::new("GOLD_ONLY", vec!["GLD".into()]),
            Environment::new("STOCKS_BONDS", vec!["VTI".into(), "TLT".into()]),
        ]);
        let panel = synthetic_panel(100, 23);
        let out = HierarchicalAllocator::new(&config).allocate(&panel).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("GOLD_ONLY")));
        let gold = &out.result.within_environment[0];
        assert_eq!(gold.weight, Decimal::ONE);
    }

    #[test]
    fn test_empty_panel_rejected() {
        let config = all_weather_config();
        let panel = ReturnPanel::new(
            vec![],
            TICKERS.iter().map(|t| t.to_string()).collect(),
            vec![vec![]; TICKERS.len()],
        )
        .unwrap();
        let err = HierarchicalAllocator::new(&config)
            .allocate(&panel)
            .unwrap_err();
        assert!(matches!(err, AllocationError::InputShape { .. }));
    }
}
