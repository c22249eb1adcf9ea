use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use all_weather_core::allocation::{AllocationConfig, Environment};
use all_weather_core::risk_parity::{SolverConfig, ValidationConfig, ValidationMode};

/// `portfolio-settings.yaml`, as written by hand.
///
/// Numbers are read as plain YAML floats and converted to `Decimal` here so
/// the settings file never needs quoted decimals.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PortfolioSettings {
    pub portfolio_name: String,
    pub data_path: String,
    pub results_path: String,
    /// Environment name -> tickers, in file order
    pub environments: serde_yaml::Mapping,
    #[serde(default)]
    pub benchmark_tickers: Vec<String>,
    #[serde(default)]
    pub benchmark_ticker_weights: Vec<f64>,
    /// Environment name -> per-ticker risk budget
    #[serde(default)]
    pub risk_budgets: BTreeMap<String, Vec<f64>>,
    /// Risk budget across environments, in environment order
    #[serde(default)]
    pub environment_budget: Option<Vec<f64>>,
    #[serde(default)]
    pub validation: Option<ValidationSettings>,
    #[serde(default)]
    pub solver: Option<SolverSettings>,
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ValidationSettings {
    #[serde(default)]
    pub mode: Option<ValidationMode>,
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub decimal_places: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SolverSettings {
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl PortfolioSettings {
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        crate::input::file::read_yaml(path)
    }

    /// Ordered environments with their tickers.
    pub fn environments(&self) -> Result<Vec<(String, Vec<String>)>, Box<dyn std::error::Error>> {
        self.environments
            .iter()
            .map(|(key, value)| -> Result<(String, Vec<String>), Box<dyn std::error::Error>> {
                let name = key
                    .as_str()
                    .ok_or_else(|| format!("ENVIRONMENTS: key {:?} is not a string", key))?
                    .to_string();
                let tickers: Vec<String> = serde_yaml::from_value(value.clone())
                    .map_err(|e| format!("ENVIRONMENTS.{}: {}", name, e))?;
                Ok((name, tickers))
            })
            .collect()
    }

    /// Distinct tickers across all environments, sorted.
    pub fn tickers(&self) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        Ok(self.allocation_config()?.tickers())
    }

    pub fn allocation_config(&self) -> Result<AllocationConfig, Box<dyn std::error::Error>> {
        let mut environments = Vec::with_capacity(self.environments.len());
        for (name, tickers) in self.environments()? {
            let risk_budget = self
                .risk_budgets
                .get(&name)
                .map(|b| to_decimals(&format!("RISK_BUDGETS.{}", name), b))
                .transpose()?;
            environments.push(Environment {
                name,
                tickers,
                risk_budget,
            });
        }
        for name in self.risk_budgets.keys() {
            if !environments.iter().any(|e| &e.name == name) {
                return Err(format!("RISK_BUDGETS: '{}' is not an environment", name).into());
            }
        }

        let mut config = AllocationConfig::new(environments);
        config.environment_budget = self
            .environment_budget
            .as_ref()
            .map(|b| to_decimals("ENVIRONMENT_BUDGET", b))
            .transpose()?;
        config.parallel = self.parallel;

        if let Some(solver) = &self.solver {
            let defaults = SolverConfig::default();
            config.solver = SolverConfig {
                tolerance: optional_decimal("SOLVER.TOLERANCE", solver.tolerance)?
                    .unwrap_or(defaults.tolerance),
                max_iterations: solver.max_iterations.unwrap_or(defaults.max_iterations),
            };
        }
        if let Some(validation) = &self.validation {
            let defaults = ValidationConfig::default();
            config.validation = ValidationConfig {
                mode: validation.mode.unwrap_or(defaults.mode),
                tolerance: optional_decimal("VALIDATION.TOLERANCE", validation.tolerance)?
                    .unwrap_or(defaults.tolerance),
                decimal_places: validation.decimal_places.unwrap_or(defaults.decimal_places),
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn benchmark_weights(&self) -> Result<Vec<Decimal>, Box<dyn std::error::Error>> {
        to_decimals("BENCHMARK_TICKER_WEIGHTS", &self.benchmark_ticker_weights)
    }

    /// `<DATA_PATH>/<PORTFOLIO_NAME>-<file>`
    pub fn data_file(&self, file: &str) -> PathBuf {
        Path::new(&self.data_path).join(format!("{}-{}", self.portfolio_name, file))
    }

    /// `<RESULTS_PATH>/<PORTFOLIO_NAME>-<file>`
    pub fn results_file(&self, file: &str) -> PathBuf {
        Path::new(&self.results_path).join(format!("{}-{}", self.portfolio_name, file))
    }

    /// `<DATA_PATH>/<TICKER>.csv`
    pub fn price_file(&self, ticker: &str) -> PathBuf {
        Path::new(&self.data_path).join(format!("{}.csv", ticker))
    }
}

fn to_decimals(field: &str, values: &[f64]) -> Result<Vec<Decimal>, Box<dyn std::error::Error>> {
    values
        .iter()
        .map(|v| {
            Decimal::from_f64(*v)
                .ok_or_else(|| format!("{}: {} is not a finite decimal", field, v).into())
        })
        .collect()
}

fn optional_decimal(
    field: &str,
    value: Option<f64>,
) -> Result<Option<Decimal>, Box<dyn std::error::Error>> {
    value
        .map(|v| to_decimals(field, &[v]).map(|d| d[0]))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SETTINGS: &str = r#"
PORTFOLIO_NAME: ALL-WEATHER
DATA_PATH: data/
RESULTS_PATH: results/
ENVIRONMENTS:
  RISING_GROWTH: [VTI, DBC]
  FALLING_GROWTH: [TLT, TIP]
  RISING_INFLATION: [GLD, DBC, TIP]
  FALLING_INFLATION: [VTI, TLT]
BENCHMARK_TICKERS: [VTI, BND]
BENCHMARK_TICKER_WEIGHTS: [0.6, 0.4]
RISK_BUDGETS:
  RISING_INFLATION: [0.5, 0.25, 0.25]
VALIDATION:
  MODE: rounded_equality
"#;

    fn settings() -> PortfolioSettings {
        serde_yaml::from_str(SETTINGS).unwrap()
    }

    #[test]
    fn test_environment_order_is_kept() {
        let names: Vec<String> = settings()
            .environments()
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(
            names,
            vec!["RISING_GROWTH", "FALLING_GROWTH", "RISING_INFLATION", "FALLING_INFLATION"]
        );
    }

    #[test]
    fn test_allocation_config() {
        let config = settings().allocation_config().unwrap();
        assert_eq!(config.environments.len(), 4);
        assert_eq!(
            config.environments[2].risk_budget,
            Some(vec![dec!(0.5), dec!(0.25), dec!(0.25)])
        );
        assert!(config.environments[0].risk_budget.is_none());
        assert_eq!(config.validation.mode, ValidationMode::RoundedEquality);
        assert_eq!(config.validation.tolerance, dec!(0.005));
        assert_eq!(config.tickers(), vec!["DBC", "GLD", "TIP", "TLT", "VTI"]);
    }

    #[test]
    fn test_unknown_budget_environment() {
        let mut s = settings();
        s.risk_budgets.insert("STAGFLATION".into(), vec![1.0]);
        assert!(s.allocation_config().is_err());
    }

    #[test]
    fn test_file_names() {
        let s = settings();
        assert_eq!(
            s.data_file("weights_within_environment.csv"),
            PathBuf::from("data/ALL-WEATHER-weights_within_environment.csv")
        );
        assert_eq!(
            s.results_file("final-ticker-weights.csv"),
            PathBuf::from("results/ALL-WEATHER-final-ticker-weights.csv")
        );
        assert_eq!(s.price_file("GLD"), PathBuf::from("data/GLD.csv"));
        assert_eq!(s.benchmark_weights().unwrap(), vec![dec!(0.6), dec!(0.4)]);
    }
}
