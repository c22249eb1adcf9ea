use clap::Args;
use serde_json::Value;
use tracing::info;

use all_weather_core::allocation::{AllocationOutput, HierarchicalAllocator};

use crate::input::csv_in;
use crate::output::files;
use crate::settings::PortfolioSettings;

pub const LOG_RETURNS_FILE: &str = "daily-log-returns-per-ticker.csv";
pub const FINAL_WEIGHTS_FILE: &str = "final-ticker-weights.csv";

/// Arguments for the hierarchical all-weather allocation
#[derive(Args)]
pub struct AllocateArgs {
    /// Path to the portfolio settings YAML
    #[arg(long, default_value = "portfolio-settings.yaml")]
    pub settings: String,
    /// Daily log-return CSV; defaults to the panel under DATA_PATH
    #[arg(long)]
    pub returns: Option<String>,
    /// Write the weight and environment-return tables to DATA_PATH / RESULTS_PATH
    #[arg(long)]
    pub persist: bool,
    /// Solve the environments on worker threads
    #[arg(long)]
    pub parallel: bool,
}

pub fn run_allocate(args: AllocateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let settings = PortfolioSettings::load(&args.settings)?;
    let mut config = settings.allocation_config()?;
    config.parallel |= args.parallel;

    let returns_path = match &args.returns {
        Some(path) => path.into(),
        None => settings.data_file(LOG_RETURNS_FILE),
    };
    let panel = csv_in::read_return_panel(&returns_path)?;
    info!(
        portfolio = %settings.portfolio_name,
        tickers = panel.tickers().len(),
        observations = panel.len(),
        "allocating"
    );

    let result = HierarchicalAllocator::new(&config).allocate(&panel)?;
    if args.persist {
        persist(&settings, &result.result)?;
    }
    Ok(serde_json::to_value(result)?)
}

fn persist(
    settings: &PortfolioSettings,
    output: &AllocationOutput,
) -> Result<(), Box<dyn std::error::Error>> {
    files::write_records(
        &settings.data_file("weights_within_environment.csv"),
        &output.within_environment,
    )?;
    files::write_records(
        &settings.data_file("weights_between_environments.csv"),
        &output.between_environments,
    )?;
    files::write_panel(
        &settings.data_file("weighted-simple-returns-per-environment.csv"),
        &output.environment_returns.simple,
    )?;
    files::write_panel(
        &settings.data_file("weighted-log-returns-per-environment.csv"),
        &output.environment_returns.log,
    )?;
    files::write_records(
        &settings.results_file(FINAL_WEIGHTS_FILE),
        &output.final_weights,
    )?;
    Ok(())
}
