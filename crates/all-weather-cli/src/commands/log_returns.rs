use chrono::NaiveDate;
use clap::Args;
use serde_json::{json, Value};
use tracing::info;

use all_weather_core::ingestion::{self, PriceSeries};

use super::allocate::LOG_RETURNS_FILE;
use crate::input::csv_in;
use crate::output::files;
use crate::settings::PortfolioSettings;

pub const BENCHMARK_FILE: &str = "benchmark-simple-returns.csv";

/// Arguments for building the daily log-return panel from price files
#[derive(Args)]
pub struct LogReturnsArgs {
    /// Path to the portfolio settings YAML
    #[arg(long, default_value = "portfolio-settings.yaml")]
    pub settings: String,
    /// Last date to include (YYYY-MM-DD); defaults to the latest shared date
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

pub fn run_log_returns(args: LogReturnsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let settings = PortfolioSettings::load(&args.settings)?;
    let tickers = settings.tickers()?;
    let prices = read_all(&settings, &tickers)?;

    let start = ingestion::latest_first_date(&prices);
    let panel = ingestion::log_return_panel(&prices, start, args.end)?;
    let panel_path = settings.data_file(LOG_RETURNS_FILE);
    files::write_panel(&panel_path, &panel)?;
    info!(
        tickers = tickers.len(),
        observations = panel.len(),
        "log-return panel written"
    );

    let mut benchmark = Value::Null;
    if !settings.benchmark_tickers.is_empty() {
        let bench_prices = read_all(&settings, &settings.benchmark_tickers)?;
        let weights = settings.benchmark_weights()?;
        let series = ingestion::benchmark_simple_returns(&bench_prices, &weights, start, args.end)?;
        let bench_path = settings.data_file(BENCHMARK_FILE);
        files::write_series(&bench_path, "benchmark", &series)?;
        benchmark = json!({
            "tickers": settings.benchmark_tickers,
            "observations": series.len(),
            "file": bench_path.display().to_string(),
        });
    }

    Ok(json!({
        "result": {
            "tickers": tickers,
            "start": panel.dates().first(),
            "end": panel.dates().last(),
            "observations": panel.len(),
            "file": panel_path.display().to_string(),
            "benchmark": benchmark,
        }
    }))
}

fn read_all(
    settings: &PortfolioSettings,
    tickers: &[String],
) -> Result<Vec<PriceSeries>, Box<dyn std::error::Error>> {
    tickers
        .iter()
        .map(|t| csv_in::read_prices(&settings.price_file(t), t))
        .collect()
}
