use clap::Args;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

use all_weather_core::performance::{assess_performance, PerformanceInput, PerformanceOutput};

use super::allocate::{FINAL_WEIGHTS_FILE, LOG_RETURNS_FILE};
use super::log_returns::BENCHMARK_FILE;
use crate::input::csv_in;
use crate::output::files;
use crate::settings::PortfolioSettings;

/// Arguments for the historic performance assessment
#[derive(Args)]
pub struct PerformanceArgs {
    /// Path to the portfolio settings YAML
    #[arg(long, default_value = "portfolio-settings.yaml")]
    pub settings: String,
}

#[derive(Serialize)]
struct StatsRow<'a> {
    series: &'a str,
    annual_return: Decimal,
    max_drawdown: Decimal,
    return_risk_ratio: Decimal,
}

#[derive(Serialize)]
struct SeriesRow<'a> {
    date: String,
    value: Decimal,
    key: &'a str,
}

pub fn run_performance(args: PerformanceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let settings = PortfolioSettings::load(&args.settings)?;
    let log_returns = csv_in::read_return_panel(&settings.data_file(LOG_RETURNS_FILE))?;
    let final_weights = csv_in::read_final_weights(&settings.results_file(FINAL_WEIGHTS_FILE))?;

    let bench_path = settings.data_file(BENCHMARK_FILE);
    let benchmark = if bench_path.is_file() {
        Some(csv_in::read_return_series(&bench_path)?)
    } else {
        info!(path = %bench_path.display(), "no benchmark returns; assessing portfolio alone");
        None
    };

    let result = assess_performance(&PerformanceInput {
        log_returns,
        final_weights,
        benchmark,
    })?;
    persist(&settings, &args.settings, &result.result)?;
    Ok(serde_json::to_value(result)?)
}

fn persist(
    settings: &PortfolioSettings,
    settings_path: &str,
    output: &PerformanceOutput,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stats = vec![StatsRow {
        series: "portfolio",
        annual_return: output.portfolio.annual_return,
        max_drawdown: output.portfolio.max_drawdown,
        return_risk_ratio: output.portfolio.return_risk_ratio,
    }];
    if let Some(b) = &output.benchmark {
        stats.push(StatsRow {
            series: "benchmark",
            annual_return: b.annual_return,
            max_drawdown: b.max_drawdown,
            return_risk_ratio: b.return_risk_ratio,
        });
    }
    files::write_records(&settings.results_file("performance_stats.csv"), &stats)?;

    // Long format, percent, one key per line series
    let mut returns = Vec::with_capacity(output.series.len() * 2);
    let mut drawdowns = Vec::with_capacity(output.series.len() * 2);
    for point in &output.series {
        let date = point.date.to_string();
        returns.push(SeriesRow {
            date: date.clone(),
            value: point.cumulative_return * dec!(100),
            key: "portfolio",
        });
        drawdowns.push(SeriesRow {
            date: date.clone(),
            value: point.drawdown,
            key: "portfolio",
        });
        if let (Some(c), Some(dd)) = (point.benchmark_cumulative_return, point.benchmark_drawdown) {
            returns.push(SeriesRow {
                date: date.clone(),
                value: c * dec!(100),
                key: "benchmark",
            });
            drawdowns.push(SeriesRow {
                date,
                value: dd,
                key: "benchmark",
            });
        }
    }
    files::write_records(&settings.data_file("returns.csv"), &returns)?;
    files::write_records(&settings.data_file("drawdowns.csv"), &drawdowns)?;

    // Keep the settings that produced these results next to them
    let copy = Path::new(&settings.results_path).join(format!("{}.yml", settings.portfolio_name));
    fs::copy(settings_path, &copy)
        .map_err(|e| format!("Failed to copy settings to '{}': {}", copy.display(), e))?;
    Ok(())
}
