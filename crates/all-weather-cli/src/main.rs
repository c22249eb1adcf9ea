mod commands;
mod input;
mod output;
mod settings;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::allocate::AllocateArgs;
use commands::log_returns::LogReturnsArgs;
use commands::performance::PerformanceArgs;
use commands::risk_parity::RiskParityArgs;

/// All-weather portfolio construction by hierarchical risk parity
#[derive(Parser)]
#[command(
    name = "allweather",
    version,
    about = "All-weather portfolio construction by hierarchical risk parity",
    long_about = "Builds an all-weather portfolio with decimal precision: risk-parity \
                  weights within each economic environment, risk parity across the \
                  environments, and the combined per-ticker weights. Also builds the \
                  daily log-return panel from price files and assesses historic performance."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log filter when RUST_LOG is unset (e.g. info, debug)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Hierarchical risk-parity allocation across environments
    Allocate(AllocateArgs),
    /// Single risk-parity solve on an explicit covariance matrix
    RiskParity(RiskParityArgs),
    /// Build the daily log-return panel (and benchmark returns) from price files
    LogReturns(LogReturnsArgs),
    /// Historic performance of the final weights against the benchmark
    Performance(PerformanceArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Logs go to stderr so stdout stays machine readable
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Allocate(args) => commands::allocate::run_allocate(args),
        Commands::RiskParity(args) => commands::risk_parity::run_risk_parity(args),
        Commands::LogReturns(args) => commands::log_returns::run_log_returns(args),
        Commands::Performance(args) => commands::performance::run_performance(args),
        Commands::Version => {
            println!("allweather {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
