use clap::Args;
use serde_json::Value;

use all_weather_core::risk_parity::portfolio::{self, RiskParityInput};

use crate::input;

/// Arguments for a single risk-parity solve on an explicit covariance matrix
#[derive(Args)]
pub struct RiskParityArgs {
    /// Path to JSON input file
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_risk_parity(args: RiskParityArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let rp_input: RiskParityInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        data
    } else {
        return Err("--input <file.json> or stdin required for risk parity".into());
    };
    let result = portfolio::design_risk_parity(&rp_input)?;
    Ok(serde_json::to_value(result)?)
}
