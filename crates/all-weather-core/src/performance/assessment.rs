use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use super::metrics::{cagr, cumulative_returns, drawdowns, max_drawdown, return_risk_ratio};
use crate::allocation::FinalTickerWeight;
use crate::error::AllocationError;
use crate::returns::panel::{weighted_sum, ReturnObservation, ReturnPanel};
use crate::types::{with_metadata, ComputationOutput, Rate, Ticker, Weight};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Historic log returns plus the weights to hold them at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceInput {
    pub log_returns: ReturnPanel,
    pub final_weights: Vec<FinalTickerWeight>,
    /// Daily simple returns of the benchmark, if one is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<Vec<ReturnObservation>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// CAGR of the cumulative return stream
    pub annual_return: Rate,
    /// Deepest peak-to-trough decline, as a (negative) fraction
    pub max_drawdown: Rate,
    pub return_risk_ratio: Decimal,
    pub total_return: Rate,
    pub observations: usize,
}

/// One dated row of the portfolio (and benchmark) return streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformancePoint {
    pub date: NaiveDate,
    pub simple_return: Rate,
    pub cumulative_return: Rate,
    /// Percent below the running peak
    pub drawdown: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_cumulative_return: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_drawdown: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceOutput {
    pub portfolio: PerformanceStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<PerformanceStats>,
    pub series: Vec<PerformancePoint>,
}

struct ReturnStream {
    dates: Vec<NaiveDate>,
    simple: Vec<Rate>,
    cumulative: Vec<Rate>,
    drawdowns: Vec<Decimal>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Daily simple return of the fixed-weight portfolio: sum of w_i (exp(r_i) - 1).
pub fn portfolio_simple_returns(
    log_returns: &ReturnPanel,
    weights: &[FinalTickerWeight],
) -> AllocationResult<Vec<ReturnObservation>> {
    if weights.is_empty() {
        return Err(AllocationError::InputShape {
            field: "final_weights".into(),
            reason: "At least one ticker weight required".into(),
        });
    }
    let tickers: Vec<Ticker> = weights.iter().map(|w| w.ticker.clone()).collect();
    let w: Vec<Weight> = weights.iter().map(|w| w.weight).collect();
    let simple = log_returns.to_simple()?;
    let columns = simple.select(&tickers)?;
    let combined = weighted_sum(&columns, &w)?;
    Ok(log_returns
        .dates()
        .iter()
        .zip(combined)
        .map(|(date, value)| ReturnObservation { date: *date, value })
        .collect())
}

/// Assess the historic performance of holding `final_weights` over the panel,
/// alongside an optional benchmark.
pub fn assess_performance(
    input: &PerformanceInput,
) -> AllocationResult<ComputationOutput<PerformanceOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let total_weight: Decimal = input.final_weights.iter().map(|w| w.weight).sum();
    if (total_weight - Decimal::ONE).abs() > dec!(0.000001) {
        warnings.push(format!(
            "Final weights sum to {} rather than 1; returns are not fully invested",
            total_weight
        ));
    }

    let portfolio = stream(&portfolio_simple_returns(
        &input.log_returns,
        &input.final_weights,
    )?);
    let portfolio_stats = stats(&portfolio).map_err(|e| e.in_layer("portfolio"))?;

    let benchmark = match &input.benchmark {
        Some(obs) if obs.is_empty() => {
            warnings.push("Benchmark has no observations; skipped".into());
            None
        }
        Some(obs) => Some(stream(obs)),
        None => None,
    };
    let benchmark_stats = benchmark
        .as_ref()
        .map(|b| stats(b).map_err(|e| e.in_layer("benchmark")))
        .transpose()?;

    if let Some(b) = &benchmark {
        if b.dates.first() != portfolio.dates.first() || b.dates.last() != portfolio.dates.last() {
            warnings.push("Benchmark and portfolio cover different date ranges".into());
        }
    }

    let benchmark_by_date: HashMap<NaiveDate, (Rate, Decimal)> = benchmark
        .as_ref()
        .map(|b| {
            b.dates
                .iter()
                .zip(b.cumulative.iter().zip(b.drawdowns.iter()))
                .map(|(d, (c, dd))| (*d, (*c, *dd)))
                .collect()
        })
        .unwrap_or_default();

    let series = (0..portfolio.dates.len())
        .map(|i| {
            let date = portfolio.dates[i];
            let bench = benchmark_by_date.get(&date);
            PerformancePoint {
                date,
                simple_return: portfolio.simple[i],
                cumulative_return: portfolio.cumulative[i],
                drawdown: portfolio.drawdowns[i],
                benchmark_cumulative_return: bench.map(|b| b.0),
                benchmark_drawdown: bench.map(|b| b.1),
            }
        })
        .collect();

    let output = PerformanceOutput {
        portfolio: portfolio_stats,
        benchmark: benchmark_stats,
        series,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Historic performance of a fixed-weight portfolio",
        &serde_json::json!({
            "cumulative_returns": "running sum of daily simple returns",
            "annual_return": "(1 + total)^(365 / days) - 1",
            "drawdown": "percent below the running peak of 1 + cumulative",
            "return_risk_ratio": "mean over population standard deviation of daily simple returns",
            "benchmark": input.benchmark.is_some(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stream(observations: &[ReturnObservation]) -> ReturnStream {
    let simple: Vec<Rate> = observations.iter().map(|o| o.value).collect();
    let cumulative = cumulative_returns(&simple);
    ReturnStream {
        dates: observations.iter().map(|o| o.date).collect(),
        drawdowns: drawdowns(&cumulative),
        simple,
        cumulative,
    }
}

fn stats(stream: &ReturnStream) -> AllocationResult<PerformanceStats> {
    Ok(PerformanceStats {
        annual_return: cagr(&stream.dates, &stream.cumulative)?,
        max_drawdown: max_drawdown(&stream.cumulative),
        return_risk_ratio: return_risk_ratio(&stream.simple)?,
        total_return: stream.cumulative.last().copied().unwrap_or(Decimal::ZERO),
        observations: stream.simple.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
