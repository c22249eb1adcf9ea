use chrono::NaiveDate;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::AllocationError;
use crate::returns::panel::{weighted_sum, ReturnObservation, ReturnPanel};
use crate::types::{Rate, Ticker, Weight};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub adjusted_close: Decimal,
}

/// Daily adjusted close prices for one ticker, sorted by date.
///
/// Non-positive prices are dropped on construction; a repeated date is
/// treated as dirty data and rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    ticker: Ticker,
    observations: Vec<PriceObservation>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl PriceSeries {
    pub fn new(
        ticker: impl Into<Ticker>,
        mut observations: Vec<PriceObservation>,
    ) -> AllocationResult<Self> {
        let ticker = ticker.into();
        let mut seen = HashSet::with_capacity(observations.len());
        for obs in &observations {
            if !seen.insert(obs.date) {
                return Err(AllocationError::DateError(format!(
                    "Dirty data: duplicate date {} in the '{}' price series; each date should only appear once",
                    obs.date, ticker
                )));
            }
        }

        let before = observations.len();
        observations.retain(|o| o.adjusted_close > Decimal::ZERO);
        if observations.len() < before {
            debug!(
                ticker = %ticker,
                dropped = before - observations.len(),
                "dropped non-positive prices"
            );
        }
        observations.sort_by_key(|o| o.date);

        Ok(Self {
            ticker,
            observations,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn observations(&self) -> &[PriceObservation] {
        &self.observations
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.observations.first().map(|o| o.date)
    }

    /// ln(p_t / p_{t-1}) dated at t. The first observation has no return.
    pub fn log_returns(&self) -> AllocationResult<Vec<ReturnObservation>> {
        self.observations
            .windows(2)
            .map(|pair| {
                let ratio = pair[1].adjusted_close / pair[0].adjusted_close;
                let value = ratio.checked_ln().ok_or_else(|| AllocationError::InvalidInput {
                    field: format!("{} prices", self.ticker),
                    reason: format!("ln({}) is not representable", ratio),
                })?;
                Ok(ReturnObservation {
                    date: pair[1].date,
                    value,
                })
            })
            .collect()
    }

    /// p_t / p_{t-1} - 1 dated at t.
    pub fn simple_returns(&self) -> Vec<ReturnObservation> {
        self.observations
            .windows(2)
            .map(|pair| ReturnObservation {
                date: pair[1].date,
                value: pair[1].adjusted_close / pair[0].adjusted_close - Decimal::ONE,
            })
            .collect()
    }

    /// Copy restricted to `[start, end]`, inclusive.
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> PriceSeries {
        PriceSeries {
            ticker: self.ticker.clone(),
            observations: self
                .observations
                .iter()
                .filter(|o| in_range(o.date, start, end))
                .cloned()
                .collect(),
        }
    }
}

/// The latest first date across all series: the first day on which every
/// ticker has a price.
pub fn latest_first_date(series: &[PriceSeries]) -> Option<NaiveDate> {
    series.iter().filter_map(|s| s.first_date()).max()
}

/// Daily log returns of every series on the dates they all share.
///
/// Returns are computed on the full price history and then restricted to
/// `[start, end]`; `start` defaults to [`latest_first_date`]. Dates missing
/// in any series are dropped.
pub fn log_return_panel(
    series: &[PriceSeries],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> AllocationResult<ReturnPanel> {
    let start = start.or_else(|| latest_first_date(series));
    let returns = series
        .iter()
        .map(|s| {
            s.log_returns()
                .map(|r| r.into_iter().filter(|o| in_range(o.date, start, end)).collect())
        })
        .collect::<AllocationResult<Vec<Vec<ReturnObservation>>>>()?;
    let panel = align(series, returns)?;
    debug!(
        tickers = panel.tickers().len(),
        observations = panel.len(),
        "built log-return panel"
    );
    Ok(panel)
}

/// Weighted daily simple return of a fixed-weight benchmark.
///
/// Prices are restricted to `[start, end]` before differencing, so the first
/// day in range carries no return. Dates missing in any series are dropped.
pub fn benchmark_simple_returns(
    series: &[PriceSeries],
    weights: &[Weight],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> AllocationResult<Vec<ReturnObservation>> {
    if series.len() != weights.len() {
        return Err(AllocationError::InputShape {
            field: "benchmark_ticker_weights".into(),
            reason: format!(
                "Expected {} weights (one per benchmark ticker), got {}",
                series.len(),
                weights.len()
            ),
        });
    }
    let returns: Vec<Vec<ReturnObservation>> = series
        .iter()
        .map(|s| s.between(start, end).simple_returns())
        .collect();
    let panel = align(series, returns)?;

    let tickers: Vec<Ticker> = panel.tickers().to_vec();
    let columns = panel.select(&tickers)?;
    let combined = weighted_sum(&columns, weights)?;
    Ok(panel
        .dates()
        .iter()
        .zip(combined)
        .map(|(date, value)| ReturnObservation { date: *date, value })
        .collect())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
}

/// Inner join of per-ticker return series on date.
fn align(
    series: &[PriceSeries],
    returns: Vec<Vec<ReturnObservation>>,
) -> AllocationResult<ReturnPanel> {
    if series.is_empty() {
        return Err(AllocationError::InsufficientData(
            "At least one price series required".into(),
        ));
    }

    let mut by_date: BTreeMap<NaiveDate, Vec<Option<Rate>>> = BTreeMap::new();
    for (k, column) in returns.iter().enumerate() {
        for obs in column {
            by_date
                .entry(obs.date)
                .or_insert_with(|| vec![None; series.len()])[k] = Some(obs.value);
        }
    }

    let mut dates = Vec::with_capacity(by_date.len());
    let mut columns: Vec<Vec<Rate>> = vec![Vec::with_capacity(by_date.len()); series.len()];
    for (date, row) in by_date {
        if row.iter().all(Option::is_some) {
            dates.push(date);
            for (column, value) in columns.iter_mut().zip(row.into_iter().flatten()) {
                column.push(value);
            }
        }
    }

    if dates.is_empty() {
        return Err(AllocationError::InsufficientData(
            "The price series share no dates with a return".into(),
        ));
    }

    ReturnPanel::new(
        dates,
        series.iter().map(|s| s.ticker.clone()).collect(),
        columns,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 3, day).unwrap()
    }

    fn series(ticker: &str, prices: &[(u32, Decimal)]) -> PriceSeries {
        PriceSeries::new(
            ticker,
            prices
                .iter()
                .map(|(day, p)| PriceObservation {
                    date: d(*day),
                    adjusted_close: *p,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_dates_are_dirty() {
        let err = PriceSeries::new(
            "SPY",
            vec![
                PriceObservation { date: d(1), adjusted_close: dec!(100) },
                PriceObservation { date: d(1), adjusted_close: dec!(101) },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, AllocationError::DateError(ref m) if m.contains("Dirty data")));
    }

    #[test]
    fn test_sorted_and_positive_only() {
        let s = series("SPY", &[(3, dec!(102)), (1, dec!(100)), (2, dec!(0)), (4, dec!(-1))]);
        let dates: Vec<NaiveDate> = s.observations().iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![d(1), d(3)]);
        assert_eq!(s.first_date(), Some(d(1)));
    }

    #[test]
    fn test_log_returns() {
        let s = series("SPY", &[(1, dec!(100)), (2, dec!(110)), (3, dec!(99))]);
        let r = s.log_returns().unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].date, d(2));
        // ln(1.1) = 0.0953101798...
        assert!((r[0].value - dec!(0.0953101798)).abs() < dec!(0.00000001));
        // ln(0.9) = -0.1053605156...
        assert!((r[1].value - dec!(-0.1053605156)).abs() < dec!(0.00000001));
    }

    #[test]
    fn test_panel_starts_at_latest_first_date() {
        let a = series("A", &[(1, dec!(10)), (2, dec!(11)), (3, dec!(12)), (4, dec!(13))]);
        let b = series("B", &[(2, dec!(20)), (3, dec!(22)), (4, dec!(21))]);
        assert_eq!(latest_first_date(&[a.clone(), b.clone()]), Some(d(2)));

        let panel = log_return_panel(&[a, b], None, None).unwrap();
        // Day 2 has an A return but B's first price carries none
        assert_eq!(panel.dates(), &[d(3), d(4)]);
        assert_eq!(panel.tickers(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_panel_drops_dates_missing_anywhere() {
        let a = series("A", &[(1, dec!(10)), (2, dec!(11)), (3, dec!(12)), (4, dec!(13)), (7, dec!(14))]);
        let b = series("B", &[(1, dec!(20)), (2, dec!(22)), (4, dec!(21)), (7, dec!(23))]);
        let panel = log_return_panel(&[a, b], None, None).unwrap();
        assert_eq!(panel.dates(), &[d(2), d(4), d(7)]);
        // B's return on day 4 spans the gap: ln(21/22)
        let expected = (dec!(21) / dec!(22)).ln();
        assert!((panel.column("B").unwrap()[1] - expected).abs() < dec!(0.00000001));
    }

    #[test]
    fn test_panel_end_date() {
        let a = series("A", &[(1, dec!(10)), (2, dec!(11)), (3, dec!(12)), (4, dec!(13))]);
        let panel = log_return_panel(&[a], None, Some(d(3))).unwrap();
        assert_eq!(panel.dates(), &[d(2), d(3)]);
    }

    #[test]
    fn test_no_shared_dates() {
        let a = series("A", &[(1, dec!(10)), (2, dec!(11))]);
        let b = series("B", &[(5, dec!(10)), (6, dec!(11))]);
        let err = log_return_panel(&[a, b], Some(d(1)), None).unwrap_err();
        assert!(matches!(err, AllocationError::InsufficientData(_)));
    }

    #[test]
    fn test_benchmark_returns() {
        let stocks = series("VTI", &[(1, dec!(100)), (2, dec!(110)), (3, dec!(121))]);
        let bonds = series("BND", &[(1, dec!(50)), (2, dec!(50)), (3, dec!(45))]);
        let bench =
            benchmark_simple_returns(&[stocks, bonds], &[dec!(0.6), dec!(0.4)], None, None)
                .unwrap();
        assert_eq!(bench.len(), 2);
        assert_eq!(bench[0].date, d(2));
        assert_eq!(bench[0].value, dec!(0.06));
        // 0.6 * 0.1 + 0.4 * -0.1
        assert_eq!(bench[1].value, dec!(0.02));
    }

    #[test]
    fn test_benchmark_start_drops_first_day() {
        let stocks = series("VTI", &[(1, dec!(100)), (2, dec!(110)), (3, dec!(121))]);
        let bench = benchmark_simple_returns(&[stocks], &[Decimal::ONE], Some(d(2)), None).unwrap();
        assert_eq!(bench.len(), 1);
        assert_eq!(bench[0].date, d(3));
    }

    #[test]
    fn test_benchmark_weight_count() {
        let stocks = series("VTI", &[(1, dec!(100)), (2, dec!(110))]);
        let err = benchmark_simple_returns(&[stocks], &[dec!(0.5), dec!(0.5)], None, None)
            .unwrap_err();
        assert!(matches!(err, AllocationError::InputShape { .. }));
    }
}
