use chrono::NaiveDate;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AllocationError;
use crate::types::{Rate, Ticker, Weight};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single dated return observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnObservation {
    pub date: NaiveDate,
    pub value: Rate,
}

/// Date-indexed daily log returns for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReturnSeries {
    pub ticker: Ticker,
    pub observations: Vec<ReturnObservation>,
}

/// Date-aligned returns, one column per ticker.
///
/// Dates are unique and strictly increasing and every column carries exactly
/// one value per date. Both are checked on construction, so downstream code can
/// index columns positionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnPanel {
    dates: Vec<NaiveDate>,
    tickers: Vec<Ticker>,
    columns: Vec<Vec<Rate>>,
}

impl ReturnPanel {
    /// Build a panel from column-major data.
    pub fn new(
        dates: Vec<NaiveDate>,
        tickers: Vec<Ticker>,
        columns: Vec<Vec<Rate>>,
    ) -> AllocationResult<Self> {
        validate_dates(&dates)?;

        if columns.len() != tickers.len() {
            return Err(AllocationError::InputShape {
                field: "columns".into(),
                reason: format!(
                    "Expected {} columns (one per ticker), got {}",
                    tickers.len(),
                    columns.len()
                ),
            });
        }

        let mut seen = HashSet::with_capacity(tickers.len());
        for ticker in &tickers {
            if !seen.insert(ticker.as_str()) {
                return Err(AllocationError::InputShape {
                    field: "tickers".into(),
                    reason: format!("Ticker '{}' appears more than once", ticker),
                });
            }
        }

        for (ticker, column) in tickers.iter().zip(columns.iter()) {
            if column.len() != dates.len() {
                return Err(AllocationError::InputShape {
                    field: format!("columns[{}]", ticker),
                    reason: format!(
                        "Expected {} observations, got {}",
                        dates.len(),
                        column.len()
                    ),
                });
            }
        }

        Ok(Self {
            dates,
            tickers,
            columns,
        })
    }

    /// Build a panel from per-ticker series that already share one date index.
    pub fn from_series(series: Vec<AssetReturnSeries>) -> AllocationResult<Self> {
        let first = series.first().ok_or_else(|| {
            AllocationError::InsufficientData("At least one return series required".into())
        })?;
        let dates: Vec<NaiveDate> = first.observations.iter().map(|o| o.date).collect();

        let mut tickers = Vec::with_capacity(series.len());
        let mut columns = Vec::with_capacity(series.len());
        for s in series {
            let aligned = s.observations.len() == dates.len()
                && s.observations
                    .iter()
                    .zip(dates.iter())
                    .all(|(o, d)| o.date == *d);
            if !aligned {
                return Err(AllocationError::DateError(format!(
                    "Series '{}' is not aligned with the common date index",
                    s.ticker
                )));
            }
            columns.push(s.observations.into_iter().map(|o| o.value).collect());
            tickers.push(s.ticker);
        }

        Self::new(dates, tickers, columns)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    /// Number of dated observations.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Column for a ticker, if present.
    pub fn column(&self, ticker: &str) -> Option<&[Rate]> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.columns[i].as_slice())
    }

    /// Columns for the given tickers, in the given order.
    pub fn select(&self, tickers: &[Ticker]) -> AllocationResult<Vec<&[Rate]>> {
        tickers
            .iter()
            .map(|t| {
                self.column(t).ok_or_else(|| AllocationError::InputShape {
                    field: "tickers".into(),
                    reason: format!("Ticker '{}' is not present in the return panel", t),
                })
            })
            .collect()
    }

    /// Convert every column from log to simple returns.
    pub fn to_simple(&self) -> AllocationResult<ReturnPanel> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.iter().map(|r| log_to_simple(*r)).collect::<AllocationResult<Vec<Rate>>>())
            .collect::<AllocationResult<Vec<Vec<Rate>>>>()?;
        Ok(ReturnPanel {
            dates: self.dates.clone(),
            tickers: self.tickers.clone(),
            columns,
        })
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Simple return implied by a log return: exp(r) - 1.
pub fn log_to_simple(log_return: Rate) -> AllocationResult<Rate> {
    log_return
        .checked_exp()
        .map(|e| e - Decimal::ONE)
        .ok_or_else(|| AllocationError::InvalidInput {
            field: "log_return".into(),
            reason: format!("exp({}) overflows", log_return),
        })
}

/// Log return implied by a simple return: ln(1 + r). Undefined at or below -100%.
pub fn simple_to_log(simple_return: Rate) -> AllocationResult<Rate> {
    let gross = Decimal::ONE + simple_return;
    if gross <= Decimal::ZERO {
        return Err(AllocationError::InvalidInput {
            field: "simple_return".into(),
            reason: format!(
                "A simple return of {} has no log-return equivalent",
                simple_return
            ),
        });
    }
    gross
        .checked_ln()
        .ok_or_else(|| AllocationError::InvalidInput {
            field: "simple_return".into(),
            reason: format!("ln({}) is not representable", gross),
        })
}

/// Date-by-date weighted sum of several return columns.
pub fn weighted_sum(columns: &[&[Rate]], weights: &[Weight]) -> AllocationResult<Vec<Rate>> {
    if columns.len() != weights.len() {
        return Err(AllocationError::InputShape {
            field: "weights".into(),
            reason: format!(
                "Expected {} weights (one per column), got {}",
                columns.len(),
                weights.len()
            ),
        });
    }
    let len = columns.first().map_or(0, |c| c.len());
    if columns.iter().any(|c| c.len() != len) {
        return Err(AllocationError::InputShape {
            field: "columns".into(),
            reason: "Columns have different lengths".into(),
        });
    }
    Ok((0..len)
        .map(|t| {
            columns
                .iter()
                .zip(weights.iter())
                .map(|(c, w)| c[t] * *w)
                .sum::<Decimal>()
        })
        .collect())
}

fn validate_dates(dates: &[NaiveDate]) -> AllocationResult<()> {
    for pair in dates.windows(2) {
        if pair[1] == pair[0] {
            return Err(AllocationError::DateError(format!(
                "Duplicate date {}: each date should only appear once in the time series",
                pair[0]
            )));
        }
        if pair[1] < pair[0] {
            return Err(AllocationError::DateError(format!(
                "Dates are not in ascending order: {} follows {}",
                pair[1], pair[0]
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, day).unwrap()
    }

    fn sample_panel() -> ReturnPanel {
        ReturnPanel::new(
            vec![d(2), d(3), d(6)],
            vec!["SPY".into(), "TLT".into()],
            vec![
                vec![dec!(0.01), dec!(-0.02), dec!(0.005)],
                vec![dec!(-0.003), dec!(0.004), dec!(0.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_panel_accessors() {
        let panel = sample_panel();
        assert_eq!(panel.len(), 3);
        assert!(!panel.is_empty());
        assert_eq!(panel.tickers(), &["SPY".to_string(), "TLT".to_string()]);
        assert_eq!(panel.column("TLT").unwrap()[1], dec!(0.004));
        assert!(panel.column("GLD").is_none());
    }

    #[test]
    fn test_duplicate_dates_rejected() {
        let err = ReturnPanel::new(
            vec![d(2), d(2)],
            vec!["SPY".into()],
            vec![vec![dec!(0.01), dec!(0.02)]],
        )
        .unwrap_err();
        assert!(matches!(err, AllocationError::DateError(ref m) if m.contains("Duplicate")));
    }

    #[test]
    fn test_unsorted_dates_rejected() {
        let err = ReturnPanel::new(
            vec![d(3), d(2)],
            vec!["SPY".into()],
            vec![vec![dec!(0.01), dec!(0.02)]],
        )
        .unwrap_err();
        assert!(matches!(err, AllocationError::DateError(_)));
    }

    #[test]
    fn test_ragged_column_rejected() {
        let err = ReturnPanel::new(
            vec![d(2), d(3)],
            vec!["SPY".into()],
            vec![vec![dec!(0.01)]],
        )
        .unwrap_err();
        assert!(matches!(err, AllocationError::InputShape { .. }));
    }

    #[test]
    fn test_duplicate_ticker_rejected() {
        let err = ReturnPanel::new(
            vec![d(2)],
            vec!["SPY".into(), "SPY".into()],
            vec![vec![dec!(0.01)], vec![dec!(0.01)]],
        )
        .unwrap_err();
        assert!(matches!(err, AllocationError::InputShape { .. }));
    }

    #[test]
    fn test_select_unknown_ticker() {
        let panel = sample_panel();
        let err = panel.select(&["SPY".into(), "GLD".into()]).unwrap_err();
        assert!(err.to_string().contains("GLD"));
    }

    #[test]
    fn test_from_series_requires_alignment() {
        let a = AssetReturnSeries {
            ticker: "A".into(),
            observations: vec![
                ReturnObservation { date: d(2), value: dec!(0.01) },
                ReturnObservation { date: d(3), value: dec!(0.02) },
            ],
        };
        let b = AssetReturnSeries {
            ticker: "B".into(),
            observations: vec![
                ReturnObservation { date: d(2), value: dec!(0.01) },
                ReturnObservation { date: d(6), value: dec!(0.02) },
            ],
        };
        assert!(ReturnPanel::from_series(vec![a.clone()]).is_ok());
        assert!(matches!(
            ReturnPanel::from_series(vec![a, b]),
            Err(AllocationError::DateError(_))
        ));
    }

    #[test]
    fn test_log_simple_conversion() {
        let simple = log_to_simple(dec!(0.05)).unwrap();
        // exp(0.05) - 1 = 0.051271096...
        assert!((simple - dec!(0.0512710964)).abs() < dec!(0.00000001));
        let back = simple_to_log(simple).unwrap();
        assert!((back - dec!(0.05)).abs() < dec!(0.00000001));
        assert!(log_to_simple(Decimal::ZERO).unwrap().abs() < dec!(0.00000001));
    }

    #[test]
    fn test_total_loss_has_no_log_return() {
        assert!(simple_to_log(dec!(-1)).is_err());
        assert!(simple_to_log(dec!(-1.5)).is_err());
    }

    #[test]
    fn test_weighted_sum() {
        let a = [dec!(0.01), dec!(0.02)];
        let b = [dec!(0.03), dec!(-0.01)];
        let combined = weighted_sum(&[&a, &b], &[dec!(0.25), dec!(0.75)]).unwrap();
        assert_eq!(combined, vec![dec!(0.025), dec!(-0.0025)]);
        assert!(weighted_sum(&[&a, &b], &[Decimal::ONE]).is_err());
    }
}
