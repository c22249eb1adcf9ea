use chrono::NaiveDate;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::error::AllocationError;
use crate::returns::covariance::mean;
use crate::risk_parity::matrix::sqrt_decimal;
use crate::types::Rate;
use crate::AllocationResult;

const DAYS_PER_YEAR: Decimal = dec!(365);

/// Running sum of simple returns. Daily returns are added, not compounded.
pub fn cumulative_returns(simple_returns: &[Rate]) -> Vec<Rate> {
    simple_returns
        .iter()
        .scan(Decimal::ZERO, |acc, r| {
            *acc += *r;
            Some(*acc)
        })
        .collect()
}

/// Percentage decline of `1 + cumulative` from its running peak; zero or negative.
pub fn drawdowns(cumulative: &[Rate]) -> Vec<Decimal> {
    let mut peak: Option<Decimal> = None;
    cumulative
        .iter()
        .map(|c| {
            let level = Decimal::ONE + *c;
            let max = peak.map_or(level, |p| p.max(level));
            peak = Some(max);
            if max.is_zero() {
                Decimal::ZERO
            } else {
                (level - max) / max * dec!(100)
            }
        })
        .collect()
}

/// Deepest drawdown as a fraction (-0.25 = 25% below peak).
pub fn max_drawdown(cumulative: &[Rate]) -> Rate {
    drawdowns(cumulative)
        .into_iter()
        .min()
        .map_or(Decimal::ZERO, |dd| dd / dec!(100))
}

/// Compound annual growth implied by the final cumulative return over the
/// calendar span of `dates` (365-day years).
pub fn cagr(dates: &[NaiveDate], cumulative: &[Rate]) -> AllocationResult<Rate> {
    let (first, last, total) = match (dates.first(), dates.last(), cumulative.last()) {
        (Some(f), Some(l), Some(t)) => (*f, *l, *t),
        _ => {
            return Err(AllocationError::InsufficientData(
                "CAGR needs at least one observation".into(),
            ))
        }
    };
    let days = (last - first).num_days();
    if days <= 0 {
        return Err(AllocationError::InsufficientData(
            "CAGR needs observations spanning more than one day".into(),
        ));
    }
    let growth = Decimal::ONE + total;
    if growth <= Decimal::ZERO {
        return Err(AllocationError::InvalidInput {
            field: "cumulative_return".into(),
            reason: format!("Total return of {} leaves nothing to compound", total),
        });
    }
    let years = Decimal::from(days) / DAYS_PER_YEAR;
    let annualised = growth
        .checked_powd(Decimal::ONE / years)
        .ok_or_else(|| AllocationError::InvalidInput {
            field: "cumulative_return".into(),
            reason: format!("{}^(1/{}) is not representable", growth, years),
        })?;
    Ok(annualised - Decimal::ONE)
}

/// Mean daily return over its population standard deviation.
pub fn return_risk_ratio(simple_returns: &[Rate]) -> AllocationResult<Decimal> {
    if simple_returns.is_empty() {
        return Err(AllocationError::InsufficientData(
            "Return/risk ratio needs at least one observation".into(),
        ));
    }
    let mu = mean(simple_returns);
    let n = Decimal::from(simple_returns.len() as i64);
    let variance: Decimal = simple_returns.iter().map(|r| (*r - mu) * (*r - mu)).sum::<Decimal>() / n;
    let std = sqrt_decimal(variance);
    if std.is_zero() {
        return Err(AllocationError::InvalidInput {
            field: "returns".into(),
            reason: "Returns have zero dispersion".into(),
        });
    }
    Ok(mu / std)
}
