use rust_decimal::Decimal;

use crate::error::AllocationError;
use crate::risk_parity::matrix::CovarianceMatrix;
use crate::types::Rate;
use crate::AllocationResult;

/// Sample (n-1) covariance matrix of equally long return columns.
pub fn sample_covariance(
    labels: Vec<String>,
    columns: &[&[Rate]],
) -> AllocationResult<CovarianceMatrix> {
    if labels.len() != columns.len() {
        return Err(AllocationError::InputShape {
            field: "columns".into(),
            reason: format!(
                "Expected {} columns (one per label), got {}",
                labels.len(),
                columns.len()
            ),
        });
    }
    let len = columns.first().map_or(0, |c| c.len());
    if let Some((i, c)) = columns.iter().enumerate().find(|(_, c)| c.len() != len) {
        return Err(AllocationError::InputShape {
            field: format!("columns[{}]", labels[i]),
            reason: format!("Expected {} observations, got {}", len, c.len()),
        });
    }
    if len < 2 {
        return Err(AllocationError::InsufficientData(format!(
            "At least 2 observations required for a covariance estimate, got {}",
            len
        )));
    }

    let means: Vec<Decimal> = columns.iter().map(|c| mean(c)).collect();
    let n = columns.len();
    let mut rows = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        for j in i..n {
            let cov = covariance(columns[i], columns[j], means[i], means[j]);
            rows[i][j] = cov;
            rows[j][i] = cov;
        }
    }
    CovarianceMatrix::new(labels, rows)
}

/// Arithmetic mean; zero for an empty slice.
pub fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().sum();
    sum / Decimal::from(values.len() as i64)
}

/// Covariance between two series (sample, n-1)
fn covariance(x: &[Decimal], y: &[Decimal], x_mean: Decimal, y_mean: Decimal) -> Decimal {
    let n = x.len();
    if n < 2 {
        return Decimal::ZERO;
    }
    let sum: Decimal = x
        .iter()
        .zip(y.iter())
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum();
    sum / Decimal::from((n - 1) as i64)
}
