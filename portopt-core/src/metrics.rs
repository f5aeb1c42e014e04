//! Portfolio metrics: pure functions over a weighted return matrix.
//!
//! Every metric is a pure function: returns and weights in, scalar out.
//! Standard deviation is the population form (divide by N), matching what
//! the optimizer constrains.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::ReturnMatrix;

/// Errors from metric computation.
#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("{weights} weights for {columns} columns")]
    WeightCount { weights: usize, columns: usize },
}

/// Summary statistics of a weighted portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub average: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Compute Average, Volatility and Sharpe Ratio of `weights` applied to `returns`.
pub fn compute_metrics(
    returns: &ReturnMatrix,
    weights: &[f64],
) -> Result<PortfolioMetrics, MetricsError> {
    let series = checked_portfolio_returns(returns, weights)?;
    Ok(PortfolioMetrics {
        average: mean(&series),
        volatility: population_std(&series),
        sharpe_ratio: sharpe_ratio(&series),
    })
}

/// Population standard deviation of the weighted portfolio.
pub fn portfolio_volatility(
    returns: &ReturnMatrix,
    weights: &[f64],
) -> Result<f64, MetricsError> {
    let series = checked_portfolio_returns(returns, weights)?;
    Ok(population_std(&series))
}

fn checked_portfolio_returns(
    returns: &ReturnMatrix,
    weights: &[f64],
) -> Result<Vec<f64>, MetricsError> {
    if weights.len() != returns.n_cols() {
        return Err(MetricsError::WeightCount {
            weights: weights.len(),
            columns: returns.n_cols(),
        });
    }
    Ok(portfolio_returns(returns.rows(), weights))
}

// ─── Individual metric functions ────────────────────────────────────

/// Per-period portfolio return: dot product of each row with the weights.
pub fn portfolio_returns(rows: &[Vec<f64>], weights: &[f64]) -> Vec<f64> {
    rows.iter()
        .map(|r| r.iter().zip(weights).map(|(x, w)| x * w).sum())
        .collect()
}

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation (divides by N, not N-1).
pub fn population_std(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

/// Mean divided by population standard deviation, unannualized.
///
/// Returns 0.0 when the series has no variation.
pub fn sharpe_ratio(xs: &[f64]) -> f64 {
    let std = population_std(xs);
    if std < 1e-15 {
        return 0.0;
    }
    mean(xs) / std
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::test_support::matrix;
    use approx::assert_relative_eq;

    #[test]
    fn population_std_divides_by_n() {
        // values 1, 3 → mean 2, deviations ±1 → population var 1
        assert_relative_eq!(population_std(&[1.0, 3.0]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sharpe_of_flat_series_is_zero() {
        assert_eq!(sharpe_ratio(&[0.01; 10]), 0.0);
    }

    #[test]
    fn compute_metrics_on_two_assets() {
        let m = matrix(&[
            ("a", vec![0.02, 0.0, 0.02, 0.0]),
            ("b", vec![0.0, 0.02, 0.0, 0.02]),
        ]);
        let metrics = compute_metrics(&m, &[0.5, 0.5]).unwrap();
        assert_relative_eq!(metrics.average, 0.01, epsilon = 1e-12);
        assert_relative_eq!(metrics.volatility, 0.0, epsilon = 1e-15);
        assert_eq!(metrics.sharpe_ratio, 0.0);

        let metrics = compute_metrics(&m, &[1.0, 0.0]).unwrap();
        assert_relative_eq!(metrics.average, 0.01, epsilon = 1e-12);
        assert_relative_eq!(metrics.volatility, 0.01, epsilon = 1e-12);
        assert_relative_eq!(metrics.sharpe_ratio, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn weight_count_mismatch_is_an_error() {
        let m = matrix(&[("a", vec![0.01, 0.02])]);
        assert_eq!(
            compute_metrics(&m, &[0.5, 0.5]).unwrap_err(),
            MetricsError::WeightCount {
                weights: 2,
                columns: 1
            }
        );
    }

    #[test]
    fn cash_shortfall_scales_volatility() {
        let m = matrix(&[("a", vec![0.03, -0.01, 0.02, 0.0])]);
        let full = portfolio_volatility(&m, &[1.0]).unwrap();
        let half = portfolio_volatility(&m, &[0.5]).unwrap();
        assert_relative_eq!(half, full / 2.0, epsilon = 1e-15);
    }
}
