//! Long-only portfolio optimizer.
//!
//! Two objectives, both solved by an augmented-Lagrangian method over the
//! simplex of long-only weights:
//!
//! 1. `MaximizeSharpe`: maximize mean / std, fully invested
//! 2. `TargetVolatility`: maximize mean at a fixed std, fully invested,
//!    falling back to a cash residual (0 ≤ Σw ≤ 1) when that is infeasible
//!
//! Returns are scaled by [`RETURN_SCALE`] before solving so that daily returns
//! sit near unit magnitude. The target is scaled the same way.

mod model;
mod solver;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::matrix::ReturnMatrix;
use crate::objective::ObjectiveSpec;
use model::{unit_vector, Goal, PortfolioModel, Region, VolatilityTarget};
use solver::{solve, Formulation, SolveResult, SolveStatus};

/// Multiplier applied to returns (and the volatility target) before solving.
pub const RETURN_SCALE: f64 = 100.0;

/// A weight per column of the return matrix, in column order.
pub type WeightVector = Vec<f64>;

/// Structural problems with the optimizer input.
#[derive(Debug, Error, PartialEq)]
pub enum OptimizeError {
    #[error("optimizer needs at least 2 assets, got {0}")]
    TooFewAssets(usize),
    #[error("optimizer needs at least 2 observations, got {0}")]
    TooFewObservations(usize),
    #[error("return matrix has a missing or non-finite value in column '{0}'")]
    NonFinite(String),
    #[error("target volatility must be positive and finite, got {0}")]
    InvalidTarget(f64),
}

/// Tuning for the augmented-Lagrangian solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Max volatility-constraint violation accepted as feasible, in scaled units.
    pub feasibility_tolerance: f64,
    /// Max projected-gradient norm of the Lagrangian accepted as stationary.
    pub stationarity_tolerance: f64,
    pub max_outer_iterations: usize,
    /// Projected-gradient iterations per outer iteration.
    pub max_inner_iterations: u64,
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    /// Grow the penalty unless the violation falls below this fraction of the last one.
    pub violation_decrease: f64,
    pub max_penalty: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            feasibility_tolerance: 1e-6,
            stationarity_tolerance: 1e-6,
            max_outer_iterations: 60,
            max_inner_iterations: 1000,
            initial_penalty: 100.0,
            penalty_growth: 10.0,
            violation_decrease: 0.25,
            max_penalty: 1e6,
        }
    }
}

/// Result of one optimization.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOutcome {
    Solved(WeightVector),
    /// Neither formulation converged.
    Infeasible,
    /// The deadline passed before the solver converged.
    TimedOut,
}

impl OptimizeOutcome {
    pub fn weights(&self) -> Option<&WeightVector> {
        match self {
            Self::Solved(w) => Some(w),
            Self::Infeasible | Self::TimedOut => None,
        }
    }

    pub fn into_weights(self) -> Option<WeightVector> {
        match self {
            Self::Solved(w) => Some(w),
            Self::Infeasible | Self::TimedOut => None,
        }
    }
}

/// Optimize with default settings and no deadline.
pub fn optimize_portfolio(
    returns: &ReturnMatrix,
    objective: &ObjectiveSpec,
) -> Result<Option<WeightVector>, OptimizeError> {
    Ok(optimize(returns, objective, &SolverSettings::default(), None)?.into_weights())
}

/// Optimize `objective` over `returns`.
///
/// Structural problems are errors. An infeasible or non-converged problem is
/// `Infeasible`; a passed deadline is `TimedOut`.
pub fn optimize(
    returns: &ReturnMatrix,
    objective: &ObjectiveSpec,
    settings: &SolverSettings,
    deadline: Option<Instant>,
) -> Result<OptimizeOutcome, OptimizeError> {
    validate(returns)?;
    let model = PortfolioModel::new(returns, RETURN_SCALE);

    match *objective {
        ObjectiveSpec::MaximizeSharpe => Ok(max_sharpe(&model, settings, deadline)),
        ObjectiveSpec::TargetVolatility { target } => {
            if !(target.is_finite() && target > 0.0) {
                return Err(OptimizeError::InvalidTarget(target));
            }
            Ok(target_volatility(&model, target * RETURN_SCALE, settings, deadline))
        }
    }
}

fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

fn max_sharpe(
    model: &PortfolioModel,
    settings: &SolverSettings,
    deadline: Option<Instant>,
) -> OptimizeOutcome {
    let n = model.n_assets();
    let form = Formulation {
        goal: Goal::NegativeSharpe,
        region: Region::Simplex,
        target: None,
    };
    let first = solve(model, &form, equal_weights(n), settings, deadline);
    if first.status != SolveStatus::Converged {
        return finish(first, Investment::Full);
    }

    // With negative means Sharpe is not quasi-concave, so the stationary point
    // reached from the centre can lose to a single asset. Restart from the
    // best asset when it does.
    let sharpe = |w: &[f64]| -form.goal.value(model, w);
    let best_asset = (0..n)
        .map(|i| unit_vector(n, i))
        .max_by(|a, b| sharpe(a).total_cmp(&sharpe(b)));
    match best_asset {
        Some(vertex) if sharpe(&vertex) > sharpe(&first.weights) => {
            debug!("single asset beats the stationary point, restarting from it");
            let second = solve(model, &form, vertex, settings, deadline);
            match second.status {
                SolveStatus::Converged if sharpe(&second.weights) >= sharpe(&first.weights) => {
                    finish(second, Investment::Full)
                }
                SolveStatus::DeadlineExpired => finish(second, Investment::Full),
                _ => finish(first, Investment::Full),
            }
        }
        _ => finish(first, Investment::Full),
    }
}

/// `target` is in scaled units.
fn target_volatility(
    model: &PortfolioModel,
    target: f64,
    settings: &SolverSettings,
    deadline: Option<Instant>,
) -> OptimizeOutcome {
    let Some(start) = volatility_start(model, Region::Simplex, target) else {
        debug!(target = target / RETURN_SCALE, "target above every asset's volatility");
        return OptimizeOutcome::Infeasible;
    };
    let primary = Formulation {
        goal: Goal::NegativeMean,
        region: Region::Simplex,
        target: Some(VolatilityTarget(target)),
    };
    match finish(solve(model, &primary, start.clone(), settings, deadline), Investment::Full) {
        OptimizeOutcome::Infeasible => {}
        other => return other,
    }

    debug!(
        target = target / RETURN_SCALE,
        "fully invested target infeasible, retrying with cash residual"
    );
    let fallback = Formulation {
        region: Region::CappedSimplex,
        ..primary
    };
    let start = volatility_start(model, Region::CappedSimplex, target).unwrap_or(start);
    finish(solve(model, &fallback, start, settings, deadline), Investment::Partial)
}

/// A point of `region` with volatility `target`: bisection along the segment
/// from the equal-weight portfolio (or the calmest vertex) to the wildest
/// vertex. Volatility is convex, so it peaks at a vertex: when no vertex
/// reaches the target, nothing in the region does and the result is `None`.
/// When every candidate is above the target the equal-weight portfolio is
/// returned unchanged.
fn volatility_start(model: &PortfolioModel, region: Region, target: f64) -> Option<Vec<f64>> {
    let n = model.n_assets();
    let mut points = vec![equal_weights(n)];
    points.extend(region.vertices(n));
    let vols: Vec<f64> = points.iter().map(|p| model.std(p)).collect();

    let by_vol = |a: &usize, b: &usize| vols[*a].total_cmp(&vols[*b]);
    let high = if vols[0] >= target {
        0
    } else {
        (0..points.len()).max_by(by_vol).filter(|&i| vols[i] >= target)?
    };
    let low = if vols[0] <= target {
        Some(0)
    } else {
        (0..points.len()).min_by(by_vol).filter(|&i| vols[i] <= target)
    };
    let Some(low) = low else {
        return Some(points.swap_remove(0));
    };

    let (from, to) = (&points[low], &points[high]);
    let along = |t: f64| -> Vec<f64> { from.iter().zip(to).map(|(a, b)| a + (b - a) * t).collect() };
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if model.std(&along(mid)) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(along(hi))
}

fn validate(returns: &ReturnMatrix) -> Result<(), OptimizeError> {
    if returns.n_cols() < 2 {
        return Err(OptimizeError::TooFewAssets(returns.n_cols()));
    }
    if returns.n_rows() < 2 {
        return Err(OptimizeError::TooFewObservations(returns.n_rows()));
    }
    for row in returns.rows() {
        if let Some(c) = row.iter().position(|v| !v.is_finite()) {
            return Err(OptimizeError::NonFinite(returns.columns()[c].clone()));
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Investment {
    Full,
    Partial,
}

/// Clip round-off out of a converged solution; anything else is not a result.
fn finish(result: SolveResult, investment: Investment) -> OptimizeOutcome {
    match result.status {
        SolveStatus::Converged => {}
        SolveStatus::NotConverged => {
            debug!(
                violation = result.max_violation,
                stationarity = result.stationarity,
                iterations = result.outer_iterations,
                "solver did not converge"
            );
            return OptimizeOutcome::Infeasible;
        }
        SolveStatus::DeadlineExpired => return OptimizeOutcome::TimedOut,
    }

    let mut w: Vec<f64> = result.weights.iter().map(|x| x.clamp(0.0, 1.0)).collect();
    let total: f64 = w.iter().sum();
    let renormalise = match investment {
        Investment::Full => total > 0.0,
        Investment::Partial => total > 1.0,
    };
    if renormalise {
        w.iter_mut().for_each(|x| *x /= total);
    }
    OptimizeOutcome::Solved(w)
}
