//! Augmented-Lagrangian outer loop over a projected-gradient inner solve.
//!
//! The weights always stay in a convex [`Region`] (the simplex, or the simplex
//! with a cash residual) by exact projection. The only constraint left for the
//! Lagrangian is the volatility equality, when there is one. Each outer
//! iteration minimizes the Lagrangian over the region for a fixed multiplier
//! and penalty, then updates the multiplier from the constraint value.
//!
//! A solve is `Converged` only at a KKT point: the constraint holds within the
//! feasibility tolerance and the projected gradient of the Lagrangian is below
//! the stationarity tolerance.

use std::time::Instant;

use argmin::core::{
    CostFunction, Error, Executor, Gradient, IterState, Problem, Solver, State, TerminationReason,
    KV,
};
use thiserror::Error as ThisError;
use tracing::trace;

use super::model::{dot, Goal, PortfolioModel, Region, VolatilityTarget};
use super::SolverSettings;

/// Armijo sufficient-decrease constant.
const ARMIJO: f64 = 1e-4;
/// Step halvings before the line search gives up.
const MAX_BACKTRACKS: usize = 40;
const MIN_STEP: f64 = 1e-10;
const MAX_STEP: f64 = 1e10;

/// How a constrained solve ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SolveStatus {
    Converged,
    /// Iteration budget exhausted, or no further progress, short of a KKT point.
    NotConverged,
    /// The deadline passed, inside an inner solve or between outer iterations.
    DeadlineExpired,
}

#[derive(Debug, Clone)]
pub(crate) struct SolveResult {
    pub weights: Vec<f64>,
    pub status: SolveStatus,
    pub max_violation: f64,
    /// Projected-gradient norm of the Lagrangian at `weights`.
    pub stationarity: f64,
    pub outer_iterations: usize,
}

/// What to minimize, over which region, under which constraint.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Formulation {
    pub goal: Goal,
    pub region: Region,
    pub target: Option<VolatilityTarget>,
}

#[derive(Debug, ThisError)]
#[error("deadline passed during the inner solve")]
struct DeadlinePassed;

/// Augmented Lagrangian for a fixed multiplier and penalty.
#[derive(Clone)]
struct Lagrangian {
    model: PortfolioModel,
    goal: Goal,
    target: Option<VolatilityTarget>,
    multiplier: f64,
    penalty: f64,
    deadline: Option<Instant>,
}

impl Lagrangian {
    fn value(&self, w: &[f64]) -> f64 {
        let mut total = self.goal.value(&self.model, w);
        if let Some(c) = self.target {
            let v = c.value(&self.model, w);
            total += self.multiplier * v + 0.5 * self.penalty * v * v;
        }
        total
    }

    fn grad(&self, w: &[f64]) -> Vec<f64> {
        let mut g = self.goal.gradient(&self.model, w);
        if let Some(c) = self.target {
            let coef = self.multiplier + self.penalty * c.value(&self.model, w);
            c.add_gradient(&self.model, w, coef, &mut g);
        }
        g
    }

    /// Gradient of the plain Lagrangian f + λc, used for the KKT test.
    fn kkt_grad(&self, w: &[f64]) -> Vec<f64> {
        let mut g = self.goal.gradient(&self.model, w);
        if let Some(c) = self.target {
            c.add_gradient(&self.model, w, self.multiplier, &mut g);
        }
        g
    }

    fn violation(&self, w: &[f64]) -> f64 {
        self.target.map_or(0.0, |c| c.value(&self.model, w).abs())
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl CostFunction for Lagrangian {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        if self.expired() {
            return Err(DeadlinePassed.into());
        }
        Ok(self.value(x))
    }
}

impl Gradient for Lagrangian {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
        if self.expired() {
            return Err(DeadlinePassed.into());
        }
        Ok(self.grad(x))
    }
}

/// Minimize `form` from `start`, which is projected onto the region first.
pub(crate) fn solve(
    model: &PortfolioModel,
    form: &Formulation,
    start: Vec<f64>,
    settings: &SolverSettings,
    deadline: Option<Instant>,
) -> SolveResult {
    let mut lagrangian = Lagrangian {
        model: model.clone(),
        goal: form.goal,
        target: form.target,
        multiplier: 0.0,
        penalty: settings.initial_penalty,
        deadline,
    };
    let mut w = form.region.project(&start);
    let mut last_violation = lagrangian.violation(&w);
    let mut stationarity = f64::INFINITY;

    let timed_out = |w: Vec<f64>, violation: f64, stationarity: f64, outer: usize| SolveResult {
        weights: w,
        status: SolveStatus::DeadlineExpired,
        max_violation: violation,
        stationarity,
        outer_iterations: outer,
    };

    for outer in 0..settings.max_outer_iterations {
        if lagrangian.expired() {
            return timed_out(w, last_violation, stationarity, outer);
        }

        let next = match inner_minimize(&lagrangian, form.region, &w, settings) {
            Ok(next) => next,
            Err(err) if err.is::<DeadlinePassed>() => {
                return timed_out(w, last_violation, stationarity, outer);
            }
            Err(err) => {
                trace!(%err, "inner solve failed");
                w.clone()
            }
        };
        let step = w
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        w = next;

        let previous = (lagrangian.multiplier, lagrangian.penalty);
        if let Some(c) = lagrangian.target {
            lagrangian.multiplier += lagrangian.penalty * c.value(&lagrangian.model, &w);
        }
        let violation = lagrangian.violation(&w);
        stationarity = form.region.stationarity(&w, &lagrangian.kkt_grad(&w));
        trace!(
            outer,
            violation,
            stationarity,
            step,
            multiplier = lagrangian.multiplier,
            penalty = lagrangian.penalty,
            "augmented lagrangian iteration"
        );

        if violation <= settings.feasibility_tolerance
            && stationarity <= settings.stationarity_tolerance
        {
            return SolveResult {
                weights: w,
                status: SolveStatus::Converged,
                max_violation: violation,
                stationarity,
                outer_iterations: outer + 1,
            };
        }

        if violation > settings.violation_decrease * last_violation {
            lagrangian.penalty =
                (lagrangian.penalty * settings.penalty_growth).min(settings.max_penalty);
        }
        last_violation = violation;

        // Same point, same Lagrangian: another pass would repeat this one.
        if step == 0.0 && (lagrangian.multiplier, lagrangian.penalty) == previous {
            return SolveResult {
                weights: w,
                status: SolveStatus::NotConverged,
                max_violation: violation,
                stationarity,
                outer_iterations: outer + 1,
            };
        }
    }

    SolveResult {
        weights: w,
        status: SolveStatus::NotConverged,
        max_violation: last_violation,
        stationarity,
        outer_iterations: settings.max_outer_iterations,
    }
}

/// Projected-gradient run from `start`. Never returns a point worse than
/// `start`; fails only when the problem errors (a passed deadline).
fn inner_minimize(
    lagrangian: &Lagrangian,
    region: Region,
    start: &[f64],
    settings: &SolverSettings,
) -> Result<Vec<f64>, Error> {
    let solver = ProjectedGradient::new(region, settings.stationarity_tolerance);
    let x0 = start.to_vec();
    let result = Executor::new(lagrangian.clone(), solver)
        .configure(|state| state.param(x0).max_iters(settings.max_inner_iterations))
        .run()?;
    let state = result.state();
    trace!(
        iterations = state.get_iter(),
        reason = ?state.get_termination_reason(),
        "inner solve finished"
    );
    Ok(state
        .get_best_param()
        .cloned()
        .unwrap_or_else(|| start.to_vec()))
}

/// Spectral projected gradient (Birgin, Martínez and Raydan) with a monotone
/// Armijo backtrack. Every iterate is a convex combination of points in
/// `region`, so it stays there. Stops once the projected gradient is below
/// `tolerance`, or when the line search cannot make progress.
#[derive(Debug, Clone)]
struct ProjectedGradient {
    region: Region,
    tolerance: f64,
    /// Current spectral step length.
    step: f64,
}

type PgState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

impl ProjectedGradient {
    fn new(region: Region, tolerance: f64) -> Self {
        Self {
            region,
            tolerance,
            step: 1.0,
        }
    }
}

fn missing(what: &str) -> Error {
    Error::msg(format!("projected gradient state has no {what}"))
}

impl<O> Solver<O, PgState> for ProjectedGradient
where
    O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
    const NAME: &'static str = "Spectral projected gradient";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        mut state: PgState,
    ) -> Result<(PgState, Option<KV>), Error> {
        let start = state.take_param().ok_or_else(|| missing("start point"))?;
        let x = self.region.project(&start);
        let cost = problem.cost(&x)?;
        let grad = problem.gradient(&x)?;
        let residual = self.region.stationarity(&x, &grad);
        if residual > 0.0 {
            self.step = (1.0 / residual).clamp(MIN_STEP, MAX_STEP);
        }
        Ok((state.param(x).cost(cost).gradient(grad), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: PgState,
    ) -> Result<(PgState, Option<KV>), Error> {
        let x = state.take_param().ok_or_else(|| missing("iterate"))?;
        let g = state.take_gradient().ok_or_else(|| missing("gradient"))?;
        let cost = state.get_cost();

        if self.region.stationarity(&x, &g) <= self.tolerance {
            let state = state
                .param(x)
                .gradient(g)
                .terminate_with(TerminationReason::SolverConverged);
            return Ok((state, None));
        }

        let trial: Vec<f64> = x.iter().zip(&g).map(|(xi, gi)| xi - self.step * gi).collect();
        let direction: Vec<f64> = self
            .region
            .project(&trial)
            .iter()
            .zip(&x)
            .map(|(p, xi)| p - xi)
            .collect();
        let slope = dot(&g, &direction);

        let mut lambda = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate: Vec<f64> = x
                .iter()
                .zip(&direction)
                .map(|(xi, di)| xi + lambda * di)
                .collect();
            let candidate_cost = problem.cost(&candidate)?;
            if candidate_cost <= cost + ARMIJO * lambda * slope {
                accepted = Some((candidate, candidate_cost));
                break;
            }
            lambda *= 0.5;
        }
        let Some((next, next_cost)) = accepted else {
            let state = state
                .param(x)
                .gradient(g)
                .terminate_with(TerminationReason::SolverExit("line search stalled".into()));
            return Ok((state, None));
        };

        let next_grad = problem.gradient(&next)?;
        let s: Vec<f64> = next.iter().zip(&x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = next_grad.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        self.step = if sy > 0.0 {
            (dot(&s, &s) / sy).clamp(MIN_STEP, MAX_STEP)
        } else {
            MAX_STEP
        };
        Ok((state.param(next).cost(next_cost).gradient(next_grad), None))
    }
}
