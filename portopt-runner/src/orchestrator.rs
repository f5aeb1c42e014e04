//! Bootstrap / imputation orchestrator.
//!
//! Three entry points:
//! - `run()`: one optimization on the data as given
//! - `run_bootstrap()`: optimize every stationary-bootstrap replicate, mean the weights
//! - `run_imputed()`: optimize every imputed dataset, mean weights and metrics
//!
//! Work units are generated sequentially (so a seed fixes the whole run),
//! solved on a bounded rayon pool, collected completely, then reduced.
//! Infeasible and timed-out units contribute nothing to the mean.

use std::time::Instant;

use portopt_core::{
    compute_metrics, optimize, BootstrapError, BootstrapSampler, ImputeError, Imputer,
    MatrixError, MetricsError, ObjectiveChoice, ObjectiveError, ObjectiveSpec, OptimizeError,
    OptimizeOutcome, PortfolioMetrics, ReturnMatrix, WeightVector,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheKeyInputs, MemoCache};
use crate::config::{ConfigError, EngineConfig, RunKey};

/// Errors from the orchestrator. Infeasibility is never an error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("objective error: {0}")]
    Objective(#[from] ObjectiveError),
    #[error("optimizer error: {0}")]
    Optimize(#[from] OptimizeError),
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("imputation error: {0}")]
    Impute(#[from] ImputeError),
    #[error("benchmark alignment error: {0}")]
    Benchmark(#[from] MatrixError),
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
    #[error("worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0} count must be at least 1")]
    ZeroCount(&'static str),
}

/// Which orchestrator entry point produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Single,
    Bootstrap,
    Imputed,
}

/// What happened to every unit of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub kind: RunKind,
    /// Seed actually used (drawn from entropy when none was given).
    pub seed: Option<u64>,
    /// Mean block length of the bootstrap, when one ran.
    pub block_length: Option<usize>,
    /// Replicates or datasets generated.
    pub units: usize,
    pub feasible: usize,
    pub infeasible: usize,
    pub timed_out: usize,
}

/// Aggregated weights plus the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub weights: Option<WeightVector>,
    pub report: RunReport,
}

/// Metrics averaged over imputed datasets; `bench_*` only for benchmark mixes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    #[serde(rename = "Average")]
    pub average: f64,
    #[serde(rename = "Volatility")]
    pub volatility: f64,
    #[serde(rename = "Sharpe Ratio")]
    pub sharpe_ratio: f64,
    #[serde(rename = "Bench Average", skip_serializing_if = "Option::is_none", default)]
    pub bench_average: Option<f64>,
    #[serde(rename = "Bench Volatility", skip_serializing_if = "Option::is_none", default)]
    pub bench_volatility: Option<f64>,
    #[serde(rename = "Bench Sharpe Ratio", skip_serializing_if = "Option::is_none", default)]
    pub bench_sharpe_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputedOutput {
    pub weights: Option<WeightVector>,
    pub metrics: Option<AggregateMetrics>,
    pub report: RunReport,
}

impl ImputedOutput {
    pub fn into_parts(self) -> (Option<WeightVector>, Option<AggregateMetrics>) {
        (self.weights, self.metrics)
    }
}

/// Outputs that carry a run report.
trait Reported {
    fn report(&self) -> &RunReport;
}

impl Reported for RunOutput {
    fn report(&self) -> &RunReport {
        &self.report
    }
}

impl Reported for ImputedOutput {
    fn report(&self) -> &RunReport {
        &self.report
    }
}

/// One optimization to perform. `None` objective: the unit's target could
/// not be formed (e.g. a flat benchmark slice) and it counts as infeasible.
struct Unit {
    data: ReturnMatrix,
    objective: Option<ObjectiveSpec>,
}

/// Owns the worker pool, configuration and memo caches.
pub struct Orchestrator {
    config: EngineConfig,
    pool: rayon::ThreadPool,
    runs: MemoCache<RunOutput>,
    imputed: MemoCache<ImputedOutput>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Result<Self, RunError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("portopt-worker-{i}"))
            .build()?;
        Ok(Self {
            config,
            pool,
            runs: MemoCache::new(),
            imputed: MemoCache::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop one cached result. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let a = self.runs.invalidate(key);
        let b = self.imputed.invalidate(key);
        a || b
    }

    pub fn clear_cache(&self) {
        self.runs.clear();
        self.imputed.clear();
    }

    /// Single optimization of `returns`.
    pub fn run(
        &self,
        objective: &ObjectiveChoice,
        returns: &ReturnMatrix,
        benchmark: Option<&ReturnMatrix>,
    ) -> Result<RunOutput, RunError> {
        let key = self.key(RunKind::Single, objective, returns, benchmark, 1, None);
        memoized(&self.runs, Some(key), || {
            let unit = Unit {
                data: returns.clone(),
                objective: unit_objective(objective, benchmark)?,
            };
            let outcomes = self.solve_all(vec![unit]);
            let (weights, report) = tally(RunKind::Single, outcomes)?;
            Ok(RunOutput {
                weights: aggregate_weights(&weights),
                report,
            })
        })
    }

    /// Stationary-bootstrap `count` replicates of `returns`, optimize each,
    /// and mean the feasible weight vectors.
    pub fn run_bootstrap(
        &self,
        objective: &ObjectiveChoice,
        returns: &ReturnMatrix,
        benchmark: Option<&ReturnMatrix>,
        count: usize,
        seed: Option<u64>,
    ) -> Result<RunOutput, RunError> {
        if count == 0 {
            return Err(RunError::ZeroCount("bootstrap"));
        }
        if objective.uses_benchmark() && benchmark.is_none() {
            return Err(ObjectiveError::MissingBenchmark.into());
        }
        let key = seed.map(|s| self.key(RunKind::Bootstrap, objective, returns, benchmark, count, Some(s)));
        let seed = resolve_seed(seed, "bootstrap");

        memoized(&self.runs, key, || {
            let sampler = BootstrapSampler::new(returns, &self.config.bootstrap, seed)?;
            let units = bootstrap_units(&sampler, objective, benchmark, count)?;
            let outcomes = self.solve_all(units);
            let (weights, mut report) = tally(RunKind::Bootstrap, outcomes)?;
            report.seed = Some(seed);
            report.block_length = Some(sampler.block_length());
            log_summary(&report);
            Ok(RunOutput {
                weights: aggregate_weights(&weights),
                report,
            })
        })
    }

    /// Impute `count` datasets from `returns`, optimize each, and average
    /// both the weights and the per-dataset metrics.
    pub fn run_imputed(
        &self,
        objective: &ObjectiveChoice,
        returns: &ReturnMatrix,
        benchmark: Option<&ReturnMatrix>,
        count: usize,
        seed: Option<u64>,
    ) -> Result<ImputedOutput, RunError> {
        if count == 0 {
            return Err(RunError::ZeroCount("imputation"));
        }
        let key = seed.map(|s| self.key(RunKind::Imputed, objective, returns, benchmark, count, Some(s)));
        let seed = resolve_seed(seed, "imputation");

        memoized(&self.imputed, key, || {
            let spec = unit_objective(objective, benchmark)?;
            let imputer = Imputer::new(returns, self.config.impute.clone(), seed)?;
            let datasets: Vec<ReturnMatrix> = imputer.datasets(count).collect();
            let units = datasets
                .iter()
                .map(|data| Unit {
                    data: data.clone(),
                    objective: spec,
                })
                .collect();

            let outcomes = self.solve_all(units);
            let (weights, mut report) = tally(RunKind::Imputed, outcomes)?;
            report.seed = Some(seed);
            log_summary(&report);

            let bench_metrics = match (objective.benchmark_mix(), benchmark) {
                (Some(mix), Some(b)) => Some(compute_metrics(b, &mix.weights())?),
                _ => None,
            };
            let mut per_dataset = Vec::new();
            for (data, w) in datasets.iter().zip(&weights) {
                if let Some(w) = w {
                    per_dataset.push(compute_metrics(data, w)?);
                }
            }
            Ok(ImputedOutput {
                weights: aggregate_weights(&weights),
                metrics: aggregate_metrics(&per_dataset, bench_metrics),
                report,
            })
        })
    }

    fn key(
        &self,
        kind: RunKind,
        objective: &ObjectiveChoice,
        returns: &ReturnMatrix,
        benchmark: Option<&ReturnMatrix>,
        count: usize,
        seed: Option<u64>,
    ) -> RunKey {
        CacheKeyInputs {
            kind,
            objective,
            returns,
            benchmark,
            count,
            seed,
            config: &self.config,
        }
        .key()
    }

    /// Solve every unit on the pool; order of results matches `units`.
    fn solve_all(&self, units: Vec<Unit>) -> Vec<Result<OptimizeOutcome, OptimizeError>> {
        let settings = &self.config.solver;
        let timeout = self.config.task_timeout();
        self.pool.install(|| {
            units
                .into_par_iter()
                .map(|unit| match unit.objective {
                    Some(spec) => {
                        let deadline = Instant::now() + timeout;
                        optimize(&unit.data, &spec, settings, Some(deadline))
                    }
                    None => Ok(OptimizeOutcome::Infeasible),
                })
                .collect()
        })
    }
}

/// Only runs with a caller-supplied seed are reproducible, so only those
/// are cached. A run where any unit timed out depends on machine load; it
/// is returned but not stored.
fn memoized<V: Clone + Reported>(
    cache: &MemoCache<V>,
    key: Option<RunKey>,
    compute: impl FnOnce() -> Result<V, RunError>,
) -> Result<V, RunError> {
    match key {
        Some(key) => cache.get_or_try_insert(key, compute, |out| out.report().timed_out == 0),
        None => compute(),
    }
}

/// One unit per replicate, in draw order. For benchmark-mix objectives every
/// replicate gets its own target: the mix volatility on the benchmark rows
/// carrying the replicate's labels.
fn bootstrap_units(
    sampler: &BootstrapSampler,
    objective: &ObjectiveChoice,
    benchmark: Option<&ReturnMatrix>,
    count: usize,
) -> Result<Vec<Unit>, RunError> {
    let mut units = Vec::with_capacity(count);
    for (i, replicate) in sampler.replicates(count).enumerate() {
        let aligned = match benchmark {
            Some(b) if objective.uses_benchmark() => Some(b.select_labels(replicate.dates())?),
            _ => None,
        };
        let spec = unit_objective(objective, aligned.as_ref())?;
        debug!(replicate = i, ?spec, "replicate generated");
        units.push(Unit {
            data: replicate,
            objective: spec,
        });
    }
    Ok(units)
}

/// Resolve the user's objective for one unit. A benchmark slice with no
/// variation has no usable target; that unit is infeasible, not an error.
fn unit_objective(
    objective: &ObjectiveChoice,
    benchmark: Option<&ReturnMatrix>,
) -> Result<Option<ObjectiveSpec>, ObjectiveError> {
    match objective.resolve(benchmark) {
        Ok(spec) => Ok(Some(spec)),
        Err(ObjectiveError::InvalidTarget(t)) if objective.uses_benchmark() => {
            debug!(target = t, "benchmark slice gives no usable target");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn resolve_seed(seed: Option<u64>, what: &str) -> u64 {
    match seed {
        Some(s) => s,
        None => {
            let s = rand::random::<u64>();
            info!(seed = s, "{what} seed drawn from entropy");
            s
        }
    }
}

/// Count outcomes; structural errors abort the run.
fn tally(
    kind: RunKind,
    outcomes: Vec<Result<OptimizeOutcome, OptimizeError>>,
) -> Result<(Vec<Option<WeightVector>>, RunReport), RunError> {
    let mut report = RunReport {
        kind,
        seed: None,
        block_length: None,
        units: outcomes.len(),
        feasible: 0,
        infeasible: 0,
        timed_out: 0,
    };
    let mut weights = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome? {
            OptimizeOutcome::Solved(w) => {
                report.feasible += 1;
                weights.push(Some(w));
            }
            OptimizeOutcome::Infeasible => {
                report.infeasible += 1;
                weights.push(None);
            }
            OptimizeOutcome::TimedOut => {
                report.timed_out += 1;
                weights.push(None);
            }
        }
    }
    Ok((weights, report))
}

fn log_summary(report: &RunReport) {
    info!(
        kind = ?report.kind,
        seed = ?report.seed,
        block_length = ?report.block_length,
        units = report.units,
        feasible = report.feasible,
        infeasible = report.infeasible,
        timed_out = report.timed_out,
        "run complete"
    );
    if report.feasible == 0 {
        warn!(units = report.units, "no unit produced feasible weights");
    }
    if report.timed_out > 0 {
        warn!(timed_out = report.timed_out, "units exceeded the task timeout");
    }
}

/// Element-wise mean of the `Some` vectors; `None` if there are none.
///
/// A running mean, so identical inputs reproduce themselves exactly.
pub fn aggregate_weights(results: &[Option<WeightVector>]) -> Option<WeightVector> {
    let mut mean: Option<WeightVector> = None;
    let mut seen = 0usize;
    for w in results.iter().flatten() {
        seen += 1;
        match mean.as_mut() {
            None => mean = Some(w.clone()),
            Some(m) => {
                for (acc, x) in m.iter_mut().zip(w) {
                    *acc += (x - *acc) / seen as f64;
                }
            }
        }
    }
    mean
}

/// Mean of per-dataset metrics, with the benchmark's alongside.
pub fn aggregate_metrics(
    per_dataset: &[PortfolioMetrics],
    bench: Option<PortfolioMetrics>,
) -> Option<AggregateMetrics> {
    if per_dataset.is_empty() {
        return None;
    }
    let n = per_dataset.len() as f64;
    let avg = |f: fn(&PortfolioMetrics) -> f64| per_dataset.iter().map(f).sum::<f64>() / n;
    Some(AggregateMetrics {
        average: avg(|m| m.average),
        volatility: avg(|m| m.volatility),
        sharpe_ratio: avg(|m| m.sharpe_ratio),
        bench_average: bench.map(|b| b.average),
        bench_volatility: bench.map(|b| b.volatility),
        bench_sharpe_ratio: bench.map(|b| b.sharpe_ratio),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    fn wave(n: usize, drift: f64, amp: f64, freq: f64) -> Vec<f64> {
        (0..n)
            .map(|i| drift + amp * ((freq * i as f64).sin() + 0.4 * (2.7 * freq * i as f64).cos()))
            .collect()
    }

    fn returns(n: usize) -> ReturnMatrix {
        ReturnMatrix::from_columns(
            dates(n),
            vec![
                ("equity".into(), wave(n, 0.0006, 0.010, 0.7)),
                ("bonds".into(), wave(n, 0.0002, 0.003, 1.9)),
                ("gold".into(), wave(n, 0.0003, 0.007, 0.31)),
            ],
        )
        .unwrap()
    }

    fn orchestrator(threads: usize) -> Orchestrator {
        Orchestrator::new(EngineConfig {
            worker_threads: threads,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn half_infeasible_aggregates_to_the_feasible_vector() {
        let w = vec![0.2, 0.3, 0.5];
        let mut results = vec![None; 50];
        results.extend(std::iter::repeat(Some(w.clone())).take(50));
        assert_eq!(aggregate_weights(&results), Some(w));
    }

    #[test]
    fn all_infeasible_aggregates_to_none() {
        let results: Vec<Option<WeightVector>> = vec![None; 100];
        assert_eq!(aggregate_weights(&results), None);
    }

    #[test]
    fn aggregate_is_elementwise_mean() {
        let results = vec![Some(vec![1.0, 0.0]), None, Some(vec![0.0, 1.0])];
        assert_eq!(aggregate_weights(&results), Some(vec![0.5, 0.5]));
    }

    #[test]
    fn aggregate_metrics_needs_at_least_one_dataset() {
        assert_eq!(aggregate_metrics(&[], None), None);
        let m = PortfolioMetrics {
            average: 0.01,
            volatility: 0.02,
            sharpe_ratio: 0.5,
        };
        let agg = aggregate_metrics(&[m, m], Some(m)).unwrap();
        assert_eq!(agg.average, 0.01);
        assert_eq!(agg.bench_sharpe_ratio, Some(0.5));
    }

    #[test]
    fn fixed_seed_bootstrap_is_reproducible_across_pool_sizes() {
        let m = returns(90);
        let a = orchestrator(1)
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &m, None, 8, Some(17))
            .unwrap();
        let b = orchestrator(4)
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &m, None, 8, Some(17))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.report.seed, Some(17));
        assert_eq!(a.report.units, 8);
        assert_eq!(
            a.report.feasible + a.report.infeasible + a.report.timed_out,
            8
        );
    }

    #[test]
    fn unreachable_target_everywhere_gives_none() {
        let m = returns(60);
        let out = orchestrator(2)
            .run_bootstrap(
                &ObjectiveChoice::FixedVolatility { target: 0.5 },
                &m,
                None,
                4,
                Some(1),
            )
            .unwrap();
        assert_eq!(out.weights, None);
        assert_eq!(out.report.infeasible, 4);
        assert_eq!(out.report.feasible, 0);
    }

    #[test]
    fn expired_budget_counts_as_timeout() {
        let o = Orchestrator::new(EngineConfig {
            worker_threads: 2,
            task_timeout_secs: 1e-9,
            ..EngineConfig::default()
        })
        .unwrap();
        let out = o
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &returns(60), None, 3, Some(5))
            .unwrap();
        assert_eq!(out.weights, None);
        assert_eq!(out.report.timed_out, 3);
    }

    #[test]
    fn benchmark_objective_needs_a_benchmark() {
        let mix = portopt_core::BenchmarkMix::new(0.6, 0.4).unwrap();
        let err = orchestrator(1)
            .run_bootstrap(&ObjectiveChoice::BenchmarkEquivalent(mix), &returns(40), None, 2, Some(0))
            .unwrap_err();
        assert!(matches!(err, RunError::Objective(ObjectiveError::MissingBenchmark)));
    }

    #[test]
    fn zero_count_is_rejected() {
        let err = orchestrator(1)
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &returns(40), None, 0, Some(0))
            .unwrap_err();
        assert!(matches!(err, RunError::ZeroCount(_)));
    }

    #[test]
    fn seeded_runs_are_memoized_until_invalidated() {
        let o = orchestrator(2);
        let m = returns(50);
        let first = o
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &m, None, 3, Some(9))
            .unwrap();
        let key = o.key(RunKind::Bootstrap, &ObjectiveChoice::MaxSharpe, &m, None, 3, Some(9));
        assert!(o.runs.contains(&key));
        assert_eq!(
            o.run_bootstrap(&ObjectiveChoice::MaxSharpe, &m, None, 3, Some(9)).unwrap(),
            first
        );
        assert!(o.invalidate(&key));
        assert!(!o.runs.contains(&key));
    }

    #[test]
    fn unseeded_runs_are_not_cached() {
        let o = orchestrator(1);
        let out = o
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &returns(40), None, 2, None)
            .unwrap();
        assert!(out.report.seed.is_some());
        assert!(o.runs.is_empty());
    }

    #[test]
    fn imputed_run_averages_weights_and_metrics() {
        let mut young = wave(60, 0.0005, 0.008, 0.45);
        young.iter_mut().take(15).for_each(|v| *v = f64::NAN);
        let m = ReturnMatrix::from_columns(
            dates(60),
            vec![
                ("young".into(), young),
                ("bonds".into(), wave(60, 0.0002, 0.003, 1.9)),
                ("gold".into(), wave(60, 0.0003, 0.007, 0.31)),
            ],
        )
        .unwrap();
        let bench = ReturnMatrix::from_columns(
            dates(60),
            vec![
                ("acwi".into(), wave(60, 0.0004, 0.009, 0.6)),
                ("bnd".into(), wave(60, 0.0001, 0.002, 1.3)),
            ],
        )
        .unwrap();

        let o = orchestrator(2);
        let out = o
            .run_imputed(&ObjectiveChoice::MaxSharpe, &m, Some(&bench), 3, Some(4))
            .unwrap();
        assert_eq!(out.report.units, 3);
        let w = out.weights.unwrap();
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        let metrics = out.metrics.unwrap();
        assert!(metrics.volatility > 0.0);
        assert_eq!(metrics.bench_average, None);

        let mix = portopt_core::BenchmarkMix::new(0.6, 0.4).unwrap();
        let with_bench = o
            .run_imputed(&ObjectiveChoice::BenchmarkEquivalent(mix), &m, Some(&bench), 3, Some(4))
            .unwrap();
        assert!(with_bench.report.feasible > 0, "{:?}", with_bench.report);
        let metrics = with_bench.metrics.expect("feasible datasets have metrics");
        let expected = compute_metrics(&bench, &mix.weights()).unwrap();
        assert_eq!(metrics.bench_volatility, Some(expected.volatility));
        assert_eq!(metrics.bench_sharpe_ratio, Some(expected.sharpe_ratio));
    }

    #[test]
    fn timed_out_runs_are_not_cached() {
        let o = Orchestrator::new(EngineConfig {
            worker_threads: 2,
            task_timeout_secs: 1e-9,
            ..EngineConfig::default()
        })
        .unwrap();
        let m = returns(60);
        let boot = o
            .run_bootstrap(&ObjectiveChoice::MaxSharpe, &m, None, 3, Some(5))
            .unwrap();
        assert_eq!(boot.report.timed_out, 3);
        let single = o.run(&ObjectiveChoice::MaxSharpe, &m, None).unwrap();
        assert_eq!(single.report.timed_out, 1);
        assert!(o.runs.is_empty());
    }

    #[test]
    fn completed_single_runs_are_cached() {
        let o = orchestrator(1);
        let m = returns(50);
        let out = o.run(&ObjectiveChoice::MaxSharpe, &m, None).unwrap();
        assert_eq!(out.report.timed_out, 0);
        let key = o.key(RunKind::Single, &ObjectiveChoice::MaxSharpe, &m, None, 1, None);
        assert_eq!(o.runs.get(&key), Some(out));
    }

    #[test]
    fn every_replicate_targets_its_own_benchmark_rows() {
        let m = returns(80);
        let bench = ReturnMatrix::from_columns(
            dates(80),
            vec![
                ("acwi".into(), wave(80, 0.0004, 0.009, 0.6)),
                ("bnd".into(), wave(80, 0.0001, 0.002, 1.3)),
            ],
        )
        .unwrap();
        let mix = portopt_core::BenchmarkMix::new(0.6, 0.4).unwrap();
        let objective = ObjectiveChoice::BenchmarkEquivalent(mix);
        let sampler = BootstrapSampler::new(&m, &EngineConfig::default().bootstrap, 21).unwrap();

        let units = bootstrap_units(&sampler, &objective, Some(&bench), 6).unwrap();
        assert_eq!(units.len(), 6);
        let full_sample = mix.volatility(&bench).unwrap();
        let mut targets = Vec::new();
        for (unit, replicate) in units.iter().zip(sampler.replicates(6)) {
            assert_eq!(unit.data, replicate);
            let aligned = bench.select_labels(unit.data.dates()).unwrap();
            let expected = mix.volatility(&aligned).unwrap();
            assert_eq!(
                unit.objective,
                Some(ObjectiveSpec::TargetVolatility { target: expected })
            );
            targets.push(expected);
        }
        assert!(targets.iter().any(|t| (t - full_sample).abs() > 1e-12));
        assert!(targets.windows(2).any(|w| w[0] != w[1]));
    }
}
