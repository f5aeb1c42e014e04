//! Optimization objectives.
//!
//! - `ObjectiveSpec`: what the optimizer solves, with a concrete volatility target.
//! - `BenchmarkMix`: a stock/bond blend whose volatility becomes the target.
//! - `ObjectiveChoice`: what the user asks for; resolved against a benchmark
//!   matrix into an `ObjectiveSpec` (once per run, or once per replicate).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::ReturnMatrix;
use crate::metrics::{portfolio_volatility, MetricsError};

/// Errors from parsing or resolving an objective.
#[derive(Debug, Error, PartialEq)]
pub enum ObjectiveError {
    #[error("unrecognised objective '{0}' (expected max-sharpe, NN/MM or vol:X)")]
    Unrecognised(String),
    #[error("stock and bond shares must be in [0, 1] and sum to 1, got {stock}/{bond}")]
    InvalidMix { stock: f64, bond: f64 },
    #[error("target volatility must be positive and finite, got {0}")]
    InvalidTarget(f64),
    #[error("benchmark objective requires a benchmark matrix")]
    MissingBenchmark,
    #[error("benchmark matrix must have exactly 2 columns (stock, bond), found {0}")]
    BenchmarkShape(usize),
    #[error("benchmark matrix contains missing values")]
    BenchmarkMissingValues,
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// The optimization problem handed to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectiveSpec {
    /// Maximize mean / std, fully invested.
    MaximizeSharpe,
    /// Maximize mean at a fixed population standard deviation (unscaled units).
    TargetVolatility { target: f64 },
}

impl ObjectiveSpec {
    pub fn target_volatility(target: f64) -> Result<Self, ObjectiveError> {
        if !(target.is_finite() && target > 0.0) {
            return Err(ObjectiveError::InvalidTarget(target));
        }
        Ok(Self::TargetVolatility { target })
    }
}

/// Stock/bond blend used as a risk benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMix {
    pub stock: f64,
    pub bond: f64,
}

impl BenchmarkMix {
    pub fn new(stock: f64, bond: f64) -> Result<Self, ObjectiveError> {
        let in_range = (0.0..=1.0).contains(&stock) && (0.0..=1.0).contains(&bond);
        if !in_range || (stock + bond - 1.0).abs() > 1e-9 {
            return Err(ObjectiveError::InvalidMix { stock, bond });
        }
        Ok(Self { stock, bond })
    }

    /// The nine standard blends, 90/10 down to 10/90.
    pub fn presets() -> Vec<Self> {
        (1..=9)
            .rev()
            .map(|s| Self {
                stock: s as f64 / 10.0,
                bond: (10 - s) as f64 / 10.0,
            })
            .collect()
    }

    pub fn weights(&self) -> [f64; 2] {
        [self.stock, self.bond]
    }

    /// Population volatility of the blend over a (stock, bond) matrix.
    pub fn volatility(&self, benchmark: &ReturnMatrix) -> Result<f64, ObjectiveError> {
        if benchmark.n_cols() != 2 {
            return Err(ObjectiveError::BenchmarkShape(benchmark.n_cols()));
        }
        if benchmark.has_missing() {
            return Err(ObjectiveError::BenchmarkMissingValues);
        }
        Ok(portfolio_volatility(benchmark, &self.weights())?)
    }
}

impl fmt::Display for BenchmarkMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}% Stock / {}% Bond",
            (self.stock * 100.0).round(),
            (self.bond * 100.0).round()
        )
    }
}

/// User-facing objective selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectiveChoice {
    MaxSharpe,
    /// Match the volatility of a stock/bond blend measured on the benchmark matrix.
    BenchmarkEquivalent(BenchmarkMix),
    /// Fixed volatility target, independent of any benchmark.
    FixedVolatility { target: f64 },
}

impl ObjectiveChoice {
    /// True when resolution reads the benchmark matrix.
    pub fn uses_benchmark(&self) -> bool {
        matches!(self, Self::BenchmarkEquivalent(_))
    }

    pub fn benchmark_mix(&self) -> Option<BenchmarkMix> {
        match self {
            Self::BenchmarkEquivalent(mix) => Some(*mix),
            Self::MaxSharpe | Self::FixedVolatility { .. } => None,
        }
    }

    /// Turn the choice into a concrete optimizer objective.
    pub fn resolve(&self, benchmark: Option<&ReturnMatrix>) -> Result<ObjectiveSpec, ObjectiveError> {
        match self {
            Self::MaxSharpe => Ok(ObjectiveSpec::MaximizeSharpe),
            Self::FixedVolatility { target } => ObjectiveSpec::target_volatility(*target),
            Self::BenchmarkEquivalent(mix) => {
                let bench = benchmark.ok_or(ObjectiveError::MissingBenchmark)?;
                ObjectiveSpec::target_volatility(mix.volatility(bench)?)
            }
        }
    }
}

impl FromStr for ObjectiveChoice {
    type Err = ObjectiveError;

    /// Accepts `max-sharpe`, `60/40` (stock/bond percent) or `vol:0.012`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max-sharpe") || s.eq_ignore_ascii_case("sharpe") {
            return Ok(Self::MaxSharpe);
        }
        if let Some(v) = s.strip_prefix("vol:") {
            let target: f64 = v
                .parse()
                .map_err(|_| ObjectiveError::Unrecognised(s.to_string()))?;
            ObjectiveSpec::target_volatility(target)?;
            return Ok(Self::FixedVolatility { target });
        }
        if let Some((stock, bond)) = s.split_once('/') {
            let parse = |p: &str| {
                p.trim()
                    .parse::<f64>()
                    .map_err(|_| ObjectiveError::Unrecognised(s.to_string()))
            };
            let mix = BenchmarkMix::new(parse(stock)? / 100.0, parse(bond)? / 100.0)?;
            return Ok(Self::BenchmarkEquivalent(mix));
        }
        Err(ObjectiveError::Unrecognised(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::test_support::matrix;
    use approx::assert_relative_eq;

    #[test]
    fn presets_run_from_90_to_10() {
        let presets = BenchmarkMix::presets();
        assert_eq!(presets.len(), 9);
        assert_relative_eq!(presets[0].stock, 0.9);
        assert_relative_eq!(presets[8].bond, 0.9);
        assert_eq!(presets[3].to_string(), "60% Stock / 40% Bond");
    }

    #[test]
    fn parse_choices() {
        assert_eq!(
            "max-sharpe".parse::<ObjectiveChoice>(),
            Ok(ObjectiveChoice::MaxSharpe)
        );
        match "60/40".parse::<ObjectiveChoice>().unwrap() {
            ObjectiveChoice::BenchmarkEquivalent(mix) => {
                assert_relative_eq!(mix.stock, 0.6);
                assert_relative_eq!(mix.bond, 0.4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            "vol:0.02".parse::<ObjectiveChoice>(),
            Ok(ObjectiveChoice::FixedVolatility { target: 0.02 })
        );
        assert!("70/40".parse::<ObjectiveChoice>().is_err());
        assert!("vol:-1".parse::<ObjectiveChoice>().is_err());
        assert!("nonsense".parse::<ObjectiveChoice>().is_err());
    }

    #[test]
    fn benchmark_resolves_to_mix_volatility() {
        let bench = matrix(&[
            ("acwi", vec![0.02, -0.02, 0.02, -0.02]),
            ("bnd", vec![0.0, 0.0, 0.0, 0.0]),
        ]);
        let mix = BenchmarkMix::new(0.5, 0.5).unwrap();
        let spec = ObjectiveChoice::BenchmarkEquivalent(mix)
            .resolve(Some(&bench))
            .unwrap();
        match spec {
            ObjectiveSpec::TargetVolatility { target } => {
                assert_relative_eq!(target, 0.01, epsilon = 1e-12)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn benchmark_objective_without_benchmark_fails() {
        let mix = BenchmarkMix::new(0.6, 0.4).unwrap();
        assert_eq!(
            ObjectiveChoice::BenchmarkEquivalent(mix).resolve(None),
            Err(ObjectiveError::MissingBenchmark)
        );
    }

    #[test]
    fn flat_benchmark_gives_invalid_target() {
        let bench = matrix(&[("acwi", vec![0.0; 4]), ("bnd", vec![0.0; 4])]);
        let mix = BenchmarkMix::new(0.6, 0.4).unwrap();
        assert!(matches!(
            ObjectiveChoice::BenchmarkEquivalent(mix).resolve(Some(&bench)),
            Err(ObjectiveError::InvalidTarget(_))
        ));
    }
}
