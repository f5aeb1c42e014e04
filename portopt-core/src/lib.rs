//! PortOpt Core: return matrices, portfolio metrics, optimizer, resampling.
//!
//! This crate contains the numerical heart of the allocation engine:
//! - Labelled return matrices and the upstream data-source seam
//! - Portfolio metrics (mean, population volatility, Sharpe ratio)
//! - Objectives: max-Sharpe and target volatility (fixed or benchmark mix)
//! - Long-only constrained optimizer (augmented Lagrangian over projected gradient)
//! - Stationary block bootstrap with automatic block length
//! - Multiple imputation by chained equations with predictive mean matching

pub mod bootstrap;
pub mod impute;
pub mod matrix;
pub mod metrics;
pub mod objective;
pub mod optimizer;

pub use bootstrap::{
    estimate_block_length, optimal_block_length, BlockLengthSource, BootstrapError,
    BootstrapOptions, BootstrapSampler, Replicates,
};
pub use impute::{Datasets, ImputeError, ImputeOptions, Imputer};
pub use matrix::{select_user_assets, MatrixError, ReturnMatrix, ReturnSource};
pub use metrics::{compute_metrics, MetricsError, PortfolioMetrics};
pub use objective::{BenchmarkMix, ObjectiveChoice, ObjectiveError, ObjectiveSpec};
pub use optimizer::{
    optimize, optimize_portfolio, OptimizeError, OptimizeOutcome, SolverSettings, WeightVector,
    RETURN_SCALE,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a worker thread receives is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<ReturnMatrix>();
        require_sync::<ReturnMatrix>();
        require_send::<ObjectiveSpec>();
        require_sync::<ObjectiveSpec>();
        require_send::<ObjectiveChoice>();
        require_sync::<ObjectiveChoice>();
        require_send::<SolverSettings>();
        require_sync::<SolverSettings>();
        require_send::<OptimizeOutcome>();
        require_sync::<OptimizeOutcome>();
        require_send::<PortfolioMetrics>();
        require_sync::<PortfolioMetrics>();

        require_send::<BootstrapSampler>();
        require_sync::<BootstrapSampler>();
        require_send::<Imputer>();
        require_sync::<Imputer>();

        require_send::<OptimizeError>();
        require_sync::<OptimizeError>();
        require_send::<BootstrapError>();
        require_sync::<BootstrapError>();
        require_send::<ImputeError>();
        require_sync::<ImputeError>();
    }
}
