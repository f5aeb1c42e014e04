//! PortOpt Runner: fan-out, aggregation, configuration and caching.
//!
//! This crate builds on `portopt-core` to provide:
//! - Single, bootstrap and imputed optimization runs on a bounded worker pool
//! - Mean aggregation of feasible weights (infeasible and timed-out units skipped)
//! - Imputed-run metrics averaged across datasets, with benchmark figures
//! - TOML engine configuration
//! - Content-hashed memo cache of seeded results

pub mod cache;
pub mod config;
pub mod orchestrator;

pub use cache::{CacheKeyInputs, MemoCache};
pub use config::{ConfigError, EngineConfig, RunKey};
pub use orchestrator::{
    aggregate_metrics, aggregate_weights, AggregateMetrics, ImputedOutput, Orchestrator,
    RunError, RunKind, RunOutput, RunReport,
};
pub use portopt_core::compute_metrics;
