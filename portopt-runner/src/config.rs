//! Engine configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Only what differs from the defaults needs to be written:
//!
//! ```toml
//! bootstrap_count = 200
//! worker_threads = 4
//! task_timeout_secs = 10.0
//!
//! [bootstrap]
//! power = 2
//!
//! [solver]
//! max_outer_iterations = 80
//! ```

use std::path::Path;
use std::time::Duration;

use portopt_core::{BootstrapOptions, ImputeOptions, SolverSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Unique identifier of a cached computation (content hash).
pub type RunKey = String;

/// Knobs for the bootstrap / imputation orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Replicates per bootstrap run.
    pub bootstrap_count: usize,
    /// Datasets per imputation run.
    pub impute_count: usize,
    /// Size of the worker pool.
    pub worker_threads: usize,
    /// Per-unit time budget; a unit that exceeds it counts as infeasible.
    pub task_timeout_secs: f64,
    pub bootstrap: BootstrapOptions,
    pub impute: ImputeOptions,
    pub solver: SolverSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bootstrap_count: 100,
            impute_count: 5,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            task_timeout_secs: 30.0,
            bootstrap: BootstrapOptions::default(),
            impute: ImputeOptions::default(),
            solver: SolverSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_count == 0 {
            return Err(ConfigError::Invalid("bootstrap_count must be at least 1".into()));
        }
        if self.impute_count == 0 {
            return Err(ConfigError::Invalid("impute_count must be at least 1".into()));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if !(self.task_timeout_secs.is_finite() && self.task_timeout_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "task_timeout_secs must be positive, got {}",
                self.task_timeout_secs
            )));
        }
        if self.bootstrap.power < 1 {
            return Err(ConfigError::Invalid(format!(
                "bootstrap.power must be at least 1, got {}",
                self.bootstrap.power
            )));
        }
        if self.impute.k_pmm == 0 || self.impute.passes_per_dataset == 0 {
            return Err(ConfigError::Invalid(
                "impute.k_pmm and impute.passes_per_dataset must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.task_timeout_secs)
    }

    /// Deterministic hash of the settings that change results.
    ///
    /// Worker count and timeout are left out: they change scheduling, not
    /// which replicates are drawn or how each is solved.
    pub fn content_hash(&self) -> RunKey {
        let relevant = (
            self.bootstrap_count,
            self.impute_count,
            &self.bootstrap,
            &self.impute,
            &self.solver,
        );
        let json = serde_json::to_string(&relevant).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
