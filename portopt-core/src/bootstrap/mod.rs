//! Stationary block bootstrap over the rows of a return matrix.
//!
//! Rows are resampled in blocks of geometrically distributed length
//! (Politis & Romano, 1994) so serial dependence survives resampling. All
//! columns share the same row draw, which keeps cross-asset structure. The
//! mean block length is estimated once per sampler (see [`block_length`]).
//!
//! Every replicate keeps the source's row labels, so a benchmark matrix can be
//! re-sliced to match with [`ReturnMatrix::select_labels`].

pub mod block_length;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::matrix::ReturnMatrix;
pub use block_length::optimal_block_length;

/// Errors from bootstrap setup.
#[derive(Debug, Error, PartialEq)]
pub enum BootstrapError {
    #[error("cannot bootstrap an empty matrix")]
    Empty,
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("block length must be at least 1")]
    ZeroBlockLength,
    #[error("power must be at least 1, got {0}")]
    InvalidPower(i32),
    #[error("block length estimation needs {required} observations, got {found}")]
    TooFewObservations { found: usize, required: usize },
    #[error("series contains missing or non-finite values")]
    NonFinite,
}

/// Where the mean block length comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockLengthSource {
    /// Estimate on every column and take the largest.
    MaxAcrossColumns,
    /// Estimate on one named column.
    Column(String),
    /// Use this length as-is.
    Fixed(usize),
}

/// Sampler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub block_length: BlockLengthSource,
    /// Integer exponent applied to the data before block-length estimation.
    pub power: i32,
    /// Also resample the exponentiated data instead of the original.
    pub transform_data: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            block_length: BlockLengthSource::MaxAcrossColumns,
            power: 1,
            transform_data: false,
        }
    }
}

/// Estimate the mean block length of `matrix` as `source` directs.
pub fn estimate_block_length(
    matrix: &ReturnMatrix,
    source: &BlockLengthSource,
    power: i32,
) -> Result<usize, BootstrapError> {
    if power < 1 {
        return Err(BootstrapError::InvalidPower(power));
    }
    if matrix.n_rows() == 0 || matrix.n_cols() == 0 {
        return Err(BootstrapError::Empty);
    }
    let data = if power == 1 { None } else { Some(matrix.powi(power)) };
    let data = data.as_ref().unwrap_or(matrix);

    match source {
        BlockLengthSource::Fixed(0) => Err(BootstrapError::ZeroBlockLength),
        BlockLengthSource::Fixed(b) => Ok(*b),
        BlockLengthSource::Column(name) => {
            let col = data
                .column_by_name(name)
                .map_err(|_| BootstrapError::UnknownColumn(name.clone()))?;
            optimal_block_length(&col)
        }
        BlockLengthSource::MaxAcrossColumns => {
            let mut best = 1;
            for col in 0..data.n_cols() {
                best = best.max(optimal_block_length(&data.column(col))?);
            }
            Ok(best)
        }
    }
}

/// Seeded stationary block bootstrap over one return matrix.
#[derive(Debug, Clone)]
pub struct BootstrapSampler {
    data: ReturnMatrix,
    block_length: usize,
    seed: u64,
}

impl BootstrapSampler {
    /// Build a sampler; the block length is fixed here for every replicate.
    pub fn new(
        matrix: &ReturnMatrix,
        options: &BootstrapOptions,
        seed: u64,
    ) -> Result<Self, BootstrapError> {
        let block_length = estimate_block_length(matrix, &options.block_length, options.power)?;
        let data = if options.transform_data && options.power != 1 {
            matrix.powi(options.power)
        } else {
            matrix.clone()
        };
        debug!(block_length, seed, rows = data.n_rows(), "bootstrap sampler ready");
        Ok(Self {
            data,
            block_length,
            seed,
        })
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The matrix replicates are drawn from.
    pub fn source(&self) -> &ReturnMatrix {
        &self.data
    }

    /// `count` replicates. Each call restarts from the sampler's seed.
    pub fn replicates(&self, count: usize) -> Replicates<'_> {
        Replicates {
            source: &self.data,
            p: 1.0 / self.block_length as f64,
            rng: StdRng::seed_from_u64(self.seed),
            remaining: count,
        }
    }
}

/// Lazy sequence of bootstrap replicates.
#[derive(Debug)]
pub struct Replicates<'a> {
    source: &'a ReturnMatrix,
    p: f64,
    rng: StdRng,
    remaining: usize,
}

impl Iterator for Replicates<'_> {
    type Item = ReturnMatrix;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let n = self.source.n_rows();
        let rows = resample_stationary_block(n, n, self.p, &mut self.rng);
        Some(self.source.gather_rows(&rows))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Replicates<'_> {}

/// Row indices of one stationary block resample.
///
/// At each step: with probability p, start a new block at a uniform row;
/// otherwise continue the current block (wrapping around).
fn resample_stationary_block(n: usize, target_len: usize, p: f64, rng: &mut StdRng) -> Vec<usize> {
    let mut rows = Vec::with_capacity(target_len);
    let mut pos = rng.gen_range(0..n);
    for _ in 0..target_len {
        rows.push(pos);
        if rng.gen::<f64>() < p {
            pos = rng.gen_range(0..n);
        } else {
            pos = (pos + 1) % n;
        }
    }
    rows
}
