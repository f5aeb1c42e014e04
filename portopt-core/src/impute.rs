//! Multiple imputation by chained equations with predictive mean matching.
//!
//! One chain evolves from a mean-filled start. Each update pass visits the
//! incomplete columns in ascending order of missing count and, for each:
//!
//! 1. fits OLS (with intercept) of the observed rows on every other column
//! 2. perturbs the coefficients with a draw from N(β̂, σ̂²(XᵀX)⁻¹)
//! 3. predicts every row and, for each missing row, copies the observed value
//!    of one of the `k_pmm` observed rows with the closest prediction
//!
//! Dataset i of [`Imputer::datasets`] is the chain after i further updates.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::matrix::ReturnMatrix;

/// Errors from imputation setup.
#[derive(Debug, Error, PartialEq)]
pub enum ImputeError {
    #[error("cannot impute a matrix with no columns")]
    NoColumns,
    #[error("column '{0}' has no observed values")]
    AllMissing(String),
    #[error("column '{column}' has {observed} observed values, need at least 2")]
    TooFewObserved { column: String, observed: usize },
    #[error("k_pmm and passes_per_dataset must be at least 1")]
    InvalidOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputeOptions {
    /// Candidate donors per missing cell.
    pub k_pmm: usize,
    /// Chain updates between consecutive datasets.
    pub passes_per_dataset: usize,
}

impl Default for ImputeOptions {
    fn default() -> Self {
        Self {
            k_pmm: 20,
            passes_per_dataset: 1,
        }
    }
}

/// Seeded MICE/PMM imputer for one incomplete matrix.
#[derive(Debug, Clone)]
pub struct Imputer {
    start: ReturnMatrix,
    /// Incomplete columns in visit order, with their missing row indices.
    plan: Vec<(usize, Vec<usize>)>,
    options: ImputeOptions,
    seed: u64,
}

impl Imputer {
    pub fn new(matrix: &ReturnMatrix, options: ImputeOptions, seed: u64) -> Result<Self, ImputeError> {
        if matrix.n_cols() == 0 {
            return Err(ImputeError::NoColumns);
        }
        if options.k_pmm == 0 || options.passes_per_dataset == 0 {
            return Err(ImputeError::InvalidOptions);
        }

        let mut start = matrix.clone();
        let mut plan = Vec::new();
        for col in 0..matrix.n_cols() {
            let values = matrix.column(col);
            let missing: Vec<usize> = (0..values.len()).filter(|&r| values[r].is_nan()).collect();
            if missing.is_empty() {
                continue;
            }
            let observed = values.len() - missing.len();
            let name = matrix.columns()[col].clone();
            if observed == 0 {
                return Err(ImputeError::AllMissing(name));
            }
            if observed < 2 {
                return Err(ImputeError::TooFewObserved { column: name, observed });
            }
            let mean = values.iter().filter(|v| !v.is_nan()).sum::<f64>() / observed as f64;
            for &r in &missing {
                start.set_value(r, col, mean);
            }
            plan.push((col, missing));
        }
        // Stable: ties keep column order.
        plan.sort_by_key(|(_, missing)| missing.len());

        debug!(incomplete_columns = plan.len(), seed, "imputation chain ready");
        Ok(Self {
            start,
            plan,
            options,
            seed,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// True when the source had no missing cells.
    pub fn is_complete(&self) -> bool {
        self.plan.is_empty()
    }

    /// `count` imputed datasets from one chain. Each call restarts from the seed.
    pub fn datasets(&self, count: usize) -> Datasets<'_> {
        Datasets {
            imputer: self,
            state: self.start.clone(),
            rng: StdRng::seed_from_u64(self.seed),
            remaining: count,
        }
    }
}

/// Lazy sequence of imputed datasets.
#[derive(Debug)]
pub struct Datasets<'a> {
    imputer: &'a Imputer,
    state: ReturnMatrix,
    rng: StdRng,
    remaining: usize,
}

impl Iterator for Datasets<'_> {
    type Item = ReturnMatrix;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        for _ in 0..self.imputer.options.passes_per_dataset {
            for (col, missing) in &self.imputer.plan {
                update_column(&mut self.state, *col, missing, self.imputer.options.k_pmm, &mut self.rng);
            }
        }
        Some(self.state.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Datasets<'_> {}

/// One chained-equation step for `col`.
fn update_column(state: &mut ReturnMatrix, col: usize, missing: &[usize], k_pmm: usize, rng: &mut StdRng) {
    let n = state.n_rows();
    let is_missing = {
        let mut mask = vec![false; n];
        missing.iter().for_each(|&r| mask[r] = true);
        mask
    };
    let observed: Vec<usize> = (0..n).filter(|&r| !is_missing[r]).collect();

    let design = design_matrix(state, col);
    let x_obs = design.select_rows(observed.iter());
    let y_obs = DVector::from_iterator(observed.len(), observed.iter().map(|&r| state.value(r, col)));

    let params = perturbed_ols(&x_obs, &y_obs, rng);
    let predicted = &design * &params;

    let mut donors: Vec<(f64, f64)> = observed
        .iter()
        .map(|&r| (predicted[r], state.value(r, col)))
        .collect();
    donors.sort_by(|a, b| a.0.total_cmp(&b.0));
    let k = k_pmm.min(donors.len());

    for &r in missing {
        let pick = rng.gen_range(0..k);
        let value = nearest_donors(&donors, predicted[r], k)[pick];
        state.set_value(r, col, value);
    }
    trace!(col, imputed = missing.len(), "column updated");
}

/// `[1, other columns...]` for every row.
fn design_matrix(state: &ReturnMatrix, target: usize) -> DMatrix<f64> {
    let n = state.n_rows();
    let p = state.n_cols();
    DMatrix::from_fn(n, p, |r, j| match j {
        0 => 1.0,
        j if j <= target => state.value(r, j - 1),
        j => state.value(r, j),
    })
}

/// OLS coefficients plus one Gaussian draw from their approximate posterior.
fn perturbed_ols(x: &DMatrix<f64>, y: &DVector<f64>, rng: &mut StdRng) -> DVector<f64> {
    let (n, p) = x.shape();
    let beta = x
        .clone()
        .svd(true, true)
        .solve(y, 1e-12)
        .unwrap_or_else(|_| intercept_only(y, p));

    let residuals = y - x * &beta;
    let dof = n.saturating_sub(p).max(1) as f64;
    let sigma2 = residuals.norm_squared() / dof;

    let xtx = x.transpose() * x;
    let inverse = xtx
        .clone()
        .try_inverse()
        .or_else(|| xtx.pseudo_inverse(1e-12).ok());
    let chol = inverse.and_then(|inv| (inv * sigma2).cholesky());
    match chol {
        Some(chol) => {
            let z = DVector::from_iterator(p, (0..p).map(|_| rng.sample::<f64, _>(StandardNormal)));
            beta + chol.l() * z
        }
        // Degenerate fit (e.g. perfect collinearity): no perturbation.
        None => beta,
    }
}

fn intercept_only(y: &DVector<f64>, p: usize) -> DVector<f64> {
    let mut beta = DVector::zeros(p);
    beta[0] = y.mean();
    beta
}

/// Observed values of the `k` donors whose predictions are closest to `target`.
/// `donors` is sorted by prediction.
fn nearest_donors(donors: &[(f64, f64)], target: f64, k: usize) -> Vec<f64> {
    let split = donors.partition_point(|d| d.0 < target);
    let (mut lo, mut hi) = (split, split);
    let mut out = Vec::with_capacity(k);
    while out.len() < k {
        let take_low = match (lo > 0, hi < donors.len()) {
            (true, true) => (target - donors[lo - 1].0) <= (donors[hi].0 - target),
            (true, false) => true,
            (false, true) => false,
            (false, false) => break,
        };
        if take_low {
            lo -= 1;
            out.push(donors[lo].1);
        } else {
            out.push(donors[hi].1);
            hi += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::test_support::matrix;
    use std::collections::HashSet;

    const NAN: f64 = f64::NAN;

    fn gappy() -> ReturnMatrix {
        matrix(&[
            ("a", vec![0.01, 0.02, NAN, 0.015, -0.01, 0.005, NAN, 0.0]),
            ("b", vec![0.02, 0.041, 0.03, 0.029, -0.019, NAN, 0.0, 0.001]),
            ("c", vec![0.003, -0.002, 0.001, 0.0, 0.004, 0.002, -0.001, 0.001]),
        ])
    }

    #[test]
    fn imputed_values_come_from_observed_donors() {
        let m = gappy();
        let imputer = Imputer::new(&m, ImputeOptions::default(), 7).unwrap();
        let observed_a: HashSet<u64> = m.column(0).iter().filter(|v| !v.is_nan()).map(|v| v.to_bits()).collect();
        let observed_b: HashSet<u64> = m.column(1).iter().filter(|v| !v.is_nan()).map(|v| v.to_bits()).collect();
        for ds in imputer.datasets(4) {
            assert!(!ds.has_missing());
            assert_eq!(ds.dates(), m.dates());
            assert!(observed_a.contains(&ds.value(2, 0).to_bits()));
            assert!(observed_a.contains(&ds.value(6, 0).to_bits()));
            assert!(observed_b.contains(&ds.value(5, 1).to_bits()));
            // Observed cells never change.
            assert_eq!(ds.value(0, 0), 0.01);
            assert_eq!(ds.column(2), m.column(2));
        }
    }

    #[test]
    fn seeded_chain_is_reproducible() {
        let m = gappy();
        let a: Vec<_> = Imputer::new(&m, ImputeOptions::default(), 3).unwrap().datasets(3).collect();
        let b: Vec<_> = Imputer::new(&m, ImputeOptions::default(), 3).unwrap().datasets(3).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn complete_matrix_yields_copies() {
        let m = matrix(&[("a", vec![0.01, 0.02, 0.03]), ("b", vec![0.0, 0.01, -0.01])]);
        let imputer = Imputer::new(&m, ImputeOptions::default(), 0).unwrap();
        assert!(imputer.is_complete());
        let sets: Vec<_> = imputer.datasets(3).collect();
        assert_eq!(sets.len(), 3);
        assert!(sets.iter().all(|s| s == &m));
    }

    #[test]
    fn exact_size() {
        let imputer = Imputer::new(&gappy(), ImputeOptions::default(), 0).unwrap();
        let mut it = imputer.datasets(5);
        assert_eq!(it.len(), 5);
        it.next();
        assert_eq!(it.len(), 4);
    }

    #[test]
    fn setup_errors() {
        let empty_col = matrix(&[("a", vec![NAN, NAN, NAN]), ("b", vec![0.0, 0.01, 0.02])]);
        assert_eq!(
            Imputer::new(&empty_col, ImputeOptions::default(), 0).unwrap_err(),
            ImputeError::AllMissing("a".into())
        );
        let one_obs = matrix(&[("a", vec![NAN, 0.01, NAN]), ("b", vec![0.0, 0.01, 0.02])]);
        assert_eq!(
            Imputer::new(&one_obs, ImputeOptions::default(), 0).unwrap_err(),
            ImputeError::TooFewObserved {
                column: "a".into(),
                observed: 1
            }
        );
        let opts = ImputeOptions {
            k_pmm: 0,
            ..ImputeOptions::default()
        };
        assert_eq!(
            Imputer::new(&gappy(), opts, 0).unwrap_err(),
            ImputeError::InvalidOptions
        );
    }

    #[test]
    fn nearest_donors_expand_outwards() {
        let donors = vec![(0.0, 10.0), (1.0, 11.0), (2.0, 12.0), (3.0, 13.0), (10.0, 14.0)];
        assert_eq!(nearest_donors(&donors, 2.2, 3), vec![12.0, 13.0, 11.0]);
        assert_eq!(nearest_donors(&donors, -5.0, 2), vec![10.0, 11.0]);
        assert_eq!(nearest_donors(&donors, 50.0, 9).len(), 5);
    }

    #[test]
    fn design_matrix_skips_target_column() {
        let m = gappy();
        let x = design_matrix(&m, 1);
        assert_eq!(x.shape(), (8, 3));
        assert_eq!(x[(0, 0)], 1.0);
        assert_eq!(x[(0, 1)], 0.01);
        assert_eq!(x[(0, 2)], 0.003);
    }
}
