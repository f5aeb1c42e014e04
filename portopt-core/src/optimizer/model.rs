//! Scaled portfolio model: objective and constraint functions with gradients.
//!
//! The return matrix is reduced to column means and the population covariance
//! matrix once, so every evaluation is O(n²) in the number of assets rather
//! than O(T·n) in the history length.

use crate::matrix::ReturnMatrix;

/// Below this scaled volatility the gradient of std is treated as zero.
const MIN_STD: f64 = 1e-10;

/// First and second moments of a scaled return matrix.
#[derive(Debug, Clone)]
pub(crate) struct PortfolioModel {
    means: Vec<f64>,
    cov: Vec<Vec<f64>>,
}

impl PortfolioModel {
    /// Moments of `returns * scale`. Population covariance (divide by T).
    pub(crate) fn new(returns: &ReturnMatrix, scale: f64) -> Self {
        let n = returns.n_cols();
        let t = returns.n_rows() as f64;
        let mut means = vec![0.0; n];
        for row in returns.rows() {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v * scale;
            }
        }
        means.iter_mut().for_each(|m| *m /= t);

        let mut cov = vec![vec![0.0; n]; n];
        for row in returns.rows() {
            let centred: Vec<f64> = row.iter().zip(&means).map(|(v, m)| v * scale - m).collect();
            for i in 0..n {
                for j in i..n {
                    cov[i][j] += centred[i] * centred[j];
                }
            }
        }
        for i in 0..n {
            for j in i..n {
                cov[i][j] /= t;
                cov[j][i] = cov[i][j];
            }
        }
        Self { means, cov }
    }

    pub(crate) fn n_assets(&self) -> usize {
        self.means.len()
    }

    pub(crate) fn mean(&self, w: &[f64]) -> f64 {
        dot(&self.means, w)
    }

    pub(crate) fn mean_gradient(&self) -> &[f64] {
        &self.means
    }

    pub(crate) fn std(&self, w: &[f64]) -> f64 {
        let sw = self.cov_times(w);
        dot(w, &sw).max(0.0).sqrt()
    }

    /// ∇σ = Σw / σ.
    pub(crate) fn std_gradient(&self, w: &[f64]) -> Vec<f64> {
        let sw = self.cov_times(w);
        let s = dot(w, &sw).max(0.0).sqrt();
        if s < MIN_STD {
            return vec![0.0; w.len()];
        }
        sw.into_iter().map(|x| x / s).collect()
    }

    fn cov_times(&self, w: &[f64]) -> Vec<f64> {
        self.cov.iter().map(|row| dot(row, w)).collect()
    }
}

/// What is being minimized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Goal {
    /// −mean/std.
    NegativeSharpe,
    /// −mean.
    NegativeMean,
}

impl Goal {
    pub(crate) fn value(&self, model: &PortfolioModel, w: &[f64]) -> f64 {
        match self {
            Goal::NegativeSharpe => -model.mean(w) / model.std(w).max(MIN_STD),
            Goal::NegativeMean => -model.mean(w),
        }
    }

    pub(crate) fn gradient(&self, model: &PortfolioModel, w: &[f64]) -> Vec<f64> {
        match self {
            Goal::NegativeSharpe => {
                let m = model.mean(w);
                let s = model.std(w).max(MIN_STD);
                let ds = model.std_gradient(w);
                model
                    .mean_gradient()
                    .iter()
                    .zip(&ds)
                    .map(|(dm, ds)| -(dm * s - m * ds) / (s * s))
                    .collect()
            }
            Goal::NegativeMean => model.mean_gradient().iter().map(|dm| -dm).collect(),
        }
    }
}

/// Convex set the weights live in. Iterates are projected onto it exactly,
/// so bounds and budget never show up as penalty terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    /// wᵢ ≥ 0, Σw = 1.
    Simplex,
    /// wᵢ ≥ 0, 0 ≤ Σw ≤ 1: the remainder is held as cash.
    CappedSimplex,
}

impl Region {
    /// Euclidean projection of `v` onto the region.
    pub(crate) fn project(&self, v: &[f64]) -> Vec<f64> {
        match self {
            Region::Simplex => project_simplex(v),
            Region::CappedSimplex => {
                let clipped: Vec<f64> = v.iter().map(|x| x.max(0.0)).collect();
                if clipped.iter().sum::<f64>() <= 1.0 {
                    clipped
                } else {
                    project_simplex(v)
                }
            }
        }
    }

    /// ‖P(w − g) − w‖∞: zero exactly at a first-order stationary point of a
    /// function with gradient `g` over the region.
    pub(crate) fn stationarity(&self, w: &[f64], g: &[f64]) -> f64 {
        let trial: Vec<f64> = w.iter().zip(g).map(|(x, d)| x - d).collect();
        self.project(&trial)
            .iter()
            .zip(w)
            .map(|(p, x)| (p - x).abs())
            .fold(0.0, f64::max)
    }

    /// Extreme points: the unit vectors, plus the origin for the capped region.
    pub(crate) fn vertices(&self, n: usize) -> Vec<Vec<f64>> {
        let mut points: Vec<Vec<f64>> = (0..n).map(|i| unit_vector(n, i)).collect();
        if *self == Region::CappedSimplex {
            points.push(vec![0.0; n]);
        }
        points
    }
}

/// Sort-based projection onto the probability simplex.
fn project_simplex(v: &[f64]) -> Vec<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let mut cumulative = 0.0;
    let mut shift = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumulative += u;
        let t = (cumulative - 1.0) / (j + 1) as f64;
        if u - t > 0.0 {
            shift = t;
        }
    }
    v.iter().map(|x| (x - shift).max(0.0)).collect()
}

pub(crate) fn unit_vector(n: usize, i: usize) -> Vec<f64> {
    let mut e = vec![0.0; n];
    e[i] = 1.0;
    e
}

/// Equality σ(w) = target, in scaled units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct VolatilityTarget(pub f64);

impl VolatilityTarget {
    pub(crate) fn value(&self, model: &PortfolioModel, w: &[f64]) -> f64 {
        model.std(w) - self.0
    }

    /// Adds `coef · ∇c(w)` into `grad`.
    pub(crate) fn add_gradient(&self, model: &PortfolioModel, w: &[f64], coef: f64, grad: &mut [f64]) {
        for (g, d) in grad.iter_mut().zip(model.std_gradient(w)) {
            *g += coef * d;
        }
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
