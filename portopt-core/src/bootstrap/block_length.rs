//! Automatic block-length selection for the stationary bootstrap.
//!
//! Politis & White (2004) with the Patton, Politis & White (2009) correction.
//! The bandwidth `m` is picked from the first run of `kn` insignificant
//! autocorrelations; a flat-top kernel then estimates the long-run variance
//! and its derivative, which give the stationary-bootstrap optimum.

use super::BootstrapError;

/// Fewest observations accepted for estimation.
pub const MIN_OBSERVATIONS: usize = 4;

/// Rounded optimal mean block length of one series, at least 1.
pub fn optimal_block_length(series: &[f64]) -> Result<usize, BootstrapError> {
    let raw = stationary_estimate(series)?;
    Ok((raw.round() as usize).max(1))
}

/// Unrounded stationary-bootstrap estimate, capped at `min(3√n, n/3)`.
pub(crate) fn stationary_estimate(series: &[f64]) -> Result<f64, BootstrapError> {
    let n = series.len();
    if n < MIN_OBSERVATIONS {
        return Err(BootstrapError::TooFewObservations {
            found: n,
            required: MIN_OBSERVATIONS,
        });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(BootstrapError::NonFinite);
    }

    let nf = n as f64;
    let mean = series.iter().sum::<f64>() / nf;
    let eps: Vec<f64> = series.iter().map(|x| x - mean).collect();

    // Constant series: nothing to estimate.
    let peak = series.iter().fold(0.0_f64, |a, x| a.max(x.abs()));
    let acv0 = eps.iter().map(|e| e * e).sum::<f64>() / nf;
    if acv0 <= (1e-12 * peak).powi(2) {
        return Ok(1.0);
    }

    let b_max = (3.0 * nf.sqrt()).min(nf / 3.0).ceil();
    let kn = (nf.log10() as usize).max(5);
    let m_max = (nf.sqrt().ceil() as usize + kn).min(n - 2);
    let critical = 2.0 * (nf.log10() / nf).sqrt();

    let mut acv = vec![0.0; m_max + 1];
    let mut insignificant = vec![false; m_max + 1];
    for k in 0..=m_max {
        let cross: f64 = eps[k..].iter().zip(&eps[..n - k]).map(|(a, b)| a * b).sum();
        acv[k] = cross / nf;
        if k > 0 {
            let head: f64 = eps[k..].iter().map(|e| e * e).sum();
            let tail: f64 = eps[..n - k].iter().map(|e| e * e).sum();
            let denom = (head * tail).sqrt();
            let acorr = if denom > 0.0 { cross.abs() / denom } else { 0.0 };
            insignificant[k] = acorr < critical;
        }
    }

    // Smallest m whose next kn lags are all insignificant.
    let first_quiet = (0..=m_max.saturating_sub(kn))
        .find(|&m| (m + 1..=m + kn).all(|k| k <= m_max && insignificant[k]));
    let m = match first_quiet {
        Some(m) => (2 * m.max(1)).min(m_max),
        None => m_max,
    };

    let mut g = 0.0;
    let mut long_run = acv[0];
    for (k, &a) in acv.iter().enumerate().take(m + 1).skip(1) {
        let ratio = k as f64 / m as f64;
        let weight = if ratio <= 0.5 { 1.0 } else { 2.0 * (1.0 - ratio) };
        g += 2.0 * weight * k as f64 * a;
        long_run += 2.0 * weight * a;
    }
    if long_run == 0.0 {
        return Ok(1.0);
    }

    let d_sb = 2.0 * long_run * long_run;
    let b_sb = (2.0 * g * g / d_sb).cbrt() * nf.cbrt();
    Ok(b_sb.min(b_max))
}
