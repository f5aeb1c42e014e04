//! Property tests for core invariants.
//!
//! Uses proptest to verify:
//! 1. Metrics are deterministic and scale linearly with the weights
//! 2. Block length is invariant under positive rescaling
//! 3. Replicates keep the source's shape, columns and label set
//! 4. Max-Sharpe weights are long-only, fully invested and no worse than
//!    any single asset

use std::collections::HashSet;

use chrono::NaiveDate;
use proptest::prelude::*;
use portopt_core::{
    compute_metrics, optimal_block_length, optimize_portfolio, BlockLengthSource,
    BootstrapOptions, BootstrapSampler, ObjectiveSpec, ReturnMatrix,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_return() -> impl Strategy<Value = f64> {
    (-0.05..0.05_f64).prop_map(|r| (r * 1e6).round() / 1e6)
}

fn arb_series(min: usize, max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_return(), min..max)
}

fn arb_matrix(cols: usize) -> impl Strategy<Value = ReturnMatrix> {
    (8usize..60).prop_flat_map(move |rows| {
        prop::collection::vec(prop::collection::vec(arb_return(), rows), cols).prop_map(
            move |columns| {
                let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
                let dates = (0..rows)
                    .map(|i| start + chrono::Duration::days(i as i64))
                    .collect();
                let named = columns
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (format!("asset{i}"), v))
                    .collect();
                ReturnMatrix::from_columns(dates, named).unwrap()
            },
        )
    })
}

fn arb_weights(n: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0..1.0_f64, n)
}

// ── 1. Metrics ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn metrics_are_deterministic(m in arb_matrix(3), w in arb_weights(3)) {
        let a = compute_metrics(&m, &w).unwrap();
        let b = compute_metrics(&m, &w).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Doubling every weight doubles mean and volatility, keeps Sharpe.
    #[test]
    fn metrics_scale_with_weights(m in arb_matrix(2), w in arb_weights(2)) {
        let base = compute_metrics(&m, &w).unwrap();
        let doubled: Vec<f64> = w.iter().map(|x| x * 2.0).collect();
        let twice = compute_metrics(&m, &doubled).unwrap();
        prop_assert!((twice.average - 2.0 * base.average).abs() < 1e-12);
        prop_assert!((twice.volatility - 2.0 * base.volatility).abs() < 1e-12);
        if base.volatility > 1e-9 {
            prop_assert!((twice.sharpe_ratio - base.sharpe_ratio).abs() < 1e-6);
        }
    }
}

// ── 2. Block length ──────────────────────────────────────────────────

proptest! {
    /// Power-of-two scaling is exact in floating point, so the estimate
    /// must not move at all.
    #[test]
    fn block_length_is_scale_invariant(x in arb_series(8, 200), k in -10i32..10) {
        let c = 2f64.powi(k);
        let scaled: Vec<f64> = x.iter().map(|v| v * c).collect();
        prop_assert_eq!(
            optimal_block_length(&x).unwrap(),
            optimal_block_length(&scaled).unwrap()
        );
    }

    #[test]
    fn block_length_is_bounded(x in arb_series(8, 200)) {
        let n = x.len() as f64;
        let b = optimal_block_length(&x).unwrap();
        prop_assert!(b >= 1);
        prop_assert!(b as f64 <= (3.0 * n.sqrt()).min(n / 3.0).ceil());
    }
}

// ── 3. Replicates ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicates_keep_shape(m in arb_matrix(3), block in 1usize..10, seed in any::<u64>()) {
        let opts = BootstrapOptions {
            block_length: BlockLengthSource::Fixed(block),
            ..BootstrapOptions::default()
        };
        let sampler = BootstrapSampler::new(&m, &opts, seed).unwrap();
        let labels: HashSet<_> = m.dates().iter().copied().collect();
        for rep in sampler.replicates(3) {
            prop_assert_eq!(rep.n_rows(), m.n_rows());
            prop_assert_eq!(rep.columns(), m.columns());
            prop_assert!(rep.dates().iter().all(|d| labels.contains(d)));
        }
    }
}

// ── 4. Optimizer ─────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn sharpe_weights_are_a_long_only_allocation(m in arb_matrix(3)) {
        let w = optimize_portfolio(&m, &ObjectiveSpec::MaximizeSharpe)
            .unwrap()
            .expect("max-Sharpe is always feasible");
        prop_assert!(w.iter().all(|x| (0.0..=1.0).contains(x)));
        prop_assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    /// No single asset, and not the equal-weight start, beats the optimum.
    #[test]
    fn sharpe_optimum_beats_every_single_asset(m in arb_matrix(3)) {
        let sharpe = |w: &[f64]| compute_metrics(&m, w).unwrap().sharpe_ratio;
        let w = optimize_portfolio(&m, &ObjectiveSpec::MaximizeSharpe)
            .unwrap()
            .expect("max-Sharpe is always feasible");
        let best = sharpe(&w);
        for i in 0..3 {
            let mut e = [0.0; 3];
            e[i] = 1.0;
            prop_assert!(best >= sharpe(&e) - 1e-9, "asset {} beats {:?}", i, w);
        }
        prop_assert!(best >= sharpe(&[1.0 / 3.0; 3]) - 1e-9);
    }
}
