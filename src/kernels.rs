//! Dense per-iteration kernels of Bernoulli mixture EM.
//!
//! A missing cell is imputed with the previous estimate in the parameter
//! update and skipped in the likelihood.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("{name} has shape {actual:?}, expected {expected:?}")]
    Matrix {
        name: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("{name} has length {actual}, expected {expected}")]
    Vector {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn check_matrix(
    name: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), ShapeError> {
    if expected != actual {
        return Err(ShapeError::Matrix {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Value a cell contributes to the parameter numerator: the observation
/// when present, otherwise the prior estimate for that cell.
#[inline]
pub fn imputed_value(observed: bool, present: bool, prior: f64) -> f64 {
    if present {
        if observed { 1.0 } else { 0.0 }
    } else {
        prior
    }
}

/// Factor a cell contributes to the likelihood product. Missing cells are
/// the multiplicative identity.
#[inline]
pub fn observed_factor(observed: bool, present: bool, p: f64) -> f64 {
    if !present {
        1.0
    } else if observed {
        p
    } else {
        1.0 - p
    }
}

/// Unnormalised M-step numerator for every component and feature:
///
/// `new_p[k, d] = sum_n w[n, k] * (x[n, d] if mask[n, d] else old_p[k, d])`
///
/// Callers divide row `k` by `sum_n w[n, k]` to obtain probabilities.
///
/// Shapes: `observations` and `mask` are N×D, `zstar_times_weight` is N×K,
/// `old_p` is K×D. Any disagreement is reported before accumulation starts.
pub fn weighted_parameter_update(
    observations: ArrayView2<'_, bool>,
    mask: ArrayView2<'_, bool>,
    zstar_times_weight: ArrayView2<'_, f64>,
    old_p: ArrayView2<'_, f64>,
) -> Result<Array2<f64>, ShapeError> {
    let (n_samples, n_dims) = observations.dim();
    let n_components = old_p.nrows();
    check_matrix("mask", (n_samples, n_dims), mask.dim())?;
    check_matrix(
        "zstar_times_weight",
        (n_samples, n_components),
        zstar_times_weight.dim(),
    )?;
    check_matrix("old_p", (n_components, n_dims), old_p.dim())?;

    let mut new_p = Array2::<f64>::zeros((n_components, n_dims));
    for (k, mut acc_row) in new_p.outer_iter_mut().enumerate() {
        let prior = old_p.row(k);
        let weights_k = zstar_times_weight.column(k);
        // Samples in ascending order so each cell sums exactly like the formula.
        for n in 0..n_samples {
            let w = weights_k[n];
            Zip::from(&mut acc_row)
                .and(observations.row(n))
                .and(mask.row(n))
                .and(&prior)
                .for_each(|acc, &x, &m, &p| *acc += w * imputed_value(x, m, p));
        }
    }
    Ok(new_p)
}

/// Per-sample probability of the observed features under one component:
///
/// `ans[n] = prod_{d : mask[n, d]} (p_k[d] if x[n, d] else 1 - p_k[d])`
///
/// A sample with no observed feature gets 1.0.
pub fn partial_likelihood(
    observations: ArrayView2<'_, bool>,
    mask: ArrayView2<'_, bool>,
    p_k: ArrayView1<'_, f64>,
) -> Result<Array1<f64>, ShapeError> {
    let (n_samples, n_dims) = observations.dim();
    check_matrix("mask", (n_samples, n_dims), mask.dim())?;
    if p_k.len() != n_dims {
        return Err(ShapeError::Vector {
            name: "p_k",
            expected: n_dims,
            actual: p_k.len(),
        });
    }

    let mut ans = Array1::<f64>::ones(n_samples);
    for (n, out) in ans.iter_mut().enumerate() {
        let mut prod = 1.0;
        Zip::from(observations.row(n))
            .and(mask.row(n))
            .and(&p_k)
            .for_each(|&x, &m, &p| prod *= observed_factor(x, m, p));
        *out = prod;
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn approx_eq(a: f64, b: f64, eps: f64) {
        assert!(
            (a - b).abs() <= eps,
            "expected {a} ~= {b} within eps={eps}, got diff={}",
            (a - b).abs()
        );
    }

    #[test]
    fn update_imputes_missing_cell_with_previous_estimate() {
        let x = array![[true, false], [false, true]];
        let mask = array![[true, false], [true, true]];
        let w = array![[2.0], [3.0]];
        let old_p = array![[0.5, 0.5]];

        let new_p = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
            .expect("update failed");
        assert_eq!(new_p.dim(), (1, 2));
        approx_eq(new_p[(0, 0)], 2.0, 1e-12);
        approx_eq(new_p[(0, 1)], 4.0, 1e-12);
    }

    #[test]
    fn likelihood_skips_missing_cell() {
        let x = array![[true, false], [false, true]];
        let mask = array![[true, false], [true, true]];
        let p_k = array![0.7, 0.4];

        let ans = partial_likelihood(x.view(), mask.view(), p_k.view()).expect("likelihood failed");
        assert_eq!(ans.len(), 2);
        approx_eq(ans[0], 0.7, 1e-12);
        approx_eq(ans[1], 0.12, 1e-12);
    }

    #[test]
    fn likelihood_of_fully_missing_sample_is_one_even_for_nan_params() {
        let x = array![[true, true, false]];
        let mask = Array2::from_elem((1, 3), false);
        let p_k = array![f64::NAN, 0.3, 2.0];

        let ans = partial_likelihood(x.view(), mask.view(), p_k.view()).expect("likelihood failed");
        assert_eq!(ans[0], 1.0);
    }

    #[test]
    fn out_of_range_values_propagate() {
        let x = array![[true, false]];
        let mask = Array2::from_elem((1, 2), true);
        let p_k = array![f64::NAN, 0.5];
        let ans = partial_likelihood(x.view(), mask.view(), p_k.view()).expect("likelihood failed");
        assert!(ans[0].is_nan());

        let w = array![[-1.0]];
        let old_p = array![[0.2, 1.5]];
        let new_p = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
            .expect("update failed");
        assert_eq!(new_p[(0, 0)], -1.0);
        assert_eq!(new_p[(0, 1)], 0.0);
    }

    #[test]
    fn update_rejects_mask_shape_mismatch() {
        let x = Array2::from_elem((2, 3), true);
        let mask = Array2::from_elem((2, 2), true);
        let w = Array2::from_elem((2, 1), 1.0);
        let old_p = Array2::from_elem((1, 3), 0.5);

        let err = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
            .expect_err("expected shape mismatch");
        assert_eq!(
            err,
            ShapeError::Matrix {
                name: "mask",
                expected: (2, 3),
                actual: (2, 2),
            }
        );
    }

    #[test]
    fn update_rejects_component_count_mismatch() {
        let x = Array2::from_elem((2, 3), true);
        let mask = Array2::from_elem((2, 3), true);
        let w = Array2::from_elem((2, 2), 1.0);
        let old_p = Array2::from_elem((1, 3), 0.5);

        let err = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
            .expect_err("expected shape mismatch");
        assert!(err.to_string().contains("zstar_times_weight"));
    }

    #[test]
    fn likelihood_rejects_parameter_length_mismatch() {
        let x = Array2::from_elem((2, 3), true);
        let mask = Array2::from_elem((2, 3), true);
        let p_k = array![0.5, 0.5];

        let err = partial_likelihood(x.view(), mask.view(), p_k.view())
            .expect_err("expected length mismatch");
        assert_eq!(err.to_string(), "p_k has length 2, expected 3");
    }
}
