use bmm_rs::{ShapeError, partial_likelihood, weighted_parameter_update};
use ndarray::{Array1, Array2, array};

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn fixture() -> (Array2<bool>, Array2<f64>, Array2<f64>) {
    let x = array![
        [true, false, true],
        [false, false, true],
        [true, true, false],
        [false, true, true],
    ];
    let w = array![[0.9, 0.1], [0.4, 0.6], [0.25, 0.75], [1.0, 0.0]];
    let old_p = array![[0.2, 0.5, 0.8], [0.6, 0.3, 0.1]];
    (x, w, old_p)
}

#[test]
fn fully_observed_update_is_weighted_sum_independent_of_old_p() {
    let (x, w, old_p) = fixture();
    let mask = Array2::from_elem(x.dim(), true);

    let a = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
        .expect("update failed");
    let b = weighted_parameter_update(x.view(), mask.view(), w.view(), (&old_p * 0.5).view())
        .expect("update failed");
    assert_eq!(a, b);

    for k in 0..2 {
        for d in 0..3 {
            let expected: f64 = (0..4)
                .map(|n| if x[(n, d)] { w[(n, k)] } else { 0.0 })
                .sum();
            approx_eq(a[(k, d)], expected, 1e-12);
        }
    }
}

#[test]
fn fully_missing_update_scales_old_p_by_weight_mass() {
    let (x, w, old_p) = fixture();
    let mask = Array2::from_elem(x.dim(), false);

    let new_p = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
        .expect("update failed");
    for k in 0..2 {
        let mass: f64 = w.column(k).sum();
        for d in 0..3 {
            approx_eq(new_p[(k, d)], old_p[(k, d)] * mass, 1e-12);
        }
    }
}

#[test]
fn update_is_linear_in_weights() {
    let (x, w, old_p) = fixture();
    let mask = array![
        [true, false, true],
        [true, true, true],
        [false, true, false],
        [true, true, false],
    ];
    let c = 3.5;

    let base = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
        .expect("update failed");
    let scaled = weighted_parameter_update(x.view(), mask.view(), (&w * c).view(), old_p.view())
        .expect("update failed");
    for (a, b) in base.iter().zip(scaled.iter()) {
        approx_eq(*b, a * c, 1e-12);
    }
}

#[test]
fn fully_observed_likelihood_is_plain_bernoulli_product() {
    let (x, _, _) = fixture();
    let mask = Array2::from_elem(x.dim(), true);
    let p_k = array![0.2, 0.5, 0.8];

    let ans = partial_likelihood(x.view(), mask.view(), p_k.view()).expect("likelihood failed");
    for n in 0..4 {
        let expected: f64 = (0..3)
            .map(|d| if x[(n, d)] { p_k[d] } else { 1.0 - p_k[d] })
            .product();
        approx_eq(ans[n], expected, 1e-15);
    }
}

#[test]
fn fully_missing_likelihood_is_all_ones() {
    let (x, _, _) = fixture();
    let mask = Array2::from_elem(x.dim(), false);
    let p_k = array![0.01, 0.99, 0.5];

    let ans = partial_likelihood(x.view(), mask.view(), p_k.view()).expect("likelihood failed");
    assert_eq!(ans, Array1::<f64>::ones(4));
}

#[test]
fn degenerate_shapes_produce_empty_outputs() {
    // N = 0
    let x = Array2::<bool>::from_elem((0, 3), false);
    let w = Array2::<f64>::zeros((0, 2));
    let old_p = Array2::from_elem((2, 3), 0.5);
    let new_p = weighted_parameter_update(x.view(), x.view(), w.view(), old_p.view())
        .expect("update failed");
    assert_eq!(new_p, Array2::<f64>::zeros((2, 3)));
    let ans = partial_likelihood(x.view(), x.view(), old_p.row(0)).expect("likelihood failed");
    assert_eq!(ans.len(), 0);

    // D = 0
    let x = Array2::<bool>::from_elem((4, 0), false);
    let w = Array2::from_elem((4, 2), 1.0);
    let old_p = Array2::<f64>::zeros((2, 0));
    let new_p = weighted_parameter_update(x.view(), x.view(), w.view(), old_p.view())
        .expect("update failed");
    assert_eq!(new_p.dim(), (2, 0));
    let p_k = Array1::<f64>::zeros(0);
    let ans = partial_likelihood(x.view(), x.view(), p_k.view()).expect("likelihood failed");
    assert_eq!(ans, Array1::<f64>::ones(4));

    // K = 0
    let x = Array2::from_elem((4, 3), true);
    let w = Array2::<f64>::zeros((4, 0));
    let old_p = Array2::<f64>::zeros((0, 3));
    let new_p = weighted_parameter_update(x.view(), x.view(), w.view(), old_p.view())
        .expect("update failed");
    assert_eq!(new_p.dim(), (0, 3));
}

#[test]
fn repeated_calls_are_bitwise_identical() {
    let (x, w, old_p) = fixture();
    let mask = array![
        [true, false, true],
        [false, true, true],
        [true, true, true],
        [true, false, false],
    ];

    let a = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
        .expect("update failed");
    let b = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
        .expect("update failed");
    assert!(a.iter().zip(b.iter()).all(|(l, r)| l.to_bits() == r.to_bits()));

    let l1 = partial_likelihood(x.view(), mask.view(), old_p.row(1)).expect("likelihood failed");
    let l2 = partial_likelihood(x.view(), mask.view(), old_p.row(1)).expect("likelihood failed");
    assert!(l1.iter().zip(l2.iter()).all(|(l, r)| l.to_bits() == r.to_bits()));
}

#[test]
fn old_p_dimension_mismatch_fails_before_accumulating() {
    let (x, w, _) = fixture();
    let mask = Array2::from_elem(x.dim(), true);
    let old_p = Array2::from_elem((2, 4), 0.5);

    let err = weighted_parameter_update(x.view(), mask.view(), w.view(), old_p.view())
        .expect_err("expected shape mismatch");
    assert_eq!(
        err,
        ShapeError::Matrix {
            name: "old_p",
            expected: (2, 3),
            actual: (2, 4),
        }
    );
}
