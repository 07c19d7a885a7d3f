//! Jacobian providers: forward finite differences and forward-mode autodiff.
//!
//! Both helpers work on closures so the same code serves plain nonlinear
//! problems (n×n) and continuation problems, where λ is one extra input
//! column (n×(n+1)).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::autodiff::Dual;
use crate::error::{ContinuationError, Result};

/// How a problem obtains its Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Differentiation {
    /// User-supplied function, trusted as-is.
    Analytic,
    Autodiff,
    FiniteDifference,
}

/// Forward-difference Jacobian of `f` at `x`.
///
/// `fx` must be `f(x)`; it is reused for every column. The step for
/// coordinate i is `sqrt(ε) * max(|xᵢ|, 1)`, rounded so that `xᵢ + h` is
/// exactly representable.
pub fn finite_difference_jacobian<F>(
    mut f: F,
    x: &DVector<f64>,
    fx: &DVector<f64>,
) -> Result<DMatrix<f64>>
where
    F: FnMut(&DVector<f64>) -> Result<DVector<f64>>,
{
    let rows = fx.len();
    let cols = x.len();
    let sqrt_eps = f64::EPSILON.sqrt();
    let mut jac = DMatrix::zeros(rows, cols);
    let mut perturbed = x.clone();

    for j in 0..cols {
        let xj = x[j];
        let step = sqrt_eps * xj.abs().max(1.0);
        perturbed[j] = xj + step;
        let h = perturbed[j] - xj;

        let f_plus = f(&perturbed)?;
        if f_plus.len() != rows {
            return Err(ContinuationError::DimensionMismatch {
                context: "finite-difference residual",
                expected: rows,
                found: f_plus.len(),
            });
        }
        for i in 0..rows {
            jac[(i, j)] = (f_plus[i] - fx[i]) / h;
        }
        perturbed[j] = xj;
    }

    check_finite(jac.as_slice(), "finite-difference Jacobian")?;
    Ok(jac)
}

/// Jacobian of `f` at `x` by forward-mode automatic differentiation.
///
/// `f` writes `rows` outputs; each call seeds exactly one input with a unit
/// derivative, and the derivative parts of the outputs form that column.
pub fn autodiff_jacobian<F>(mut f: F, x: &[f64], rows: usize) -> Result<DMatrix<f64>>
where
    F: FnMut(&[Dual], &mut [Dual]) -> Result<()>,
{
    let cols = x.len();
    let mut jac = DMatrix::zeros(rows, cols);
    let mut dual_x: Vec<Dual> = x.iter().map(|&v| Dual::constant(v)).collect();
    let mut dual_out = vec![Dual::constant(0.0); rows];

    for j in 0..cols {
        dual_x[j].eps = 1.0;
        f(&dual_x, &mut dual_out)?;
        dual_x[j].eps = 0.0;

        for i in 0..rows {
            jac[(i, j)] = dual_out[i].eps;
        }
    }

    check_finite(jac.as_slice(), "automatic-differentiation Jacobian")?;
    Ok(jac)
}

pub(crate) fn check_finite(values: &[f64], context: &'static str) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ContinuationError::NonFinite { context })
    }
}

pub(crate) fn evaluation_failed(
    context: &'static str,
) -> impl FnOnce(anyhow::Error) -> ContinuationError {
    move |source| ContinuationError::Evaluation { context, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Float;
    use proptest::prelude::*;

    fn smooth<T: Float>(x: &[T], out: &mut [T]) {
        out[0] = x[0].sin() * x[1] + x[1].exp();
        out[1] = x[0] * x[0] * x[1] - (x[0] * x[1]).cos();
    }

    fn smooth_f64(x: &DVector<f64>) -> Result<DVector<f64>> {
        let mut out = vec![0.0; 2];
        smooth(x.as_slice(), &mut out);
        Ok(DVector::from_vec(out))
    }

    fn exact(x: &[f64]) -> DMatrix<f64> {
        let (a, b) = (x[0], x[1]);
        DMatrix::from_row_slice(
            2,
            2,
            &[
                a.cos() * b,
                a.sin() + b.exp(),
                2.0 * a * b + b * (a * b).sin(),
                a * a + a * (a * b).sin(),
            ],
        )
    }

    #[test]
    fn autodiff_matches_closed_form() {
        let x = [0.7, -0.4];
        let jac = autodiff_jacobian(
            |x, out| {
                smooth(x, out);
                Ok(())
            },
            &x,
            2,
        )
        .expect("autodiff jacobian");
        let diff = (&jac - exact(&x)).abs().max();
        assert!(diff < 1e-12, "max deviation {diff}");
    }

    #[test]
    fn finite_difference_handles_rectangular_jacobians() {
        // f(x, λ) = [x₀ λ], one row, two columns.
        let x = DVector::from_vec(vec![3.0, 2.0]);
        let f = |u: &DVector<f64>| -> Result<DVector<f64>> { Ok(DVector::from_vec(vec![u[0] * u[1]])) };
        let fx = f(&x).expect("residual");
        let jac = finite_difference_jacobian(f, &x, &fx).expect("fd jacobian");
        assert_eq!(jac.shape(), (1, 2));
        assert!((jac[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((jac[(0, 1)] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn non_finite_residual_is_reported() {
        let x = DVector::from_vec(vec![0.0]);
        let fx = DVector::from_vec(vec![0.0]);
        let err = finite_difference_jacobian(
            |_u: &DVector<f64>| Ok(DVector::from_vec(vec![f64::NAN])),
            &x,
            &fx,
        )
        .expect_err("NaN must not be accepted");
        assert!(err.is_numerical_evaluation(), "unexpected error {err}");
    }

    proptest! {
        #[test]
        fn finite_difference_agrees_with_autodiff(a in -2.0f64..2.0, b in -2.0f64..2.0) {
            let x = DVector::from_vec(vec![a, b]);
            let fx = smooth_f64(&x).unwrap();
            let fd = finite_difference_jacobian(smooth_f64, &x, &fx).unwrap();
            let ad = autodiff_jacobian(
                |x, out| {
                    smooth(x, out);
                    Ok(())
                },
                x.as_slice(),
                2,
            )
            .unwrap();
            let scale = ad.abs().max().max(1.0);
            let rel = (&fd - &ad).abs().max() / scale;
            prop_assert!(rel < 1e-5, "relative deviation {} at ({}, {})", rel, a, b);
        }
    }
}
