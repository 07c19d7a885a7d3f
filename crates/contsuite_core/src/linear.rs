//! Dense linear solvers used by the nonlinear correctors.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ContinuationError, Result};

/// Solves A·x = b for square A.
///
/// Implementations must report singular (or numerically singular) matrices
/// as [`ContinuationError::SingularMatrix`] instead of returning NaN.
pub trait LinearSolver {
    fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>>;
}

/// LU factorization with partial pivoting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LuSolver;

/// Householder QR factorization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QrSolver;

impl LinearSolver for LuSolver {
    fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        check_shapes(a, b)?;
        let (a, b) = equilibrate_rows(a, b, "LU factorization")?;
        let lu = a.lu();
        if is_numerically_singular(&lu.u()) {
            return Err(ContinuationError::SingularMatrix {
                context: "LU factorization",
            });
        }
        lu.solve(&b)
            .filter(|x| x.iter().all(|v| v.is_finite()))
            .ok_or(ContinuationError::SingularMatrix {
                context: "LU solve",
            })
    }
}

impl LinearSolver for QrSolver {
    fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        check_shapes(a, b)?;
        let (a, b) = equilibrate_rows(a, b, "QR factorization")?;
        let qr = a.qr();
        if is_numerically_singular(&qr.r()) {
            return Err(ContinuationError::SingularMatrix {
                context: "QR factorization",
            });
        }
        qr.solve(&b)
            .filter(|x| x.iter().all(|v| v.is_finite()))
            .ok_or(ContinuationError::SingularMatrix {
                context: "QR solve",
            })
    }
}

fn check_shapes(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<()> {
    if !a.is_square() {
        return Err(ContinuationError::DimensionMismatch {
            context: "linear system (columns)",
            expected: a.nrows(),
            found: a.ncols(),
        });
    }
    if b.len() != a.nrows() {
        return Err(ContinuationError::DimensionMismatch {
            context: "linear system right-hand side",
            expected: a.nrows(),
            found: b.len(),
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(ContinuationError::NonFinite {
            context: "linear system",
        });
    }
    Ok(())
}

/// Scales each row of A·x = b by its largest entry. The solution is
/// unchanged; a zero row means A is singular.
fn equilibrate_rows(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    context: &'static str,
) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let mut a = a.clone();
    let mut b = b.clone();
    for i in 0..a.nrows() {
        let scale = a.row(i).amax();
        if scale == 0.0 {
            return Err(ContinuationError::SingularMatrix { context });
        }
        for v in a.row_mut(i).iter_mut() {
            *v /= scale;
        }
        b[i] /= scale;
    }
    Ok((a, b))
}

const PIVOT_TOLERANCE: f64 = 16.0 * f64::EPSILON;

/// Flags a triangular factor whose smallest pivot is zero or negligible
/// relative to the largest one.
///
/// This is a pivot ratio, not a condition estimate. Rows are equilibrated
/// beforehand, so it is insensitive to row scaling; badly scaled columns
/// can still be reported as singular.
fn is_numerically_singular(triangular: &DMatrix<f64>) -> bool {
    let n = triangular.nrows().min(triangular.ncols());
    if n == 0 {
        return false;
    }
    let (mut min_pivot, mut max_pivot) = (f64::INFINITY, 0.0_f64);
    for i in 0..n {
        let p = triangular[(i, i)].abs();
        min_pivot = min_pivot.min(p);
        max_pivot = max_pivot.max(p);
    }
    min_pivot == 0.0 || min_pivot <= max_pivot * PIVOT_TOLERANCE * n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solvers() -> Vec<(&'static str, Box<dyn LinearSolver>)> {
        vec![
            ("lu", Box::new(LuSolver) as Box<dyn LinearSolver>),
            ("qr", Box::new(QrSolver) as Box<dyn LinearSolver>),
        ]
    }

    #[test]
    fn solves_well_conditioned_system() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 2.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        for (name, solver) in solvers() {
            let x = solver.solve(&a, &b).expect("solve should succeed");
            let residual = (&a * &x - &b).norm();
            assert!(residual < 1e-12, "{name}: residual {residual}");
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        for (name, solver) in solvers() {
            let err = solver.solve(&a, &b).expect_err("singular matrix must fail");
            assert!(
                matches!(err, ContinuationError::SingularMatrix { .. }),
                "{name}: unexpected error {err}"
            );
        }
    }

    #[test]
    fn zero_row_is_singular() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5]);
        let b = DVector::from_vec(vec![0.0, 0.0, 1.0]);
        assert!(matches!(
            LuSolver.solve(&a, &b),
            Err(ContinuationError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn row_scaling_does_not_look_singular() {
        // A residual row of order 1e15 bordered by a unit-scale row.
        let a = DMatrix::from_row_slice(2, 2, &[1e15, 2e15, 3.0, 4.0]);
        let b = DVector::from_vec(vec![3e15, 7.0]);
        for (name, solver) in solvers() {
            let x = solver.solve(&a, &b).expect("well-posed system");
            assert!((x[0] - 1.0).abs() < 1e-10, "{name}: x = {x}");
            assert!((x[1] - 1.0).abs() < 1e-10, "{name}: x = {x}");
        }
    }

    #[test]
    fn rejects_mismatched_rhs() {
        let a = DMatrix::<f64>::identity(2, 2);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let err = LuSolver.solve(&a, &b).expect_err("shape mismatch");
        assert!(matches!(
            err,
            ContinuationError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }
}
