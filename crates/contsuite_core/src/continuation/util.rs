//! Utility functions for continuation: tangent computation and conversions
//! between points and augmented state vectors.

use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};

use super::types::ContinuationPoint;
use crate::error::{ContinuationError, Result};

/// Computes the unit tangent spanning the null space of the extended
/// Jacobian `[fx | fλ]` (n × (n+1)).
///
/// The matrix is padded with a zero row to a square (n+1)×(n+1) matrix; its
/// right singular vector for the smallest singular value lies in the null
/// space. If the SVD fails, falls back to bordered linear solves.
pub fn compute_nullspace_tangent(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    if dim == 0 {
        return Err(ContinuationError::InvalidParameters(
            "zero-dimensional system has no tangent".into(),
        ));
    }
    if j_ext.ncols() != dim + 1 {
        return Err(ContinuationError::DimensionMismatch {
            context: "extended Jacobian columns",
            expected: dim + 1,
            found: j_ext.ncols(),
        });
    }
    if j_ext.iter().any(|v| !v.is_finite()) {
        return Err(ContinuationError::NonFinite {
            context: "extended Jacobian",
        });
    }

    let mut tangent = match try_padded_svd(j_ext) {
        Some(vec) => vec,
        None => compute_tangent_linear_solve(j_ext)?,
    };
    tangent.normalize_mut();
    Ok(tangent)
}

fn try_padded_svd(j_ext: &DMatrix<f64>) -> Option<DVector<f64>> {
    let dim = j_ext.nrows();
    let mut padded = DMatrix::zeros(dim + 1, dim + 1);
    padded.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);

    let svd = SVD::new(padded, false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd.singular_values.iter().enumerate().fold(
        (0usize, f64::INFINITY),
        |(idx_min, val_min), (idx, &val)| {
            if val < val_min {
                (idx, val)
            } else {
                (idx_min, val_min)
            }
        },
    );

    let vec: DVector<f64> = v_t.row(min_idx).transpose();
    if vec.norm_squared() == 0.0 || vec.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(vec)
}

/// Solves [J; eᵢᵀ]·t = eₙ₊₁ for each unit row eᵢ until one is nonsingular.
fn compute_tangent_linear_solve(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    let mut a = DMatrix::zeros(dim + 1, dim + 1);
    a.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);
    let mut rhs = DVector::zeros(dim + 1);
    rhs[dim] = 1.0;

    for col in 0..=dim {
        for j in 0..=dim {
            a[(dim, j)] = 0.0;
        }
        a[(dim, col)] = 1.0;

        if let Some(solution) = a.clone().lu().solve(&rhs) {
            if solution.iter().all(|v| v.is_finite()) && solution.norm_squared() != 0.0 {
                return Ok(solution);
            }
        }
    }

    Err(ContinuationError::SingularMatrix {
        context: "tangent computation (all bordered solves singular)",
    })
}

/// Augmented state `[x..., λ]` of a point.
pub fn continuation_point_to_aug(point: &ContinuationPoint) -> DVector<f64> {
    state_to_aug(&point.state, point.param_value)
}

pub fn state_to_aug(state: &[f64], param_value: f64) -> DVector<f64> {
    let dim = state.len();
    let mut aug = DVector::zeros(dim + 1);
    aug.rows_mut(0, dim).copy_from_slice(state);
    aug[dim] = param_value;
    aug
}

pub fn aug_to_continuation_point(aug: &DVector<f64>) -> ContinuationPoint {
    let dim = aug.len() - 1;
    ContinuationPoint {
        state: aug.rows(0, dim).iter().copied().collect(),
        param_value: aug[dim],
    }
}
