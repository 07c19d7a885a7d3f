//! Predictors: tangent computation, orientation, and the auxiliary equation
//! that closes the extended system.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::problem::{BranchProblem, ExtendedSystem};
use super::types::Direction;
use super::util::compute_nullspace_tangent;
use crate::error::Result;

/// Output of one predictor call.
pub struct Prediction<'a, B: ?Sized> {
    /// Initial guess `[x, λ]` for the corrector.
    pub guess: DVector<f64>,
    /// Oriented unit tangent at the previous point.
    pub tangent: DVector<f64>,
    /// Square system whose root is the next point.
    pub system: ExtendedSystem<'a, B>,
}

/// Produces the next guess and the system the corrector refines it on.
pub trait Predictor {
    fn predict<'a, B: BranchProblem + ?Sized>(
        &self,
        problem: &'a B,
        aug_prev: &DVector<f64>,
        prev_tangent: Option<&DVector<f64>>,
        direction: Direction,
        step_size: f64,
    ) -> Result<Prediction<'a, B>>;
}

/// Keller's pseudo-arclength: step Δs along the tangent, then constrain the
/// correction to the hyperplane (u − u_prev)·t = Δs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudoArcLength;

/// Natural-parameter continuation with a tangent predictor: λ is pinned to
/// its predicted value and only x is corrected. Breaks down at folds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalParameter;

impl Predictor for PseudoArcLength {
    fn predict<'a, B: BranchProblem + ?Sized>(
        &self,
        problem: &'a B,
        aug_prev: &DVector<f64>,
        prev_tangent: Option<&DVector<f64>>,
        direction: Direction,
        step_size: f64,
    ) -> Result<Prediction<'a, B>> {
        let tangent = oriented_tangent(problem, aug_prev, prev_tangent, direction)?;
        let guess = aug_prev + &tangent * step_size;
        let system = ExtendedSystem::new(problem, aug_prev.clone(), tangent.clone(), step_size)?;
        Ok(Prediction {
            guess,
            tangent,
            system,
        })
    }
}

impl Predictor for NaturalParameter {
    fn predict<'a, B: BranchProblem + ?Sized>(
        &self,
        problem: &'a B,
        aug_prev: &DVector<f64>,
        prev_tangent: Option<&DVector<f64>>,
        direction: Direction,
        step_size: f64,
    ) -> Result<Prediction<'a, B>> {
        let tangent = oriented_tangent(problem, aug_prev, prev_tangent, direction)?;
        let guess = aug_prev + &tangent * step_size;
        let lambda_idx = tangent.len() - 1;
        let mut weights = DVector::zeros(tangent.len());
        weights[lambda_idx] = 1.0;
        let offset = step_size * tangent[lambda_idx];
        let system = ExtendedSystem::new(problem, aug_prev.clone(), weights, offset)?;
        Ok(Prediction {
            guess,
            tangent,
            system,
        })
    }
}

/// Unit tangent at `aug_prev`, oriented along `prev_tangent` when there is
/// one and along `direction` in λ otherwise.
pub fn oriented_tangent<B: BranchProblem + ?Sized>(
    problem: &B,
    aug_prev: &DVector<f64>,
    prev_tangent: Option<&DVector<f64>>,
    direction: Direction,
) -> Result<DVector<f64>> {
    let j_ext = problem.extended_jacobian(aug_prev)?;
    let mut tangent = compute_nullspace_tangent(&j_ext)?;
    let flip = match prev_tangent {
        Some(prev) => tangent.dot(prev) < 0.0,
        None => tangent[tangent.len() - 1] * direction.sign() < 0.0,
    };
    if flip {
        tangent.neg_mut();
    }
    Ok(tangent)
}
