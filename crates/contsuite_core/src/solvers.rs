//! Nonlinear correctors: Newton-Raphson and Broyden's quasi-Newton method.
//!
//! Both iterate x ← x + Δx with J·Δx = −f(x) and stop once the relative step
//! ‖Δx‖/‖x‖ and the residual ‖f(x)‖ are both below tolerance. They differ
//! only in where J comes from: Newton asks the problem every iteration,
//! Broyden asks once and then applies rank-one secant updates.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ContinuationError, Result};
use crate::linear::{LinearSolver, LuSolver};
use crate::problem::RootProblem;

/// Diagnostics of one solver call. Produced fresh by every call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SolverInfo {
    /// ‖f(x)‖ at the last iterate.
    pub residual_norm: f64,
    /// ‖Δx‖/‖x‖ of the last step.
    pub step_norm: f64,
    pub iterations: usize,
}

impl SolverInfo {
    fn converged(&self, x_tolerance: f64, residual_tolerance: f64) -> bool {
        self.step_norm < x_tolerance && self.residual_norm < residual_tolerance
    }
}

#[derive(Debug, Clone)]
pub struct NonlinearSolution {
    pub x: DVector<f64>,
    pub info: SolverInfo,
}

/// Iteratively refines an initial guess toward a root of a [`RootProblem`].
pub trait NonlinearSolver {
    fn solve<P: RootProblem + ?Sized>(
        &self,
        problem: &P,
        x0: DVector<f64>,
    ) -> Result<NonlinearSolution>;
}

/// Newton-Raphson: J(xₖ) Δxₖ = −f(xₖ), xₖ₊₁ = xₖ + Δxₖ.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Newton<L = LuSolver> {
    pub x_tolerance: f64,
    pub residual_tolerance: f64,
    pub max_iterations: usize,
    pub linear_solver: L,
}

/// Broyden's method with the "good" rank-one update
/// Jₖ₊₁ = Jₖ + ((Δfₖ − Jₖ Δxₖ) ⊗ Δxₖ) / (Δxₖ · Δxₖ).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Broyden<L = LuSolver> {
    pub x_tolerance: f64,
    pub residual_tolerance: f64,
    pub max_iterations: usize,
    pub linear_solver: L,
}

impl<L: Default> Default for Newton<L> {
    fn default() -> Self {
        Self {
            x_tolerance: 1e-8,
            residual_tolerance: 1e-8,
            max_iterations: 20,
            linear_solver: L::default(),
        }
    }
}

impl<L: Default> Default for Broyden<L> {
    fn default() -> Self {
        Self {
            x_tolerance: 1e-8,
            residual_tolerance: 1e-8,
            max_iterations: 20,
            linear_solver: L::default(),
        }
    }
}

impl Newton {
    /// Newton with default tolerances and an LU linear solver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Broyden {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L: LinearSolver> NonlinearSolver for Newton<L> {
    fn solve<P: RootProblem + ?Sized>(
        &self,
        problem: &P,
        x0: DVector<f64>,
    ) -> Result<NonlinearSolution> {
        check_initial_guess(problem, &x0)?;
        let mut x = x0;
        let mut residual = problem.residual(&x)?;
        let mut info = SolverInfo {
            residual_norm: residual.norm(),
            step_norm: f64::INFINITY,
            iterations: 0,
        };

        for k in 0..self.max_iterations {
            let jac = problem.jacobian(&x)?;
            let delta = self.linear_solver.solve(&jac, &(-&residual))?;
            x += &delta;
            residual = problem.residual(&x)?;

            info = SolverInfo {
                residual_norm: residual.norm(),
                step_norm: relative_step(&delta, &x),
                iterations: k + 1,
            };
            trace!(
                iteration = info.iterations,
                residual_norm = info.residual_norm,
                step_norm = info.step_norm,
                "newton iteration"
            );

            if info.converged(self.x_tolerance, self.residual_tolerance) {
                return Ok(NonlinearSolution { x, info });
            }
        }

        Err(ContinuationError::Convergence(info))
    }
}

impl<L: LinearSolver> NonlinearSolver for Broyden<L> {
    fn solve<P: RootProblem + ?Sized>(
        &self,
        problem: &P,
        x0: DVector<f64>,
    ) -> Result<NonlinearSolution> {
        check_initial_guess(problem, &x0)?;
        let mut x = x0;
        let mut residual = problem.residual(&x)?;
        let mut jac = problem.jacobian(&x)?;
        let mut info = SolverInfo {
            residual_norm: residual.norm(),
            step_norm: f64::INFINITY,
            iterations: 0,
        };

        for k in 0..self.max_iterations {
            let delta = self.linear_solver.solve(&jac, &(-&residual))?;
            x += &delta;
            let next_residual = problem.residual(&x)?;

            info = SolverInfo {
                residual_norm: next_residual.norm(),
                step_norm: relative_step(&delta, &x),
                iterations: k + 1,
            };
            trace!(
                iteration = info.iterations,
                residual_norm = info.residual_norm,
                step_norm = info.step_norm,
                "broyden iteration"
            );

            if info.converged(self.x_tolerance, self.residual_tolerance) {
                return Ok(NonlinearSolution { x, info });
            }

            let step_sq = delta.norm_squared();
            if step_sq > 0.0 {
                let secant_error = &next_residual - &residual - &jac * &delta;
                jac.ger(1.0 / step_sq, &secant_error, &delta, 1.0);
            }
            residual = next_residual;
        }

        Err(ContinuationError::Convergence(info))
    }
}

/// Solves `problem` from `x0` with `method`.
pub fn solve<P, M>(problem: &P, method: &M, x0: &[f64]) -> Result<NonlinearSolution>
where
    P: RootProblem + ?Sized,
    M: NonlinearSolver,
{
    method.solve(problem, DVector::from_column_slice(x0))
}

fn check_initial_guess<P: RootProblem + ?Sized>(problem: &P, x0: &DVector<f64>) -> Result<()> {
    let expected = problem.dimension();
    if x0.len() != expected {
        return Err(ContinuationError::DimensionMismatch {
            context: "initial guess",
            expected,
            found: x0.len(),
        });
    }
    if x0.iter().any(|v| !v.is_finite()) {
        return Err(ContinuationError::NonFinite {
            context: "initial guess",
        });
    }
    Ok(())
}

fn relative_step(delta: &DVector<f64>, x: &DVector<f64>) -> f64 {
    let scale = x.norm();
    if scale > 0.0 {
        delta.norm() / scale
    } else {
        delta.norm()
    }
}
