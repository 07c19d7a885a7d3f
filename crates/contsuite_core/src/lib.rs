//! The `contsuite_core` crate traces solution branches of parametrized
//! nonlinear systems f(x, λ, p) = 0 by predictor-corrector continuation.
//! User systems are written once, generic over [`traits::Scalar`], and
//! evaluated both with `f64` and with dual numbers for exact Jacobians.
//!
//! Key components:
//! - **Traits**: `Scalar`, `NonlinearSystem` (f(x, p)), `ParametrizedSystem` (f(x, λ, p)).
//! - **Jacobians**: analytic, forward-mode autodiff (`autodiff::Dual`) or finite differences.
//! - **Solvers**: Newton and Broyden correctors over a pluggable `LinearSolver` (LU, QR).
//! - **Continuation**: pseudo-arclength and natural-parameter predictors and the driver loop.

pub mod autodiff;
pub mod continuation;
pub mod error;
pub mod jacobian;
pub mod linear;
pub mod problem;
pub mod solvers;
pub mod traits;

pub use continuation::{
    continuation, ContinuationParameters, ContinuationProblem, ContinuationSolution, Direction,
    NaturalParameter, PseudoArcLength, Termination,
};
pub use error::{ContinuationError, Result};
pub use jacobian::{autodiff_jacobian, finite_difference_jacobian, Differentiation};
pub use linear::{LinearSolver, LuSolver, QrSolver};
pub use problem::{NonlinearProblem, RootProblem};
pub use solvers::{solve, Broyden, Newton, NonlinearSolution, NonlinearSolver, SolverInfo};
pub use traits::{NonlinearSystem, ParametrizedSystem, Scalar};
