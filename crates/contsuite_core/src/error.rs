//! Error taxonomy shared by the solvers and the continuation driver.

use thiserror::Error;

use crate::solvers::SolverInfo;

#[derive(Debug, Error)]
pub enum ContinuationError {
    /// A residual or Jacobian evaluation produced NaN or infinity.
    #[error("non-finite value encountered while evaluating {context}")]
    NonFinite { context: &'static str },

    /// A user callback returned an error.
    #[error("evaluation of {context} failed")]
    Evaluation {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The linear solve hit a singular or numerically singular matrix.
    #[error("singular matrix in {context}")]
    SingularMatrix { context: &'static str },

    /// The corrector ran out of iterations before meeting both tolerances.
    #[error(
        "nonlinear solver failed to converge in {} iterations (‖f(x)‖ = {:e}, ‖Δx‖/‖x‖ = {:e})",
        .0.iterations,
        .0.residual_norm,
        .0.step_norm
    )]
    Convergence(SolverInfo),

    #[error("dimension mismatch in {context}: expected {expected}, got {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

impl ContinuationError {
    /// True for failures caused by NaN/inf or a failing user callback.
    pub fn is_numerical_evaluation(&self) -> bool {
        matches!(self, Self::NonFinite { .. } | Self::Evaluation { .. })
    }

    /// Diagnostics of the last iteration, when the error is a convergence failure.
    pub fn solver_info(&self) -> Option<&SolverInfo> {
        match self {
            Self::Convergence(info) => Some(info),
            _ => None,
        }
    }
}

pub type Result<T, E = ContinuationError> = std::result::Result<T, E>;
