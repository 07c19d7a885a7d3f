//! Predictor-corrector continuation of f(x, λ, p) = 0 in the parameter λ.
//!
//! Starting from a solution (x₀, λ₀), every step predicts a new point along
//! the branch tangent, corrects it on an extended (n+1)-dimensional system
//! and appends it to the trace. The run stops when λ leaves its bounds, the
//! step budget is spent, or a step fails.

pub mod predictor;
pub mod problem;
pub mod types;
pub mod util;

pub use predictor::{oriented_tangent, NaturalParameter, Prediction, Predictor, PseudoArcLength};
pub use problem::{BranchProblem, ContinuationProblem, ExtendedJacobianFn, ExtendedSystem};
pub use types::{
    ContinuationBranch, ContinuationParameters, ContinuationPoint, ContinuationSolution,
    Direction, StepRecord, Termination, TerminationKind,
};
pub use util::compute_nullspace_tangent;

use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::error::{ContinuationError, Result};
use crate::solvers::{NonlinearSolver, SolverInfo};
use crate::traits::ParametrizedSystem;
use util::{aug_to_continuation_point, state_to_aug};

/// Traces the branch through `(x0, lambda0)` with the problem's settings.
///
/// Returns `Err` only when the run cannot start: invalid settings, a
/// starting point of the wrong size, non-finite, or outside the λ bounds.
/// Everything that happens after the first point is reported through
/// [`ContinuationSolution::termination`].
pub fn continuation<'a, S, P, C>(
    problem: &'a ContinuationProblem<S, P, C>,
    x0: &[f64],
    lambda0: f64,
) -> Result<ContinuationSolution<'a>>
where
    S: ParametrizedSystem<f64>,
    P: Predictor,
    C: NonlinearSolver,
{
    let settings = problem.settings();
    settings.validate()?;

    let dim = problem.dimension();
    if x0.len() != dim {
        return Err(ContinuationError::DimensionMismatch {
            context: "initial state",
            expected: dim,
            found: x0.len(),
        });
    }
    if !lambda0.is_finite() || x0.iter().any(|v| !v.is_finite()) {
        return Err(ContinuationError::NonFinite {
            context: "initial point",
        });
    }
    if !settings.contains(lambda0) {
        return Err(ContinuationError::InvalidParameters(format!(
            "initial parameter {lambda0} outside [{}, {}]",
            settings.lambda_min, settings.lambda_max
        )));
    }

    let mut branch = ContinuationBranch {
        points: vec![ContinuationPoint {
            state: x0.to_vec(),
            param_value: lambda0,
        }],
        steps: Vec::new(),
    };
    let mut prev_aug = state_to_aug(x0, lambda0);
    let mut prev_tangent: Option<DVector<f64>> = None;
    let mut termination = Termination::StepBudgetExhausted;

    for step in 1..=settings.max_steps {
        let (next_aug, tangent, info) = match advance(
            problem,
            &settings.predictor,
            &settings.corrector,
            &prev_aug,
            prev_tangent.as_ref(),
            settings.direction,
            settings.step_size,
        ) {
            Ok(result) => result,
            Err(err) => {
                warn!(step, lambda = prev_aug[dim], error = %err, "continuation step failed");
                termination = Termination::Failed(err);
                break;
            }
        };

        let lambda = next_aug[dim];
        if !settings.contains(lambda) {
            termination = Termination::BoundsExceeded { lambda };
            break;
        }

        let shown = format_components(&next_aug.as_slice()[..settings.ncols.min(dim)]);
        if settings.verbose {
            info!(
                step,
                lambda,
                x = %shown,
                residual_norm = info.residual_norm,
                step_norm = info.step_norm,
                iterations = info.iterations,
                "accepted continuation step"
            );
        } else {
            debug!(
                step,
                lambda,
                x = %shown,
                residual_norm = info.residual_norm,
                step_norm = info.step_norm,
                iterations = info.iterations,
                "accepted continuation step"
            );
        }

        branch.points.push(aug_to_continuation_point(&next_aug));
        branch.steps.push(StepRecord {
            tangent: tangent.iter().copied().collect(),
            info,
        });
        prev_aug = next_aug;
        prev_tangent = Some(tangent);
    }

    if settings.verbose {
        info!(points = branch.points.len(), %termination, "continuation finished");
    } else {
        debug!(points = branch.points.len(), %termination, "continuation finished");
    }

    Ok(ContinuationSolution::new(
        branch,
        termination,
        problem,
        settings.ncols,
    ))
}

/// One predict-correct cycle. Returns the corrected point, the tangent the
/// predictor used, and the corrector diagnostics.
fn advance<B, P, C>(
    problem: &B,
    predictor: &P,
    corrector: &C,
    prev_aug: &DVector<f64>,
    prev_tangent: Option<&DVector<f64>>,
    direction: Direction,
    step_size: f64,
) -> Result<(DVector<f64>, DVector<f64>, SolverInfo)>
where
    B: BranchProblem + ?Sized,
    P: Predictor,
    C: NonlinearSolver,
{
    let prediction = predictor.predict(problem, prev_aug, prev_tangent, direction, step_size)?;
    let corrected = corrector.solve(&prediction.system, prediction.guess)?;
    Ok((corrected.x, prediction.tangent, corrected.info))
}

fn format_components(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.6e}")).collect();
    format!("[{}]", parts.join(", "))
}
