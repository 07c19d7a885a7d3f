//! Core types for continuation analysis.
//!
//! Run configuration, accepted points, and the solution handed back to the
//! caller.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::predictor::PseudoArcLength;
use super::problem::BranchProblem;
use super::util::continuation_point_to_aug;
use crate::error::{ContinuationError, Result};
use crate::linear::LuSolver;
use crate::solvers::{Newton, SolverInfo};

/// Initial direction of travel along λ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

/// Settings controlling the continuation run.
///
/// `P` is the predictor and `C` the corrector; both are chosen at
/// configuration time and swapped with [`Self::with_predictor`] and
/// [`Self::with_corrector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationParameters<P = PseudoArcLength, C = Newton<LuSolver>> {
    pub lambda_min: f64,
    pub lambda_max: f64,
    /// Arclength step Δs; always positive, `direction` carries the sign.
    pub step_size: f64,
    pub direction: Direction,
    pub max_steps: usize,
    pub predictor: P,
    pub corrector: C,
    /// Report every accepted step at `info` level instead of `debug`.
    pub verbose: bool,
    /// Number of state components shown in step reports and tables.
    pub ncols: usize,
}

impl<P: Default, C: Default> Default for ContinuationParameters<P, C> {
    fn default() -> Self {
        Self {
            lambda_min: -1.0,
            lambda_max: 1.0,
            step_size: 0.1,
            direction: Direction::Forward,
            max_steps: 100,
            predictor: P::default(),
            corrector: C::default(),
            verbose: false,
            ncols: 2,
        }
    }
}

impl ContinuationParameters {
    /// Defaults with pseudo-arclength prediction and Newton correction.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P, C> ContinuationParameters<P, C> {
    pub fn with_predictor<Q>(self, predictor: Q) -> ContinuationParameters<Q, C> {
        ContinuationParameters {
            lambda_min: self.lambda_min,
            lambda_max: self.lambda_max,
            step_size: self.step_size,
            direction: self.direction,
            max_steps: self.max_steps,
            predictor,
            corrector: self.corrector,
            verbose: self.verbose,
            ncols: self.ncols,
        }
    }

    pub fn with_corrector<D>(self, corrector: D) -> ContinuationParameters<P, D> {
        ContinuationParameters {
            lambda_min: self.lambda_min,
            lambda_max: self.lambda_max,
            step_size: self.step_size,
            direction: self.direction,
            max_steps: self.max_steps,
            predictor: self.predictor,
            corrector,
            verbose: self.verbose,
            ncols: self.ncols,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lambda_min.is_finite() && self.lambda_max.is_finite()) {
            return Err(ContinuationError::InvalidParameters(format!(
                "parameter bounds must be finite, got [{}, {}]",
                self.lambda_min, self.lambda_max
            )));
        }
        if self.lambda_min >= self.lambda_max {
            return Err(ContinuationError::InvalidParameters(format!(
                "lambda_min ({}) must be below lambda_max ({})",
                self.lambda_min, self.lambda_max
            )));
        }
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(ContinuationError::InvalidParameters(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if self.ncols == 0 {
            return Err(ContinuationError::InvalidParameters(
                "ncols must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether λ lies in `[lambda_min, lambda_max]`.
    pub fn contains(&self, lambda: f64) -> bool {
        lambda >= self.lambda_min && lambda <= self.lambda_max
    }
}

/// A single point on a continuation branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationPoint {
    pub state: Vec<f64>,
    pub param_value: f64,
}

/// How the branch arrived at an accepted point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Unit tangent (xₛ, λₛ) the predictor used for this step.
    pub tangent: Vec<f64>,
    /// Corrector diagnostics of the step.
    pub info: SolverInfo,
}

/// Accepted points in order. `steps[i]` produced `points[i + 1]`; the first
/// point is the user's starting point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuationBranch {
    pub points: Vec<ContinuationPoint>,
    pub steps: Vec<StepRecord>,
}

/// Why a run stopped.
#[derive(Debug)]
pub enum Termination {
    /// The corrected point had λ outside the bounds; it was not appended.
    BoundsExceeded { lambda: f64 },
    /// `max_steps` steps were accepted.
    StepBudgetExhausted,
    /// A predictor or corrector call failed; the branch holds every point
    /// accepted before it.
    Failed(ContinuationError),
}

/// Serializable summary of a [`Termination`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationKind {
    BoundsExceeded { lambda: f64 },
    StepBudgetExhausted,
    Failed { reason: String },
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed(_))
    }

    pub fn error(&self) -> Option<&ContinuationError> {
        match self {
            Termination::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn kind(&self) -> TerminationKind {
        match self {
            Termination::BoundsExceeded { lambda } => {
                TerminationKind::BoundsExceeded { lambda: *lambda }
            }
            Termination::StepBudgetExhausted => TerminationKind::StepBudgetExhausted,
            Termination::Failed(err) => TerminationKind::Failed {
                reason: err.to_string(),
            },
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::BoundsExceeded { lambda } => {
                write!(f, "parameter left bounds at λ = {lambda:e}")
            }
            Termination::StepBudgetExhausted => write!(f, "step budget exhausted"),
            Termination::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// The trace of a continuation run, tied to the problem that produced it.
pub struct ContinuationSolution<'a> {
    branch: ContinuationBranch,
    termination: Termination,
    problem: &'a dyn BranchProblem,
    ncols: usize,
}

impl<'a> ContinuationSolution<'a> {
    pub(crate) fn new(
        branch: ContinuationBranch,
        termination: Termination,
        problem: &'a dyn BranchProblem,
        ncols: usize,
    ) -> Self {
        Self {
            branch,
            termination,
            problem,
            ncols,
        }
    }

    pub fn points(&self) -> &[ContinuationPoint] {
        &self.branch.points
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.branch.steps
    }

    pub fn lambdas(&self) -> impl Iterator<Item = f64> + '_ {
        self.branch.points.iter().map(|p| p.param_value)
    }

    pub fn states(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.branch.points.iter().map(|p| p.state.as_slice())
    }

    pub fn last(&self) -> Option<&ContinuationPoint> {
        self.branch.points.last()
    }

    pub fn len(&self) -> usize {
        self.branch.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branch.points.is_empty()
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    pub fn problem(&self) -> &'a dyn BranchProblem {
        self.problem
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn branch(&self) -> &ContinuationBranch {
        &self.branch
    }

    pub fn into_branch(self) -> ContinuationBranch {
        self.branch
    }

    /// ‖f(x, λ)‖ at point `index`, re-evaluated through the problem.
    /// `None` when there is no such point.
    pub fn residual_norm(&self, index: usize) -> Option<Result<f64>> {
        let point = self.branch.points.get(index)?;
        let aug = continuation_point_to_aug(point);
        Some(self.problem.residual(&aug).map(|r| r.norm()))
    }
}

impl fmt::Debug for ContinuationSolution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationSolution")
            .field("branch", &self.branch)
            .field("termination", &self.termination)
            .field("ncols", &self.ncols)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ContinuationSolution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = self.problem.dimension();
        let shown = self.ncols.min(dim);

        write!(f, "{:>5} {:>14}", "step", "λ")?;
        for i in 0..shown {
            write!(f, " {:>14}", format!("x[{}]", i + 1))?;
        }
        if shown < dim {
            write!(f, " {:>4}", "...")?;
        }
        writeln!(f)?;

        for (idx, point) in self.branch.points.iter().enumerate() {
            write!(f, "{:>5} {:>14.6e}", idx, point.param_value)?;
            for value in point.state.iter().take(shown) {
                write!(f, " {:>14.6e}", value)?;
            }
            writeln!(f)?;
        }
        write!(f, "{} points, {}", self.branch.points.len(), self.termination)
    }
}

impl Serialize for ContinuationSolution<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ContinuationSolution", 4)?;
        state.serialize_field("points", &self.branch.points)?;
        state.serialize_field("steps", &self.branch.steps)?;
        state.serialize_field("termination", &self.termination.kind())?;
        state.serialize_field("ncols", &self.ncols)?;
        state.end()
    }
}
