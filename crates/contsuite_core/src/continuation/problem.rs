//! Continuation problems f(x, λ, p) = 0 and the extended (n+1)-dimensional
//! system the corrector solves at every step.
//!
//! Augmented states are laid out as `u = [x..., λ]`.

use nalgebra::{DMatrix, DVector};

use super::predictor::PseudoArcLength;
use super::types::ContinuationParameters;
use crate::autodiff::Dual;
use crate::error::{ContinuationError, Result};
use crate::jacobian::{
    autodiff_jacobian, check_finite, evaluation_failed, finite_difference_jacobian,
    Differentiation,
};
use crate::problem::RootProblem;
use crate::solvers::Newton;
use crate::traits::ParametrizedSystem;

/// Core interface implemented by anything that can be continued.
pub trait BranchProblem {
    /// Number of state variables (excluding the continuation parameter).
    fn dimension(&self) -> usize;

    /// Evaluate f(x, λ) at the augmented state `u = [x, λ]`.
    fn residual(&self, aug: &DVector<f64>) -> Result<DVector<f64>>;

    /// Compute the extended Jacobian `[fx | fλ]`, n × (n+1).
    fn extended_jacobian(&self, aug: &DVector<f64>) -> Result<DMatrix<f64>>;
}

/// User-supplied extended Jacobian `(x, λ, p) -> [fx | fλ]`.
pub type ExtendedJacobianFn =
    Box<dyn Fn(&[f64], f64, &[f64]) -> anyhow::Result<DMatrix<f64>> + Send + Sync>;

type AutodiffFn<S> = fn(&S, &[f64], &[f64]) -> Result<DMatrix<f64>>;

/// A parametrized system bundled with its parameters, Jacobian strategy
/// and run configuration.
pub struct ContinuationProblem<S, P = PseudoArcLength, C = Newton> {
    system: S,
    params: Vec<f64>,
    jacobian: Option<ExtendedJacobianFn>,
    autodiff: Option<AutodiffFn<S>>,
    use_autodiff: bool,
    settings: ContinuationParameters<P, C>,
}

impl<S, P, C> ContinuationProblem<S, P, C>
where
    S: ParametrizedSystem<f64> + ParametrizedSystem<Dual>,
{
    pub fn new(system: S, settings: ContinuationParameters<P, C>) -> Self {
        Self {
            system,
            params: Vec::new(),
            jacobian: None,
            autodiff: Some(dual_extended_jacobian::<S>),
            use_autodiff: true,
            settings,
        }
    }
}

impl<S: ParametrizedSystem<f64>, P, C> ContinuationProblem<S, P, C> {
    /// Problem for systems that only evaluate in `f64`.
    pub fn without_autodiff(system: S, settings: ContinuationParameters<P, C>) -> Self {
        Self {
            system,
            params: Vec::new(),
            jacobian: None,
            autodiff: None,
            use_autodiff: false,
            settings,
        }
    }

    pub fn with_params(mut self, params: Vec<f64>) -> Self {
        self.params = params;
        self
    }

    /// Installs an analytic extended Jacobian returning `[fx | fλ]`.
    pub fn with_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&[f64], f64, &[f64]) -> anyhow::Result<DMatrix<f64>> + Send + Sync + 'static,
    {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    pub fn with_autodiff(mut self, enabled: bool) -> Self {
        self.use_autodiff = enabled;
        self
    }

    pub fn differentiation(&self) -> Differentiation {
        if self.jacobian.is_some() {
            Differentiation::Analytic
        } else if self.use_autodiff && self.autodiff.is_some() {
            Differentiation::Autodiff
        } else {
            Differentiation::FiniteDifference
        }
    }

    pub fn settings(&self) -> &ContinuationParameters<P, C> {
        &self.settings
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    fn check_aug(&self, aug: &DVector<f64>) -> Result<()> {
        let expected = self.system.dimension() + 1;
        if aug.len() != expected {
            return Err(ContinuationError::DimensionMismatch {
                context: "augmented state [x, λ]",
                expected,
                found: aug.len(),
            });
        }
        Ok(())
    }
}

impl<S: ParametrizedSystem<f64>, P, C> BranchProblem for ContinuationProblem<S, P, C> {
    fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn residual(&self, aug: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_aug(aug)?;
        let dim = self.system.dimension();
        let mut out = DVector::zeros(dim);
        self.system
            .apply(
                &aug.as_slice()[..dim],
                aug[dim],
                &self.params,
                out.as_mut_slice(),
            )
            .map_err(evaluation_failed("residual"))?;
        check_finite(out.as_slice(), "residual")?;
        Ok(out)
    }

    fn extended_jacobian(&self, aug: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_aug(aug)?;
        let dim = self.system.dimension();
        if let Some(jacobian) = &self.jacobian {
            let jac = jacobian(&aug.as_slice()[..dim], aug[dim], &self.params)
                .map_err(evaluation_failed("analytic Jacobian"))?;
            if jac.nrows() != dim {
                return Err(ContinuationError::DimensionMismatch {
                    context: "analytic extended Jacobian rows",
                    expected: dim,
                    found: jac.nrows(),
                });
            }
            if jac.ncols() != dim + 1 {
                return Err(ContinuationError::DimensionMismatch {
                    context: "analytic extended Jacobian columns",
                    expected: dim + 1,
                    found: jac.ncols(),
                });
            }
            check_finite(jac.as_slice(), "analytic Jacobian")?;
            return Ok(jac);
        }
        match self.autodiff {
            Some(autodiff) if self.use_autodiff => {
                autodiff(&self.system, aug.as_slice(), &self.params)
            }
            _ => {
                let fx = self.residual(aug)?;
                finite_difference_jacobian(|u| self.residual(u), aug, &fx)
            }
        }
    }
}

fn dual_extended_jacobian<S: ParametrizedSystem<Dual>>(
    system: &S,
    aug: &[f64],
    params: &[f64],
) -> Result<DMatrix<f64>> {
    let dim = system.dimension();
    let dual_params: Vec<Dual> = params.iter().map(|&p| Dual::constant(p)).collect();
    autodiff_jacobian(
        |u, out| {
            system
                .apply(&u[..dim], u[dim], &dual_params, out)
                .map_err(evaluation_failed("residual (dual)"))
        },
        aug,
        dim,
    )
}

/// The square system a corrector solves for one step:
///
/// ```text
/// F(u) = [ f(u)                       ]
///        [ w · (u − anchor) − offset  ]
/// ```
///
/// Pseudo-arclength uses the tangent as `w` and Δs as the offset; other
/// predictors pick a different auxiliary row.
pub struct ExtendedSystem<'a, B: ?Sized> {
    problem: &'a B,
    anchor: DVector<f64>,
    weights: DVector<f64>,
    offset: f64,
}

impl<'a, B: BranchProblem + ?Sized> ExtendedSystem<'a, B> {
    pub fn new(
        problem: &'a B,
        anchor: DVector<f64>,
        weights: DVector<f64>,
        offset: f64,
    ) -> Result<Self> {
        let expected = problem.dimension() + 1;
        for (context, len) in [
            ("extended system anchor", anchor.len()),
            ("extended system weights", weights.len()),
        ] {
            if len != expected {
                return Err(ContinuationError::DimensionMismatch {
                    context,
                    expected,
                    found: len,
                });
            }
        }
        Ok(Self {
            problem,
            anchor,
            weights,
            offset,
        })
    }

    /// Value of the auxiliary equation at `u`.
    pub fn constraint(&self, aug: &DVector<f64>) -> f64 {
        self.weights.dot(&(aug - &self.anchor)) - self.offset
    }
}

impl<B: BranchProblem + ?Sized> RootProblem for ExtendedSystem<'_, B> {
    fn dimension(&self) -> usize {
        self.problem.dimension() + 1
    }

    fn residual(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let f = self.problem.residual(x)?;
        let dim = f.len();
        let mut out = DVector::zeros(dim + 1);
        out.rows_mut(0, dim).copy_from(&f);
        out[dim] = self.constraint(x);
        Ok(out)
    }

    fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        let j_ext = self.problem.extended_jacobian(x)?;
        let dim = j_ext.nrows();
        if j_ext.ncols() != dim + 1 {
            return Err(ContinuationError::DimensionMismatch {
                context: "extended Jacobian columns",
                expected: dim + 1,
                found: j_ext.ncols(),
            });
        }
        let mut jac = DMatrix::zeros(dim + 1, dim + 1);
        jac.view_mut((0, 0), (dim, dim + 1)).copy_from(&j_ext);
        jac.row_mut(dim).copy_from(&self.weights.transpose());
        Ok(jac)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::traits::Scalar;
    use anyhow::bail;

    /// f₁ = x₁² + x₂² − λ, f₂ = x₂² − 2x₁ + 1.
    pub(crate) struct ParabolaCircle;

    impl<T: Scalar> ParametrizedSystem<T> for ParabolaCircle {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, x: &[T], lambda: T, _params: &[T], out: &mut [T]) -> anyhow::Result<()> {
            let one = T::one();
            let two = one + one;
            out[0] = x[0] * x[0] + x[1] * x[1] - lambda;
            out[1] = x[1] * x[1] - two * x[0] + one;
            Ok(())
        }
    }

    pub(crate) fn parabola_circle_jacobian(
        x: &[f64],
        _lambda: f64,
        _params: &[f64],
    ) -> anyhow::Result<DMatrix<f64>> {
        Ok(DMatrix::from_row_slice(
            2,
            3,
            &[2.0 * x[0], 2.0 * x[1], -1.0, -2.0, 2.0 * x[1], 0.0],
        ))
    }

    /// f(x, λ) = x − p₀ λ; errors for λ > 10.
    struct Scaled;

    impl ParametrizedSystem<f64> for Scaled {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(
            &self,
            x: &[f64],
            lambda: f64,
            params: &[f64],
            out: &mut [f64],
        ) -> anyhow::Result<()> {
            if lambda > 10.0 {
                bail!("lambda {lambda} out of model range");
            }
            out[0] = x[0] - params[0] * lambda;
            Ok(())
        }
    }

    fn aug(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    #[test]
    fn residual_splits_state_and_parameter() {
        let problem = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new());
        let r = problem.residual(&aug(&[1.0, -1.0, 2.0])).unwrap();
        assert_eq!(r.as_slice(), &[0.0, 0.0]);
        let r = problem.residual(&aug(&[1.0, -1.0, 1.5])).unwrap();
        assert_eq!(r.as_slice(), &[0.5, 0.0]);
    }

    #[test]
    fn extended_jacobian_modes_agree() {
        let u = aug(&[0.8, -0.6, 1.1]);
        let exact = parabola_circle_jacobian(&[0.8, -0.6], 1.1, &[]).unwrap();

        let analytic = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new())
            .with_jacobian(parabola_circle_jacobian);
        let autodiff = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new());
        let finite = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new())
            .with_autodiff(false);

        assert_eq!(analytic.differentiation(), Differentiation::Analytic);
        assert_eq!(autodiff.differentiation(), Differentiation::Autodiff);
        assert_eq!(finite.differentiation(), Differentiation::FiniteDifference);

        assert_eq!(analytic.extended_jacobian(&u).unwrap(), exact);
        assert!((autodiff.extended_jacobian(&u).unwrap() - &exact).abs().max() < 1e-12);
        assert!((finite.extended_jacobian(&u).unwrap() - &exact).abs().max() < 1e-6);
    }

    #[test]
    fn params_reach_the_system() {
        let problem = ContinuationProblem::without_autodiff(Scaled, ContinuationParameters::new())
            .with_params(vec![3.0]);
        let j = problem.extended_jacobian(&aug(&[0.0, 1.0])).unwrap();
        assert!((j[(0, 0)] - 1.0).abs() < 1e-7);
        assert!((j[(0, 1)] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn callback_failure_is_an_evaluation_error() {
        let problem = ContinuationProblem::without_autodiff(Scaled, ContinuationParameters::new())
            .with_params(vec![1.0]);
        let err = problem
            .residual(&aug(&[0.0, 11.0]))
            .expect_err("out of model range");
        assert!(err.is_numerical_evaluation());
    }

    #[test]
    fn augmented_dimension_is_checked() {
        let problem = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new());
        let err = problem
            .residual(&aug(&[1.0, -1.0]))
            .expect_err("missing λ");
        assert!(matches!(
            err,
            ContinuationError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn analytic_jacobian_shape_errors_name_the_axis() {
        let rows = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new())
            .with_jacobian(|_x: &[f64], _l: f64, _p: &[f64]| Ok(DMatrix::zeros(3, 3)));
        let err = rows
            .extended_jacobian(&aug(&[1.0, -1.0, 2.0]))
            .expect_err("too many rows");
        assert!(matches!(
            err,
            ContinuationError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));
        assert!(format!("{err}").contains("rows"), "{err}");

        let cols = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new())
            .with_jacobian(|_x: &[f64], _l: f64, _p: &[f64]| Ok(DMatrix::zeros(2, 2)));
        let err = cols
            .extended_jacobian(&aug(&[1.0, -1.0, 2.0]))
            .expect_err("missing fλ column");
        assert!(matches!(
            err,
            ContinuationError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
        assert!(format!("{err}").contains("columns"), "{err}");
    }

    #[test]
    fn extended_system_borders_the_jacobian() {
        let problem = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new())
            .with_jacobian(parabola_circle_jacobian);
        let anchor = aug(&[1.0, -1.0, 2.0]);
        let weights = aug(&[1.0, -1.0, 4.0]).normalize();
        let system = ExtendedSystem::new(&problem, anchor.clone(), weights.clone(), 0.25).unwrap();

        assert_eq!(RootProblem::dimension(&system), 3);
        let r = RootProblem::residual(&system, &anchor).unwrap();
        assert_eq!(r.as_slice(), &[0.0, 0.0, -0.25]);

        let j = system.jacobian(&anchor).unwrap();
        assert_eq!(j.row(2).transpose(), weights);
        assert_eq!(j[(0, 2)], -1.0);
    }

    #[test]
    fn extended_system_checks_lengths() {
        let problem = ContinuationProblem::new(ParabolaCircle, ContinuationParameters::new());
        let result = ExtendedSystem::new(&problem, aug(&[1.0, 2.0]), aug(&[0.0, 0.0, 1.0]), 0.1);
        assert!(matches!(
            result,
            Err(ContinuationError::DimensionMismatch { found: 2, .. })
        ));
    }
}
