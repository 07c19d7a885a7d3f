//! Square nonlinear problems f(x, p) = 0.

use nalgebra::{DMatrix, DVector};

use crate::autodiff::Dual;
use crate::error::{ContinuationError, Result};
use crate::jacobian::{
    autodiff_jacobian, check_finite, evaluation_failed, finite_difference_jacobian,
    Differentiation,
};
use crate::traits::NonlinearSystem;

/// What a corrector needs: a square residual F(u) and its Jacobian.
///
/// Implemented by [`NonlinearProblem`] and by the extended (n+1)-dimensional
/// system a continuation predictor builds around f(x, λ, p).
pub trait RootProblem {
    fn dimension(&self) -> usize;

    fn residual(&self, x: &DVector<f64>) -> Result<DVector<f64>>;

    fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>>;
}

/// User-supplied Jacobian of f(x, p), n×n.
pub type JacobianFn = Box<dyn Fn(&[f64], &[f64]) -> anyhow::Result<DMatrix<f64>> + Send + Sync>;

type AutodiffFn<S> = fn(&S, &[f64], &[f64]) -> Result<DMatrix<f64>>;

/// Immutable bundle of a system, its parameters and a Jacobian strategy.
pub struct NonlinearProblem<S> {
    system: S,
    params: Vec<f64>,
    jacobian: Option<JacobianFn>,
    autodiff: Option<AutodiffFn<S>>,
    use_autodiff: bool,
}

impl<S> NonlinearProblem<S>
where
    S: NonlinearSystem<f64> + NonlinearSystem<Dual>,
{
    /// Problem differentiated automatically unless told otherwise.
    pub fn new(system: S) -> Self {
        Self {
            system,
            params: Vec::new(),
            jacobian: None,
            autodiff: Some(dual_jacobian::<S>),
            use_autodiff: true,
        }
    }
}

impl<S: NonlinearSystem<f64>> NonlinearProblem<S> {
    /// Problem for systems that only evaluate in `f64`; the Jacobian comes
    /// from finite differences or [`Self::with_jacobian`].
    pub fn without_autodiff(system: S) -> Self {
        Self {
            system,
            params: Vec::new(),
            jacobian: None,
            autodiff: None,
            use_autodiff: false,
        }
    }

    pub fn with_params(mut self, params: Vec<f64>) -> Self {
        self.params = params;
        self
    }

    /// Installs an analytic Jacobian. It takes precedence over autodiff.
    pub fn with_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&[f64], &[f64]) -> anyhow::Result<DMatrix<f64>> + Send + Sync + 'static,
    {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    /// Toggles autodiff; disabling it falls back to finite differences.
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

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    fn check_dimension(&self, x: &DVector<f64>) -> Result<()> {
        let expected = self.system.dimension();
        if x.len() != expected {
            return Err(ContinuationError::DimensionMismatch {
                context: "nonlinear problem state",
                expected,
                found: x.len(),
            });
        }
        Ok(())
    }
}

impl<S: NonlinearSystem<f64>> RootProblem for NonlinearProblem<S> {
    fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn residual(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_dimension(x)?;
        let mut out = DVector::zeros(x.len());
        self.system
            .apply(x.as_slice(), &self.params, out.as_mut_slice())
            .map_err(evaluation_failed("residual"))?;
        check_finite(out.as_slice(), "residual")?;
        Ok(out)
    }

    fn jacobian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_dimension(x)?;
        let n = x.len();
        if let Some(jacobian) = &self.jacobian {
            let jac = jacobian(x.as_slice(), &self.params)
                .map_err(evaluation_failed("analytic Jacobian"))?;
            if jac.nrows() != n {
                return Err(ContinuationError::DimensionMismatch {
                    context: "analytic Jacobian rows",
                    expected: n,
                    found: jac.nrows(),
                });
            }
            if jac.ncols() != n {
                return Err(ContinuationError::DimensionMismatch {
                    context: "analytic Jacobian columns",
                    expected: n,
                    found: jac.ncols(),
                });
            }
            check_finite(jac.as_slice(), "analytic Jacobian")?;
            return Ok(jac);
        }
        match self.autodiff {
            Some(autodiff) if self.use_autodiff => {
                autodiff(&self.system, x.as_slice(), &self.params)
            }
            _ => {
                let fx = self.residual(x)?;
                finite_difference_jacobian(|u| self.residual(u), x, &fx)
            }
        }
    }
}

fn dual_jacobian<S: NonlinearSystem<Dual>>(
    system: &S,
    x: &[f64],
    params: &[f64],
) -> Result<DMatrix<f64>> {
    let dual_params: Vec<Dual> = params.iter().map(|&p| Dual::constant(p)).collect();
    autodiff_jacobian(
        |x, out| {
            system
                .apply(x, &dual_params, out)
                .map_err(evaluation_failed("residual (dual)"))
        },
        x,
        system.dimension(),
    )
}
