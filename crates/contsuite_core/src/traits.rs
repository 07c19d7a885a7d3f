use anyhow::Result;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in user equations.
/// Must support basic arithmetic, debug printing, and conversion from f64.
///
/// Implemented by `f64` and by [`crate::autodiff::Dual`], which is how
/// automatic differentiation reaches user code.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A square nonlinear system f(x, p) = 0.
pub trait NonlinearSystem<T: Scalar> {
    /// Number of unknowns (and equations).
    fn dimension(&self) -> usize;

    /// Evaluates f(x, p).
    /// x: current guess
    /// params: fixed auxiliary parameters
    /// out: buffer to write the residual
    fn apply(&self, x: &[T], params: &[T], out: &mut [T]) -> Result<()>;
}

/// A nonlinear system f(x, λ, p) = 0 depending on a scalar continuation
/// parameter λ.
pub trait ParametrizedSystem<T: Scalar> {
    /// Number of state variables (excluding λ).
    fn dimension(&self) -> usize;

    /// Evaluates f(x, λ, p) into `out`.
    fn apply(&self, x: &[T], lambda: T, params: &[T], out: &mut [T]) -> Result<()>;
}
