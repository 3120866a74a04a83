//! Testing problems and utilities useful for benchmarking, debugging and
//! smoke testing.
//!
//! [`Sphere`] and [`Rosenbrock`] are recommended for first tests; the
//! constrained problems exercise the active-set machinery.
//!
//! # References
//!
//! \[1\] [A Literature Survey of Benchmark Functions For Global Optimization
//! Problems](https://arxiv.org/abs/1308.4008)

#![allow(unused)]

use std::error::Error as StdError;

use nalgebra::{
    dvector, storage::Storage, DMatrix, DVector, Dyn, IsContiguous, OVector, Vector,
};
use thiserror::Error;

use crate::core::{Domain, Function, Optimizer, Problem};

/// Extension of the [`Problem`] trait that provides additional information
/// that is useful for testing algorithms.
pub trait TestProblem: Problem {
    /// Standard initial values for the problem. Using the same initial
    /// values is essential for fair comparison of methods.
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>>;
}

/// Extension of the [`Function`] trait that provides additional information
/// that is useful for testing optimizers.
pub trait TestFunction: Function + TestProblem {
    /// A set of global optima (if known and finite).
    fn optima(&self) -> Vec<OVector<Self::Field, Dyn>> {
        Vec::new()
    }

    /// Test if given point is a global optimum, given the tolerance `eps`.
    fn is_optimum<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>, eps: Self::Field) -> bool
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous;
}

/// [Sphere
/// function](https://en.wikipedia.org/wiki/Test_functions_for_optimization)
/// \[1\], optionally with a shifted minimizer.
///
/// This is a simple paraboloid which can be used in early development and
/// sanity checking as it can be considered a trivial problem.
#[derive(Debug, Clone)]
pub struct Sphere {
    center: DVector<f64>,
}

impl Sphere {
    /// Initializes the function with given dimension and the minimizer at
    /// the origin.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be greater than zero");
        Self {
            center: DVector::zeros(n),
        }
    }

    /// Initializes the function with the minimizer at `center`.
    pub fn with_center(center: DVector<f64>) -> Self {
        assert!(!center.is_empty(), "n must be greater than zero");
        Self { center }
    }
}

impl Problem for Sphere {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.center.len())
    }
}

impl Function for Sphere {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        x.iter()
            .zip(self.center.iter())
            .map(|(xi, ci)| (xi - ci).powi(2))
            .sum()
    }
}

impl TestProblem for Sphere {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![DVector::zeros(self.center.len())]
    }
}

impl TestFunction for Sphere {
    fn optima(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![self.center.clone()]
    }

    fn is_optimum<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>, eps: Self::Field) -> bool
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        self.apply(x) <= eps
    }
}

/// The two-dimensional [Rosenbrock
/// function](https://en.wikipedia.org/wiki/Rosenbrock_function) \[1\].
///
/// The global minimum is inside a long, narrow, parabolic shaped flat
/// valley; finding the valley is easy, traversing it is not.
#[derive(Debug, Clone, Copy)]
pub struct Rosenbrock;

impl Problem for Rosenbrock {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(2)
    }
}

impl Function for Rosenbrock {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        100.0 * (x[1] - x[0].powi(2)).powi(2) + (1.0 - x[0]).powi(2)
    }
}

impl TestProblem for Rosenbrock {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![dvector![-1.2, 1.0]]
    }
}

impl TestFunction for Rosenbrock {
    fn optima(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![dvector![1.0, 1.0]]
    }

    fn is_optimum<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>, eps: Self::Field) -> bool
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        self.apply(x) <= eps
    }
}

/// Minimize `x + y` subject to `x + y ≥ 1`, `x ≥ 0`, `y ≥ 0`.
///
/// The minimum value 1 is attained on a whole edge of the feasible region;
/// the interesting part is that the iterates must respect feasibility on the
/// way there.
#[derive(Debug, Clone, Copy)]
pub struct LinearSum;

impl Problem for LinearSum {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        // −x − y ≤ −1, −x ≤ 0, −y ≤ 0.
        let a = DMatrix::from_column_slice(
            2,
            3,
            &[-1.0, -1.0, -1.0, 0.0, 0.0, -1.0],
        );
        Domain::polytope(a, dvector![-1.0, 0.0, 0.0])
    }
}

impl Function for LinearSum {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        x[0] + x[1]
    }
}

impl TestProblem for LinearSum {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![dvector![2.0, 2.0]]
    }
}

impl TestFunction for LinearSum {
    fn is_optimum<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>, eps: Self::Field) -> bool
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        (self.apply(x) - 1.0).abs() <= eps
    }
}

/// Minimize `x² + y² + z²` subject to `x + y + z = 1`, the equality encoded
/// as two opposing inequalities.
#[derive(Debug, Clone, Copy)]
pub struct SphereOnPlane;

impl Problem for SphereOnPlane {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        let a = DMatrix::from_column_slice(3, 2, &[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]);
        Domain::polytope(a, dvector![1.0, -1.0])
    }
}

impl Function for SphereOnPlane {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        x.iter().map(|xi| xi * xi).sum()
    }
}

impl TestProblem for SphereOnPlane {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![dvector![1.0, 0.0, 0.0]]
    }
}

impl TestFunction for SphereOnPlane {
    fn optima(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![dvector![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]]
    }

    fn is_optimum<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>, eps: Self::Field) -> bool
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        (self.apply(x) - 1.0 / 3.0).abs() <= eps
    }
}

/// Minimize `arctan(x + 100)` subject to `x ≤ −99`.
///
/// The objective keeps decreasing towards −∞ while flattening out, which
/// historically drove naive radius management into an infinite loop. The
/// test is simply that the solver terminates at a feasible point.
#[derive(Debug, Clone, Copy)]
pub struct ArctanRidge;

impl Problem for ArctanRidge {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        let a = DMatrix::from_column_slice(1, 1, &[1.0]);
        Domain::polytope(a, dvector![-99.0])
    }
}

impl Function for ArctanRidge {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        (x[0] + 100.0).atan()
    }
}

impl TestProblem for ArctanRidge {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![dvector![-99.0]]
    }
}

/// Optimization error of the testing driver (see [`optimize`]).
#[derive(Debug, Error)]
pub enum TestingError<E: StdError + 'static> {
    /// Error of the algorithm used.
    #[error("{0}")]
    Inner(#[from] E),
    /// Algorithm did not terminate.
    #[error("algorithm did not terminate")]
    Termination,
}

/// A simple optimization driver that can be used in tests.
pub fn optimize<F: Function, O: Optimizer<F>>(
    f: &F,
    dom: &Domain<F::Field>,
    mut optimizer: O,
    mut x: OVector<F::Field, Dyn>,
    min: F::Field,
    max_iters: usize,
    tolerance: F::Field,
) -> Result<OVector<F::Field, Dyn>, TestingError<O::Error>>
where
    O::Error: StdError,
{
    let mut iter = 0;

    loop {
        let fx = optimizer.opt_next(f, dom, &mut x)?;

        if fx <= min + tolerance {
            // Converged.
            return Ok(x);
        }

        if iter == max_iters {
            return Err(TestingError::Termination);
        } else {
            iter += 1;
        }
    }
}
