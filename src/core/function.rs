use nalgebra::{storage::Storage, Dyn, IsContiguous, Vector};

use super::base::Problem;

/// The trait for defining objective functions.
///
/// ## Defining a function
///
/// A function is any type that implements [`Function`] and [`Problem`]
/// traits. There is one required associated type (the field) and two required
/// methods: [`apply`](Function::apply) and [`domain`](Problem::domain).
///
/// ```rust
/// use lincoa::nalgebra as na;
/// use lincoa::{Domain, Function, Problem};
/// use na::{Dyn, IsContiguous};
///
/// // A problem is represented by a type.
/// struct Rosenbrock {
///     a: f64,
///     b: f64,
/// }
///
/// impl Problem for Rosenbrock {
///     // The numeric type. Usually f64 or f32.
///     type Field = f64;
///
///     // Specification of the domain. At the very least, the dimension
///     // must be known.
///     fn domain(&self) -> Domain<Self::Field> {
///         Domain::unconstrained(2)
///     }
/// }
///
/// impl Function for Rosenbrock {
///     // Evaluate trial values of variables to the function.
///     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
///     where
///         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
///     {
///         (self.a - x[0]).powi(2) + self.b * (x[1] - x[0].powi(2)).powi(2)
///     }
/// }
/// ```
///
/// A non-finite return value (NaN or infinity) is understood as a failed
/// evaluation and handled by the optimizers; there is no need to guard
/// against it inside `apply`.
pub trait Function: Problem {
    /// Calculate the function value given values of the variables.
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous;
}
