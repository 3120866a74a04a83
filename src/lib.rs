#![allow(clippy::many_single_char_names)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

//! # Lincoa
//!
//! A pure Rust implementation of derivative-free minimization of smooth
//! objective functions subject to linear inequality constraints.
//!
//! The optimizer samples only function values. It maintains a quadratic
//! interpolation model of the objective over a moving set of sample points
//! and takes steps that either reduce a trust-region subproblem inside the
//! feasible polyhedron or improve the geometry of the interpolation set.
//! This makes it a good fit for expensive black-box objectives where
//! gradients are unavailable and finite differencing is too costly or too
//! noisy.
//!
//! ## Problem
//!
//! The problem is to find a feasible minimizer of a scalar function:
//!
//! ```text
//! minimize f(x) subject to aᵢᵀ x ≤ bᵢ for i = 1, .., m,
//! ```
//!
//! where the constraint gradients *aᵢ* are the columns of an *n* × *m*
//! matrix. Bound constraints can be encoded as pairs of inequalities and an
//! unconstrained problem is simply *m* = 0.
//!
//! When it comes to code, the problem is any type that implements the
//! [`Function`] and [`Problem`] traits.
//!
//! ```rust
//! // Lincoa is based on `nalgebra` crate.
//! use lincoa::nalgebra as na;
//! use lincoa::{Domain, Function, Problem};
//! use na::{Dyn, IsContiguous};
//!
//! // A problem is represented by a type.
//! struct Rosenbrock {
//!     a: f64,
//!     b: f64,
//! }
//!
//! impl Problem for Rosenbrock {
//!     // The numeric type. Usually f64 or f32.
//!     type Field = f64;
//!
//!     // Specification of the domain. At the very least, the dimension
//!     // must be known.
//!     fn domain(&self) -> Domain<Self::Field> {
//!         Domain::unconstrained(2)
//!     }
//! }
//!
//! impl Function for Rosenbrock {
//!     // Evaluate trial values of variables to the function.
//!     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//!     where
//!         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//!     {
//!         (self.a - x[0]).powi(2) + self.b * (x[1] - x[0].powi(2)).powi(2)
//!     }
//! }
//! ```
//!
//! There is no need for defining the gradient vector or Hessian matrix; the
//! algorithm is derivative-free by construction.
//!
//! ## Optimizing
//!
//! When you have your function available, you can use the
//! [`OptimizerDriver`] to run the iteration process until a stopping
//! criterion is reached.
//!
//! ```rust
//! use lincoa::OptimizerDriver;
//! # use lincoa::nalgebra as na;
//! # use lincoa::{Domain, Function, Problem};
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct Rosenbrock {
//! #     a: f64,
//! #     b: f64,
//! # }
//! #
//! # impl Problem for Rosenbrock {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for Rosenbrock {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         (self.a - x[0]).powi(2) + self.b * (x[1] - x[0].powi(2)).powi(2)
//! #     }
//! # }
//!
//! let f = Rosenbrock { a: 1.0, b: 100.0 };
//! let mut optimizer = OptimizerDriver::builder(&f)
//!     .with_initial(vec![-1.2, 1.0])
//!     .build();
//!
//! let (x, value) = optimizer
//!     .find(|state| state.fx() <= 1e-3 || state.iter() >= 2000)
//!     .expect("optimizer encountered an error");
//! ```
//!
//! For the full control over the run (evaluation budgets, target values,
//! trust radii, history buffers), use the [`Lincoa`](algo::Lincoa)
//! algorithm type directly; its
//! [`minimize`](algo::lincoa::Lincoa::minimize) entry point reports the
//! best point, its value and constraint violation, the number of
//! evaluations and a termination status.
//!
//! ## License
//!
//! Licensed under MIT.

pub mod algo;
mod core;
pub mod driver;
pub mod linalg;
pub mod model;
pub mod subproblem;

pub use self::core::*;
pub use driver::OptimizerDriver;

#[cfg(feature = "testing")]
pub mod testing;

#[cfg(not(feature = "testing"))]
pub(crate) mod testing;

pub use nalgebra;
