//! Trust-region subproblem solvers and the model-improving step.
//!
//! [`unconstrained`] minimizes the quadratic inside a ball (the
//! tridiagonalization + secular-equation solver), [`constrained`] does the
//! same inside the intersection of the ball with the feasible polyhedron
//! (projected conjugate gradients with an active set), and [`geometry`]
//! computes the step that improves the conditioning of the interpolation
//! set.

pub mod constrained;
pub mod geometry;
pub mod unconstrained;

pub use constrained::{constrained_step, ActiveSet, ConstrainedStep};
pub use geometry::{geometry_step, GeometryStep};
pub use unconstrained::trust_region_step;
