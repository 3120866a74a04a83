//! Problem domain definition: dimension and linear inequality constraints.

use nalgebra::{
    convert, storage::Storage, storage::StorageMut, DMatrix, DVector, Dyn, IsContiguous, OMatrix,
    OVector, Vector,
};

use super::base::RealField;

/// Description of the feasible region of a problem.
///
/// The region is the polyhedron given by the linear inequality constraints
///
/// ```text
/// aᵢᵀ x ≤ bᵢ for i = 1, .., m,
/// ```
///
/// where the vectors *aᵢ* are the columns of an *n* × *m* matrix. An
/// unconstrained domain is simply *m* = 0. Bound constraints are supported by
/// encoding each finite bound as one inequality (see [`Domain::rect`]).
#[derive(Debug, Clone)]
pub struct Domain<T: RealField> {
    a: OMatrix<T, Dyn, Dyn>,
    b: OVector<T, Dyn>,
}

impl<T: RealField> Domain<T> {
    /// Creates an unconstrained domain with given dimension.
    pub fn unconstrained(dim: usize) -> Self {
        assert!(dim > 0, "empty domain");

        Self {
            a: DMatrix::zeros(dim, 0),
            b: DVector::zeros(0),
        }
    }

    /// Creates the domain given by the constraints *aᵢᵀ x ≤ bᵢ*, where *aᵢ*
    /// are the columns of `a`.
    ///
    /// The constraints can be passed in natural units; optimizers normalize
    /// the gradients themselves when they need to.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns of `a` differs from the length of `b`
    /// or if the dimension is zero.
    pub fn polytope(a: OMatrix<T, Dyn, Dyn>, b: OVector<T, Dyn>) -> Self {
        assert!(a.nrows() > 0, "empty domain");
        assert_eq!(a.ncols(), b.len(), "constraint count mismatch");

        Self { a, b }
    }

    /// Creates the domain given by rectangular bounds *lᵢ ≤ xᵢ ≤ uᵢ*.
    ///
    /// Every finite bound becomes one linear inequality constraint; infinite
    /// bounds are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ, the dimension is zero or some `lower >
    /// upper`.
    pub fn rect(lower: Vec<T>, upper: Vec<T>) -> Self {
        assert_eq!(lower.len(), upper.len(), "bounds length mismatch");
        assert!(!lower.is_empty(), "empty domain");

        let dim = lower.len();
        let mut cols = Vec::new();
        let mut rhs = Vec::new();

        for (i, (&li, &ui)) in lower.iter().zip(upper.iter()).enumerate() {
            assert!(li <= ui, "invalid bounds");

            // -xᵢ ≤ -lᵢ
            if li.is_finite() {
                let mut col = DVector::zeros(dim);
                col[i] = convert(-1.0);
                cols.push(col);
                rhs.push(-li);
            }

            // xᵢ ≤ uᵢ
            if ui.is_finite() {
                let mut col = DVector::zeros(dim);
                col[i] = convert(1.0);
                cols.push(col);
                rhs.push(ui);
            }
        }

        let a = if cols.is_empty() {
            DMatrix::zeros(dim, 0)
        } else {
            OMatrix::from_columns(&cols)
        };

        Self {
            a,
            b: DVector::from_vec(rhs),
        }
    }

    /// Get the dimension of the domain.
    pub fn dim(&self) -> usize {
        self.a.nrows()
    }

    /// Get the number of linear constraints.
    pub fn num_constraints(&self) -> usize {
        self.a.ncols()
    }

    /// Get the matrix whose columns are the constraint gradients *aᵢ*.
    pub fn a(&self) -> &OMatrix<T, Dyn, Dyn> {
        &self.a
    }

    /// Get the constraint right-hand sides *bᵢ*.
    pub fn b(&self) -> &OVector<T, Dyn> {
        &self.b
    }

    /// Computes the constraint violation *max(0, maxᵢ (aᵢᵀ x − bᵢ))* in the
    /// units the constraints were given in.
    pub fn violation<Sx>(&self, x: &Vector<T, Dyn, Sx>) -> T
    where
        Sx: Storage<T, Dyn> + IsContiguous,
    {
        let mut viol = T::zero();

        for j in 0..self.a.ncols() {
            viol = viol.max(self.a.column(j).dot(x) - self.b[j]);
        }

        viol
    }
}

/// Domain-related extension methods for [`Vector`], which is a common storage
/// for variable values.
pub trait VectorDomainExt<T: RealField> {
    /// Moves the point into (or towards) the feasible region by cyclic
    /// projection onto the violated half-spaces. Returns whether the original
    /// point was infeasible.
    fn project(&mut self, dom: &Domain<T>) -> bool;
}

impl<T: RealField, S> VectorDomainExt<T> for Vector<T, Dyn, S>
where
    S: StorageMut<T, Dyn> + IsContiguous,
{
    fn project(&mut self, dom: &Domain<T>) -> bool {
        let bscale = dom
            .b()
            .iter()
            .fold(T::zero(), |acc, bi| acc.max(bi.abs()));
        let tol = T::EPSILON_SQRT * (T::one() + bscale);
        let not_feasible = dom.violation(self) > tol;

        if not_feasible {
            // A handful of sweeps of cyclic projection is enough to moderate
            // a bad starting point; exact feasibility is restored by the
            // optimizer itself.
            for _ in 0..10 {
                let mut clean = true;

                for j in 0..dom.num_constraints() {
                    let aj = dom.a().column(j);
                    let res = aj.dot(self) - dom.b()[j];

                    if res > tol {
                        let denom = aj.norm_squared();
                        if denom > T::zero() {
                            self.axpy(-res / denom, &aj, T::one());
                            clean = false;
                        }
                    }
                }

                if clean {
                    break;
                }
            }
        }

        not_feasible
    }
}

impl<T: RealField> FromIterator<(T, T)> for Domain<T> {
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let (lower, upper) = iter.into_iter().unzip();
        Self::rect(lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::dvector;

    use super::*;

    #[test]
    fn rect_encodes_finite_bounds() {
        let dom: Domain<f64> = [(0.0, 1.0), (f64::NEG_INFINITY, 2.0)].into_iter().collect();

        assert_eq!(dom.dim(), 2);
        assert_eq!(dom.num_constraints(), 3);
        assert_eq!(dom.violation(&dvector![0.5, 0.0]), 0.0);
        assert_eq!(dom.violation(&dvector![-0.5, 0.0]), 0.5);
        assert_eq!(dom.violation(&dvector![0.5, 3.0]), 1.0);
    }

    #[test]
    fn projection_moves_into_polytope() {
        // Single constraint x₁ + x₂ ≤ 1.
        let a = nalgebra::dmatrix![1.0; 1.0];
        let dom = Domain::polytope(a, dvector![1.0]);

        let mut x = dvector![1.0, 1.0];
        assert!(x.project(&dom));
        assert!(dom.violation(&x) <= 1e-7);

        let mut x = dvector![0.0, 0.0];
        assert!(!x.project(&dom));
        assert_eq!(x, dvector![0.0, 0.0]);
    }
}
