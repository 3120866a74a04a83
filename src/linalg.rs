//! Dense linear-algebra primitives shared by the model and the subproblem
//! solvers.
//!
//! Everything here works on dynamically sized nalgebra types and is kept
//! deliberately small: a symmetric rank-one update, Householder
//! tridiagonalization of a symmetric matrix, plane rotations for maintaining
//! small orthogonal factorizations, and a few predicates.

use nalgebra::{storage::Storage, DVector, Dyn, IsContiguous, OMatrix, OVector, Vector};

use crate::core::RealField;

/// Performs the in-place symmetric rank-one update *A ← A + α v vᵀ*.
///
/// Both triangles are updated; the matrix is kept in full symmetric storage.
pub fn sym_rank1_update<T: RealField, Sv>(
    a: &mut OMatrix<T, Dyn, Dyn>,
    alpha: T,
    v: &Vector<T, Dyn, Sv>,
) where
    Sv: Storage<T, Dyn> + IsContiguous,
{
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    debug_assert_eq!(n, v.len());

    for j in 0..n {
        let avj = alpha * v[j];
        for i in 0..n {
            a[(i, j)] += avj * v[i];
        }
    }
}

/// Checks that a square matrix is symmetric up to the given tolerance.
pub fn is_symmetric<T: RealField>(a: &OMatrix<T, Dyn, Dyn>, tol: T) -> bool {
    let n = a.nrows();

    if n != a.ncols() {
        return false;
    }

    for j in 0..n {
        for i in (j + 1)..n {
            if (a[(i, j)] - a[(j, i)]).abs() > tol {
                return false;
            }
        }
    }

    true
}

/// Checks that all entries of a matrix are finite.
pub fn all_finite_matrix<T: RealField>(a: &OMatrix<T, Dyn, Dyn>) -> bool {
    a.iter().all(|aij| aij.is_finite())
}

/// Checks that all entries of a vector are finite.
pub fn all_finite<T: RealField, S>(v: &Vector<T, Dyn, S>) -> bool
where
    S: Storage<T, Dyn>,
{
    v.iter().all(|vi| vi.is_finite())
}

/// Returns the indices of the entries satisfying the predicate.
pub fn indices_where<T: RealField, S, P>(v: &Vector<T, Dyn, S>, pred: P) -> Vec<usize>
where
    S: Storage<T, Dyn>,
    P: Fn(T) -> bool,
{
    v.iter()
        .enumerate()
        .filter(|(_, vi)| pred(**vi))
        .map(|(i, _)| i)
        .collect()
}

/// Plane (Givens) rotation `(c, s)` with `c·a + s·b = r`, `−s·a + c·b = 0`.
///
/// Returns `(c, s, r)`. For `a = b = 0` the identity rotation is returned.
pub fn plane_rotation<T: RealField>(a: T, b: T) -> (T, T, T) {
    if b == T::zero() {
        (T::one(), T::zero(), a)
    } else {
        let r = a.hypot(b);
        (a / r, b / r, r)
    }
}

/// Householder tridiagonalization of a symmetric matrix.
///
/// The reflectors are stored in the strict lower triangle of the reduced
/// matrix, the way the classical implementations alias their storage. The
/// orthogonal similarity can be applied to vectors in both directions with
/// [`forward`](Tridiagonal::forward) and [`backward`](Tridiagonal::backward).
#[derive(Debug, Clone)]
pub struct Tridiagonal<T: RealField> {
    /// Diagonal of the tridiagonal form.
    pub td: OVector<T, Dyn>,
    /// Subdiagonal of the tridiagonal form (length *n − 1*, empty for
    /// *n = 1*).
    pub tn: OVector<T, Dyn>,
    reflectors: OMatrix<T, Dyn, Dyn>,
}

impl<T: RealField> Tridiagonal<T> {
    /// Reduces a symmetric matrix to tridiagonal form, *T = Qᵀ A Q*.
    pub fn reduce(mut a: OMatrix<T, Dyn, Dyn>) -> Self {
        let n = a.nrows();
        debug_assert_eq!(n, a.ncols());

        let mut tn = DVector::zeros(n.saturating_sub(1));

        for k in 0..n.saturating_sub(2) {
            let mut sigma = T::zero();
            for i in (k + 1)..n {
                sigma += a[(i, k)] * a[(i, k)];
            }
            sigma = sigma.sqrt();

            if sigma == T::zero() {
                tn[k] = T::zero();
                for i in (k + 1)..n {
                    a[(i, k)] = T::zero();
                }
                continue;
            }

            // Choose the sign avoiding cancellation in v₁ = x₁ − α.
            let alpha = if a[(k + 1, k)] > T::zero() {
                -sigma
            } else {
                sigma
            };
            tn[k] = alpha;

            let mut v = DVector::zeros(n - k - 1);
            v[0] = a[(k + 1, k)] - alpha;
            for i in (k + 2)..n {
                v[i - k - 1] = a[(i, k)];
            }
            let vnorm = v.norm();
            v /= vnorm;

            // A₂₂ ← H A₂₂ H with H = I − 2vvᵀ, via p = 2(w − (vᵀw)v),
            // w = A₂₂ v.
            let m = n - k - 1;
            let mut w = OVector::<T, Dyn>::zeros(m);
            for j in 0..m {
                let mut acc = T::zero();
                for i in 0..m {
                    acc += a[(k + 1 + i, k + 1 + j)] * v[i];
                }
                w[j] = acc;
            }
            let two: T = nalgebra::convert(2.0);
            let vw = v.dot(&w);
            let p = (&w - &v * vw) * two;
            for j in 0..m {
                for i in 0..m {
                    a[(k + 1 + i, k + 1 + j)] -= v[i] * p[j] + p[i] * v[j];
                }
            }

            // Store the reflector in the strict lower triangle of column k.
            for i in (k + 1)..n {
                a[(i, k)] = v[i - k - 1];
            }
        }

        if n >= 2 {
            tn[n - 2] = a[(n - 1, n - 2)];
        }

        let mut td = DVector::zeros(n);
        for i in 0..n {
            td[i] = a[(i, i)];
        }

        Self {
            td,
            tn,
            reflectors: a,
        }
    }

    /// Applies *Qᵀ* to a vector (the transform that takes the original
    /// coordinates into the tridiagonal ones).
    pub fn forward(&self, v: &mut OVector<T, Dyn>) {
        let n = self.td.len();
        for k in 0..n.saturating_sub(2) {
            self.reflect(k, v);
        }
    }

    /// Applies *Q* to a vector (takes tridiagonal coordinates back to the
    /// original ones).
    pub fn backward(&self, v: &mut OVector<T, Dyn>) {
        let n = self.td.len();
        for k in (0..n.saturating_sub(2)).rev() {
            self.reflect(k, v);
        }
    }

    fn reflect(&self, k: usize, v: &mut OVector<T, Dyn>) {
        let n = self.td.len();
        let two: T = nalgebra::convert(2.0);

        let mut dot = T::zero();
        for i in (k + 1)..n {
            dot += self.reflectors[(i, k)] * v[i];
        }
        // Zero reflector column means the step was skipped.
        let dot = two * dot;
        for i in (k + 1)..n {
            v[i] -= dot * self.reflectors[(i, k)];
        }
    }

    /// Multiplies a vector by the tridiagonal matrix itself.
    pub fn mul(&self, v: &OVector<T, Dyn>) -> OVector<T, Dyn> {
        let n = self.td.len();
        let mut out = DVector::zeros(n);

        for i in 0..n {
            let mut acc = self.td[i] * v[i];
            if i > 0 {
                acc += self.tn[i - 1] * v[i - 1];
            }
            if i + 1 < n {
                acc += self.tn[i] * v[i + 1];
            }
            out[i] = acc;
        }

        out
    }
}
