//! Quadratic interpolation model of the objective over a moving sample set.
//!
//! The model is determined by `npt` interpolation conditions `Q(xᵏ) = f(xᵏ)`
//! and minimum-Frobenius-norm freedom in the Hessian. Everything is expressed
//! relative to a base point that moves only through
//! [`shift_base`](InterpModel::shift_base), so that the coordinates of the
//! samples stay small and roundoff stays controlled.
//!
//! The inverse of the interpolation KKT matrix is maintained in factored form
//! `{BMAT, ZMAT, idz}`: `BMAT` holds the last *n* block rows, and the leading
//! `npt × npt` block is `ZMAT·D·ZMATᵀ` where `D` is a diagonal of ±1 signs
//! with the −1 entries in the first `idz` columns. The factorization is
//! updated in place when a sample is replaced (see
//! [`update`](InterpModel::update)) and re-expressed on base shifts; it is
//! never recomputed from scratch.

mod shift;
mod update;

use log::debug;
use nalgebra::{convert, storage::Storage, DMatrix, DVector, Dyn, IsContiguous, OMatrix, OVector, Vector};
use thiserror::Error;

use crate::core::RealField;
use crate::linalg;

/// Error produced by the interpolation model maintenance.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model or its factorization contains a non-finite value.
    #[error("interpolation model contains a non-finite value")]
    ModelCorrupt,
    /// The denominator of the factorization update is too close to zero,
    /// meaning the sample set is (numerically) no longer unisolvent.
    #[error("interpolation update denominator is negligible")]
    DegenerateDenominator,
}

/// Interpolation data: sample points, function values, the quadratic model
/// and the factored inverse of the interpolation matrix.
#[derive(Debug, Clone)]
pub struct InterpModel<T: RealField> {
    /// Base point (absolute coordinates).
    xbase: OVector<T, Dyn>,
    /// Sample offsets from `xbase`, one column per point (n × npt).
    xpt: OMatrix<T, Dyn, Dyn>,
    /// Objective values at the samples.
    fval: OVector<T, Dyn>,
    /// Column of the current best sample.
    kopt: usize,
    /// Model gradient at the best sample.
    gopt: OVector<T, Dyn>,
    /// Explicit part of the model Hessian (n × n, symmetric).
    hq: OMatrix<T, Dyn, Dyn>,
    /// Implicit-Hessian coefficients; the implicit part is
    /// `Σₖ pq[k]·xptₖ xptₖᵀ`.
    pq: OVector<T, Dyn>,
    /// Last *n* block rows of the inverse KKT matrix (n × (npt + n)).
    bmat: OMatrix<T, Dyn, Dyn>,
    /// Factor of the leading block of the inverse (npt × (npt − n − 1)).
    zmat: OMatrix<T, Dyn, Dyn>,
    /// Number of leading `zmat` columns carrying the −1 sign.
    idz: usize,
}

impl<T: RealField> InterpModel<T> {
    /// Builds the initial sample offsets for the given dimension and `npt`.
    ///
    /// Points are placed at the origin, at `±ρ·eⱼ` along the coordinate
    /// directions, and (for `npt > 2n + 1`) at sums of pairs of coordinate
    /// steps. The sign of each coordinate step is chosen so that every point
    /// is either feasible or violates the constraints by at least `0.2·ρ`:
    /// `a` must hold unit-norm constraint gradients and `bres` the residuals
    /// `b − aᵀ·xbase`.
    pub fn initial_points(
        n: usize,
        npt: usize,
        rho: T,
        a: &OMatrix<T, Dyn, Dyn>,
        bres: &OVector<T, Dyn>,
    ) -> OMatrix<T, Dyn, Dyn> {
        let fifth: T = convert(0.2);
        let mut xpt = DMatrix::zeros(n, npt);

        // Sign of the coordinate step per direction.
        let mut sign = OVector::<T, Dyn>::from_element(n, T::one());

        let viol_at = |p: &OVector<T, Dyn>| -> T {
            let mut viol = T::zero();
            for j in 0..a.ncols() {
                viol = viol.max(a.column(j).dot(p) - bres[j]);
            }
            viol
        };

        for j in 0..n {
            let mut plus = DVector::zeros(n);
            plus[j] = rho;

            let vplus = viol_at(&plus);
            if vplus > T::zero() && vplus < fifth * rho {
                plus[j] = -rho;
                let vminus = viol_at(&plus);
                if vminus == T::zero() || vminus >= fifth * rho {
                    sign[j] = -T::one();
                    debug!("flipping initial step along coordinate {}", j);
                }
            }
        }

        let t2 = n.min(npt - n - 1);

        for j in 0..n {
            xpt[(j, j + 1)] = sign[j] * rho;
        }
        for j in 0..t2 {
            xpt[(j, n + 1 + j)] = -sign[j] * rho;
        }

        // Cross points for npt > 2n + 1 pair up coordinate steps; the index
        // mapping is the classical one.
        for k in (2 * n + 1)..npt {
            let kk = k + 1;
            let itemp = (kk - n - 2) / n;
            let mut jpt = kk - n - 1 - itemp * n + itemp;
            let ipt = jpt - itemp;
            if jpt > n {
                jpt -= n;
            }
            let (ic, jc) = (ipt - 1, jpt - 1);

            xpt[(ic, k)] = sign[ic] * rho;
            xpt[(jc, k)] = sign[jc] * rho;
        }

        xpt
    }

    /// Builds the model from evaluated initial samples.
    ///
    /// `xpt` must have the structure produced by
    /// [`initial_points`](Self::initial_points) with radius `rho`; `fval`
    /// holds the objective values at `xbase + xpt[:,k]` and `kopt` the
    /// chosen best sample. The inverse factorization is assembled in closed
    /// form and the quadratic is the minimum-Frobenius-norm interpolant.
    pub fn build(
        xbase: OVector<T, Dyn>,
        xpt: OMatrix<T, Dyn, Dyn>,
        fval: OVector<T, Dyn>,
        kopt: usize,
        rho: T,
    ) -> Result<Self, ModelError> {
        let n = xpt.nrows();
        let npt = xpt.ncols();
        let nptm = npt - n - 1;
        let t2 = n.min(nptm);

        let half: T = convert(0.5);
        let one: T = T::one();
        let rhosq = rho * rho;
        let reciq = half.sqrt() / rhosq;

        let mut bmat = OMatrix::<T, Dyn, Dyn>::zeros(n, npt + n);
        let mut zmat = OMatrix::<T, Dyn, Dyn>::zeros(npt, nptm);

        for j in 0..t2 {
            // Directions with points on both sides: central differences.
            let s1 = xpt[(j, j + 1)];
            bmat[(j, j + 1)] = half / s1;
            bmat[(j, n + 1 + j)] = -half / s1;

            zmat[(0, j)] = -reciq - reciq;
            zmat[(j + 1, j)] = reciq;
            zmat[(n + 1 + j, j)] = reciq;
        }

        for j in t2..n {
            // One-sided directions: forward differences and the symmetric
            // block entry.
            let s1 = xpt[(j, j + 1)];
            bmat[(j, 0)] = -one / s1;
            bmat[(j, j + 1)] = one / s1;
            bmat[(j, npt + j)] = -half * rhosq;
        }

        for k in (2 * n + 1)..npt {
            let (ic, jc) = cross_pair(k, n);
            let recip = one / (xpt[(ic, k)] * xpt[(jc, k)]);

            let col = k - n - 1;
            zmat[(0, col)] = recip;
            zmat[(k, col)] = recip;
            zmat[(ic + 1, col)] = -recip;
            zmat[(jc + 1, col)] = -recip;
        }

        let mut model = Self {
            xbase,
            xpt,
            fval,
            kopt,
            gopt: DVector::zeros(n),
            hq: DMatrix::zeros(n, n),
            pq: DVector::zeros(npt),
            bmat,
            zmat,
            idz: 0,
        };

        model.rebuild_min_frobenius();
        model.validate()?;

        Ok(model)
    }

    /// Problem dimension.
    pub fn n(&self) -> usize {
        self.xpt.nrows()
    }

    /// Number of interpolation points.
    pub fn npt(&self) -> usize {
        self.xpt.ncols()
    }

    /// Base point (absolute coordinates).
    pub fn xbase(&self) -> &OVector<T, Dyn> {
        &self.xbase
    }

    /// Sample offsets from the base.
    pub fn xpt(&self) -> &OMatrix<T, Dyn, Dyn> {
        &self.xpt
    }

    /// Objective values at the samples.
    pub fn fval(&self) -> &OVector<T, Dyn> {
        &self.fval
    }

    /// Index of the best sample.
    pub fn kopt(&self) -> usize {
        self.kopt
    }

    /// Objective value at the best sample.
    pub fn fopt(&self) -> T {
        self.fval[self.kopt]
    }

    /// Best sample offset from the base.
    pub fn xopt(&self) -> OVector<T, Dyn> {
        self.xpt.column(self.kopt).into_owned()
    }

    /// Model gradient at the best sample.
    pub fn gopt(&self) -> &OVector<T, Dyn> {
        &self.gopt
    }

    /// Explicit Hessian block.
    pub fn hq(&self) -> &OMatrix<T, Dyn, Dyn> {
        &self.hq
    }

    /// Implicit Hessian coefficients.
    pub fn pq(&self) -> &OVector<T, Dyn> {
        &self.pq
    }

    /// Evaluates the model change `Q(xopt + d) − Q(xopt) = gᵀd + ½ dᵀH d`.
    pub fn eval_quad<Sd>(&self, d: &Vector<T, Dyn, Sd>) -> T
    where
        Sd: Storage<T, Dyn> + IsContiguous,
    {
        let half: T = convert(0.5);

        let mut quad = self.gopt.dot(d);

        let hd = self.hess_mul(d);
        quad += half * d.dot(&hd);

        quad
    }

    /// Multiplies a vector by the full model Hessian `HQ + Σₖ pq[k]·xₖxₖᵀ`.
    pub fn hess_mul<Sv>(&self, v: &Vector<T, Dyn, Sv>) -> OVector<T, Dyn>
    where
        Sv: Storage<T, Dyn> + IsContiguous,
    {
        let mut out = &self.hq * v;

        for k in 0..self.npt() {
            let pk = self.pq[k];
            if pk != T::zero() {
                let xk = self.xpt.column(k);
                out.axpy(pk * xk.dot(v), &xk, T::one());
            }
        }

        out
    }

    /// Assembles the dense model Hessian `HQ + Σₖ pq[k]·xₖxₖᵀ`.
    pub fn hess_dense(&self) -> OMatrix<T, Dyn, Dyn> {
        let mut h = self.hq.clone_owned();

        for k in 0..self.npt() {
            let pk = self.pq[k];
            if pk != T::zero() {
                linalg::sym_rank1_update(&mut h, pk, &self.xpt.column(k));
            }
        }

        h
    }

    /// Returns the implicit-part coefficients of the k-th Lagrange function,
    /// i.e. the k-th column of the leading inverse block `ZMAT·D·ZMATᵀ`.
    pub fn lagrange_coeff(&self, k: usize) -> Result<OVector<T, Dyn>, ModelError> {
        let coeff = self.omega_col(k);

        if !linalg::all_finite(&coeff) {
            return Err(ModelError::ModelCorrupt);
        }

        Ok(coeff)
    }

    /// Gradient of the k-th Lagrange function at `xopt`.
    pub fn lagrange_grad(&self, k: usize) -> Result<OVector<T, Dyn>, ModelError> {
        let coeff = self.lagrange_coeff(k)?;
        let xopt = self.xpt.column(self.kopt);

        let mut grad = self.bmat.column(k).into_owned();
        for j in 0..self.npt() {
            let cj = coeff[j];
            if cj != T::zero() {
                let xj = self.xpt.column(j);
                grad.axpy(cj * xj.dot(&xopt), &xj, T::one());
            }
        }

        Ok(grad)
    }

    /// Applies the leading inverse block `ZMAT·D·ZMATᵀ` to a vector.
    pub(crate) fn omega_mul(&self, v: &OVector<T, Dyn>) -> OVector<T, Dyn> {
        let mut out = DVector::zeros(self.npt());

        for j in 0..self.zmat.ncols() {
            let zj = self.zmat.column(j);
            let mut t = zj.dot(v);
            if j < self.idz {
                t = -t;
            }
            out.axpy(t, &zj, T::one());
        }

        out
    }

    fn omega_col(&self, k: usize) -> OVector<T, Dyn> {
        let mut out = DVector::zeros(self.npt());

        for j in 0..self.zmat.ncols() {
            let zj = self.zmat.column(j);
            let mut t = zj[k];
            if j < self.idz {
                t = -t;
            }
            out.axpy(t, &zj, T::one());
        }

        out
    }

    /// Diagonal entry `Ω[k,k]` of the leading inverse block.
    pub(crate) fn omega_diag(&self, k: usize) -> T {
        let mut out = T::zero();

        for j in 0..self.zmat.ncols() {
            let zkj = self.zmat[(k, j)];
            if j < self.idz {
                out -= zkj * zkj;
            } else {
                out += zkj * zkj;
            }
        }

        out
    }

    /// Discards the Broyden information and rebuilds the quadratic as the
    /// minimum-Frobenius-norm interpolant of the current values.
    pub fn rebuild_min_frobenius(&mut self) {
        let npt = self.npt();

        debug!("rebuilding the model as the least-norm interpolant");

        // Shift the values to reduce cancellation; the leading inverse block
        // annihilates constant shifts.
        let fbase = self.fval[self.kopt];
        let fshift = self.fval.map(|f| f - fbase);

        self.hq.fill(T::zero());
        self.pq = self.omega_mul(&fshift);

        let mut gopt = DVector::zeros(self.n());
        for k in 0..npt {
            gopt.axpy(fshift[k], &self.bmat.column(k), T::one());
        }

        // The linear part above is the gradient at the base; move it to xopt
        // through the (implicit-only) Hessian.
        let xopt = self.xopt();
        for k in 0..npt {
            let pk = self.pq[k];
            if pk != T::zero() {
                let xk = self.xpt.column(k);
                gopt.axpy(pk * xk.dot(&xopt), &xk, T::one());
            }
        }

        self.gopt = gopt;
    }

    /// Predicted change along `step` (from `xopt`) of the
    /// minimum-Frobenius-norm interpolant of the current values.
    ///
    /// This is the prediction the model *would* make had the Broyden updates
    /// been discarded; comparing it with the actual model's prediction tells
    /// whether the accumulated second-order information is earning its keep.
    pub fn min_frobenius_change<Sd>(&self, step: &Vector<T, Dyn, Sd>) -> T
    where
        Sd: Storage<T, Dyn> + IsContiguous,
    {
        let zero = T::zero();
        let half: T = convert(0.5);
        let npt = self.npt();

        let fbase = self.fval[self.kopt];
        let fshift = self.fval.map(|fk| fk - fbase);

        let pqalt = self.omega_mul(&fshift);

        let mut galt = OVector::<T, Dyn>::zeros(self.n());
        for k in 0..npt {
            galt.axpy(fshift[k], &self.bmat.column(k), T::one());
        }

        let xopt = self.xopt();
        let mut change = galt.dot(step);
        for k in 0..npt {
            let pk = pqalt[k];
            if pk != zero {
                let xk = self.xpt.column(k);
                let xs = xk.dot(step);
                change += pk * xs * (xk.dot(&xopt) + half * xs);
            }
        }

        change
    }

    /// Changes the best sample to `knew`, moving the stored gradient along.
    pub fn promote(&mut self, knew: usize) {
        if knew == self.kopt {
            return;
        }

        let d = self.xpt.column(knew) - self.xpt.column(self.kopt);
        let hd = self.hess_mul(&d);
        self.gopt += hd;
        self.kopt = knew;
    }

    /// Checks the model and factorization for non-finite values and broken
    /// structural invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        let finite = linalg::all_finite(&self.gopt)
            && linalg::all_finite(&self.pq)
            && linalg::all_finite(&self.fval)
            && linalg::all_finite_matrix(&self.hq)
            && linalg::all_finite_matrix(&self.bmat)
            && linalg::all_finite_matrix(&self.zmat)
            && linalg::all_finite_matrix(&self.xpt);

        let hq_tol = T::EPSILON_SQRT * (T::one() + self.hq.amax());
        if !finite
            || self.idz > self.zmat.ncols()
            || !linalg::is_symmetric(&self.hq, hq_tol)
        {
            return Err(ModelError::ModelCorrupt);
        }

        Ok(())
    }
}

/// The pair of coordinate directions combined by the cross point in
/// column `k` (0-based, `k ≥ 2n + 1`).
fn cross_pair(k: usize, n: usize) -> (usize, usize) {
    let kk = k + 1;
    let itemp = (kk - n - 2) / n;
    let mut jpt = kk - n - 1 - itemp * n + itemp;
    let ipt = jpt - itemp;
    if jpt > n {
        jpt -= n;
    }
    (ipt - 1, jpt - 1)
}

#[cfg(test)]
pub(crate) mod tests {
    use nalgebra::{DMatrix, DVector};

    use super::*;

    /// Assembles the full (npt + n + 1) interpolation matrix for the current
    /// sample set.
    fn interp_matrix(model: &InterpModel<f64>) -> DMatrix<f64> {
        let n = model.n();
        let npt = model.npt();
        let dim = npt + n + 1;
        let mut w = DMatrix::zeros(dim, dim);

        for k in 0..npt {
            for l in 0..npt {
                let dot = model.xpt().column(k).dot(&model.xpt().column(l));
                w[(k, l)] = 0.5 * dot * dot;
            }
            w[(k, npt)] = 1.0;
            w[(npt, k)] = 1.0;
            for i in 0..n {
                w[(k, npt + 1 + i)] = model.xpt()[(i, k)];
                w[(npt + 1 + i, k)] = model.xpt()[(i, k)];
            }
        }

        w
    }

    /// Verifies the identity `H·W = I` for the rows of the inverse that the
    /// model stores: the leading npt rows (from ZMAT) and the trailing n rows
    /// (from BMAT).
    ///
    /// The inverse row belonging to the constant term is not stored, so the
    /// product of a stored row with a column of `W` differs from the identity
    /// by a per-row constant (the unstored entry times the all-ones row of
    /// `W`). The check below eliminates that constant by estimating it from
    /// one column and requiring consistency everywhere else.
    pub(crate) fn check_inverse(model: &InterpModel<f64>, tol: f64) {
        let n = model.n();
        let npt = model.npt();
        let w = interp_matrix(model);

        // Leading block Ω = Z·D·Zᵀ.
        let mut omega = DMatrix::zeros(npt, npt);
        for j in 0..model.zmat.ncols() {
            let zj = model.zmat.column(j);
            let sign = if j < model.idz { -1.0 } else { 1.0 };
            for k in 0..npt {
                for l in 0..npt {
                    omega[(k, l)] += sign * zj[k] * zj[l];
                }
            }
        }

        let product = |hrow: &dyn Fn(usize) -> f64, c: usize| -> f64 {
            let mut acc = 0.0;
            for l in 0..npt {
                acc += hrow(l) * w[(l, c)];
            }
            for i in 0..n {
                acc += hrow(npt + 1 + i) * w[(npt + 1 + i, c)];
            }
            acc
        };

        // Top rows: row k of H is [Ω[k,:], ·, Ξ[:,k]ᵀ].
        for k in 0..npt {
            let hrow = |idx: usize| -> f64 {
                if idx < npt {
                    omega[(k, idx)]
                } else {
                    model.bmat[(idx - npt - 1, k)]
                }
            };

            // Constant-row contribution, estimated off the diagonal.
            let c0 = (k + 1) % npt;
            let shift = product(&hrow, c0);

            for c in 0..npt {
                let expected = if c == k { 1.0 } else { 0.0 };
                let got = product(&hrow, c) - shift;
                assert!(
                    (got - expected).abs() <= tol,
                    "inverse identity broken at row {}, col {}: {}",
                    k,
                    c,
                    got,
                );
            }

            // The gradient columns of W have no all-ones part; exact zeros.
            for i in 0..n {
                let got = product(&hrow, npt + 1 + i);
                assert!(got.abs() <= tol, "row {} grad col {}: {}", k, i, got);
            }
        }

        // Bottom rows: row npt+1+i of H is [Ξ[i,:], ·, Υ[i,:]].
        for i in 0..n {
            let hrow = |idx: usize| -> f64 {
                if idx < npt {
                    model.bmat[(i, idx)]
                } else {
                    model.bmat[(i, npt + (idx - npt - 1))]
                }
            };

            let shift = product(&hrow, 0);

            for c in 0..npt {
                let got = product(&hrow, c) - shift;
                assert!(got.abs() <= tol, "bottom row {}, col {}: {}", i, c, got);
            }

            for j in 0..n {
                let expected = if i == j { 1.0 } else { 0.0 };
                let got = product(&hrow, npt + 1 + j);
                assert!(
                    (got - expected).abs() <= tol,
                    "bottom row {}, grad col {}: {}",
                    i,
                    j,
                    got,
                );
            }
        }
    }

    pub(crate) fn quadratic(x: &DVector<f64>) -> f64 {
        // A generic strictly convex quadratic with cross terms.
        let q = 3.0 * x[0] * x[0] + 2.0 * x[1] * x[1] + x[0] * x[1];
        q - x[0] + 0.5 * x[1] + 7.0
    }

    pub(crate) fn build_quadratic_model(npt: usize) -> InterpModel<f64> {
        let n = 2;
        let rho = 0.5;
        let a = DMatrix::zeros(n, 0);
        let bres = DVector::zeros(0);

        let xbase = DVector::from_vec(vec![0.2, -0.3]);
        let xpt = InterpModel::initial_points(n, npt, rho, &a, &bres);

        let mut fval = DVector::zeros(npt);
        let mut kopt = 0;
        for k in 0..npt {
            let x = &xbase + xpt.column(k);
            fval[k] = quadratic(&x);
            if fval[k] < fval[kopt] {
                kopt = k;
            }
        }

        InterpModel::build(xbase, xpt, fval, kopt, rho).unwrap()
    }

    #[test]
    fn initial_factorization_is_the_inverse() {
        for npt in [4, 5, 6] {
            let model = build_quadratic_model(npt);
            check_inverse(&model, 1e-9);
        }
    }

    #[test]
    fn initial_model_interpolates() {
        let model = build_quadratic_model(5);

        // Q(x_k − xopt) + f(xopt) must equal f(x_k) at every sample.
        let xopt = model.xopt();
        for k in 0..model.npt() {
            let d = model.xpt().column(k) - &xopt;
            let predicted = model.eval_quad(&d) + model.fopt();
            assert!(
                (predicted - model.fval()[k]).abs() <= 1e-9,
                "interpolation broken at sample {}: {} vs {}",
                k,
                predicted,
                model.fval()[k],
            );
        }
    }

    #[test]
    fn lagrange_coefficients_are_finite_and_centered() {
        let model = build_quadratic_model(5);
        let coeff = model.lagrange_coeff(1).unwrap();

        // The leading inverse block annihilates constants.
        assert!(coeff.sum().abs() <= 1e-12);
    }

    #[test]
    fn initial_points_respect_constraint_rule() {
        // Constraint x₀ ≤ 0.05 with unit gradient; the +ρ step violates it
        // by 0.45 ≥ 0.2·ρ, so the sign is kept.
        let a = DMatrix::from_vec(2, 1, vec![1.0, 0.0]);
        let bres = DVector::from_vec(vec![0.05]);
        let xpt = InterpModel::<f64>::initial_points(2, 5, 0.5, &a, &bres);
        assert_eq!(xpt[(0, 1)], 0.5);

        // Constraint x₀ ≤ 0.45: the +ρ step violates by only 0.05 < 0.2·ρ
        // and the −ρ step is feasible, so the sign flips.
        let bres = DVector::from_vec(vec![0.45]);
        let xpt = InterpModel::<f64>::initial_points(2, 5, 0.5, &a, &bres);
        assert_eq!(xpt[(0, 1)], -0.5);
        assert_eq!(xpt[(0, 3)], 0.5);
    }

    #[test]
    fn promote_moves_gradient() {
        // With npt = 6 the 2-dimensional quadratic space is fully determined,
        // so the interpolant is the test quadratic itself and the moved
        // gradient can be compared against the analytic one.
        let mut model = build_quadratic_model(6);
        let old_kopt = model.kopt();
        let knew = (old_kopt + 1) % model.npt();

        model.promote(knew);
        assert_eq!(model.kopt(), knew);

        // The gradient at the new point must match the quadratic's gradient
        // there: for our test function the interpolation is exact.
        let x = model.xbase() + model.xpt().column(knew);
        let expected = DVector::from_vec(vec![
            6.0 * x[0] + x[1] - 1.0,
            4.0 * x[1] + x[0] + 0.5,
        ]);
        assert!((model.gopt() - expected).norm() <= 1e-9);
    }
}
