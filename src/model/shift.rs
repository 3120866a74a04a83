//! Re-expressing the model relative to a new base point.

use log::debug;
use nalgebra::{convert, DVector, Dyn, OVector};

use super::InterpModel;
use crate::core::RealField;

impl<T: RealField> InterpModel<T> {
    /// Moves the base point to the current best sample without changing the
    /// interpolant.
    ///
    /// The sample offsets, the explicit Hessian and the `BMAT` factor are
    /// rewritten in closed form; `ZMAT`, the inertia count, the values and
    /// the gradient at `xopt` are unaffected. Intended to be called when
    /// `‖xopt‖` grows large relative to the trust radius, where the shifted
    /// coordinates suffer less cancellation.
    pub fn shift_base(&mut self) {
        let n = self.n();
        let npt = self.npt();
        let half: T = convert(0.5);
        let quarter: T = convert(0.25);

        let xopt = self.xopt();
        let xoptsq = xopt.norm_squared();

        if xoptsq == T::zero() {
            return;
        }

        debug!("shifting the model base by {:?}", xopt.as_slice());

        // Absorb the implicit-Hessian cross terms into the explicit block:
        // HQ += xopt·vᵀ + v·xoptᵀ with v = XPT·PQ − ½·(Σ pq)·xopt.
        let sumpq = self.pq.sum();
        let mut v = &self.xpt * &self.pq;
        v.axpy(-half * sumpq, &xopt, T::one());

        for j in 0..n {
            for i in 0..n {
                self.hq[(i, j)] += xopt[i] * v[j] + v[i] * xopt[j];
            }
        }

        // First half-shift of the points; the helper quantities below are
        // expressed through the half-shifted coordinates.
        let w1: OVector<T, Dyn> = DVector::from_iterator(
            npt,
            (0..npt).map(|k| self.xpt.column(k).dot(&xopt) - half * xoptsq),
        );

        for k in 0..npt {
            for i in 0..n {
                self.xpt[(i, k)] -= half * xopt[i];
            }
        }

        let qxoptq = quarter * xoptsq;

        // Symmetric-block revision from the old BMAT columns.
        for k in 0..npt {
            let bk = self.bmat.column(k).into_owned();
            let mut u = self.xpt.column(k) * w1[k];
            u.axpy(qxoptq, &xopt, T::one());

            for j in 0..n {
                for i in 0..n {
                    self.bmat[(i, npt + j)] += bk[i] * u[j] + u[i] * bk[j];
                }
            }
        }

        // Revisions that depend on ZMAT, one column at a time.
        for jz in 0..self.zmat.ncols() {
            let zj = self.zmat.column(jz).into_owned();
            let sumz = zj.sum();

            let mut vz = OVector::<T, Dyn>::zeros(n);
            for k in 0..npt {
                vz.axpy(w1[k] * zj[k], &self.xpt.column(k), T::one());
            }
            vz.axpy(qxoptq * sumz, &xopt, T::one());

            let sign = if jz < self.idz { -T::one() } else { T::one() };

            for k in 0..npt {
                let t = sign * zj[k];
                for i in 0..n {
                    self.bmat[(i, k)] += t * vz[i];
                }
            }

            for j in 0..n {
                let t = sign * vz[j];
                for i in 0..n {
                    self.bmat[(i, npt + j)] += t * vz[i];
                }
            }
        }

        // Second half-shift completes the move.
        for k in 0..npt {
            for i in 0..n {
                self.xpt[(i, k)] -= half * xopt[i];
            }
        }

        self.xbase += &xopt;
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use crate::model::tests::{build_quadratic_model, check_inverse, quadratic};

    #[test]
    fn shift_preserves_the_interpolant() {
        let mut model = build_quadratic_model(6);

        // Walk the best point away from the base first.
        for i in 0..4 {
            let step = DVector::from_vec(vec![0.25 + 0.05 * i as f64, -0.2]);
            let x = model.xbase() + model.xopt() + &step;
            let f = quadratic(&x);
            let diff = f - model.eval_quad(&step) - model.fopt();
            let knew = model.update(None, &step, f, diff).unwrap();
            if f < model.fopt() {
                model.promote(knew);
            }
        }

        let xopt_abs = model.xbase() + model.xopt();
        let gopt_before = model.gopt().clone();
        let probe = DVector::from_vec(vec![0.11, 0.07]);
        let quad_before = model.eval_quad(&probe);

        model.shift_base();

        // Base moved onto the best point, offsets follow.
        assert!((model.xbase() - &xopt_abs).norm() <= 1e-12);
        assert!(model.xopt().norm() <= 1e-12);

        // The quadratic is untouched: same gradient at xopt, same values
        // along a probe direction.
        assert!((model.gopt() - gopt_before).norm() <= 1e-9);
        assert!((model.eval_quad(&probe) - quad_before).abs() <= 1e-9);

        // And the factorization still inverts the (new) interpolation
        // matrix.
        check_inverse(&model, 1e-6);
    }
}
