//! Model-improving step.
//!
//! Replacing sample `knew` keeps the interpolation set well conditioned when
//! the new point makes the `knew`-th Lagrange function large in magnitude.
//! The step is assembled from two cheap candidates, the projected Lagrange
//! gradient and the line through the sample being replaced, trimmed against
//! the constraints that can matter inside the trust region.

use nalgebra::{convert, DVector, Dyn, OMatrix, OVector};

use super::constrained::ActiveSet;
use crate::core::RealField;
use crate::model::{InterpModel, ModelError};

/// Result of the geometry step construction.
#[derive(Debug, Clone)]
pub struct GeometryStep<T: RealField> {
    /// Step from `xopt`, of length at most the given radius.
    pub step: OVector<T, Dyn>,
    /// Whether the step satisfies every constraint residual.
    pub ifeas: bool,
}

/// Computes a step of length at most `delta` from `xopt` that approximately
/// maximizes `|L_knew(xopt + step)|`, honoring the constraints that are
/// near-active at `xopt` (`rescon[j] ≥ 0`).
pub fn geometry_step<T: RealField>(
    model: &InterpModel<T>,
    knew: usize,
    delta: T,
    a: &OMatrix<T, Dyn, Dyn>,
    rescon: &OVector<T, Dyn>,
    actset: &ActiveSet<T>,
) -> Result<GeometryStep<T>, ModelError> {
    let n = model.n();
    let zero = T::zero();
    let one = T::one();
    let half: T = convert(0.5);

    debug_assert!(knew != model.kopt());

    let coeff = model.lagrange_coeff(knew)?;
    let glag = model.lagrange_grad(knew)?;

    // The Lagrange function is zero at xopt (knew ≠ kopt) and purely
    // implicit in its Hessian.
    let lag_value = |s: &OVector<T, Dyn>| -> T {
        let mut value = glag.dot(s);
        for k in 0..model.npt() {
            let ck = coeff[k];
            if ck != zero {
                let xk = model.xpt().column(k);
                let t = xk.dot(s);
                value += half * ck * t * t;
            }
        }
        value
    };

    // Scale a candidate back until the near-active constraints accept it.
    let trim = |s: &mut OVector<T, Dyn>| {
        let mut scale = one;
        for j in 0..a.ncols() {
            if rescon[j] >= zero {
                let ad = a.column(j).dot(&*s);
                if ad > rescon[j] && ad > zero {
                    scale = scale.min(rescon[j] / ad);
                }
            }
        }
        if scale < one {
            *s *= scale;
        }
    };

    // Candidate along the projected Lagrange gradient, trying both signs.
    let mut gdir = actset.project(&glag);
    if gdir.norm() <= T::EPSILON_SQRT * (one + glag.norm()) {
        gdir = glag.clone_owned();
    }

    let mut best: Option<(OVector<T, Dyn>, T)> = None;
    let gnorm = gdir.norm();
    if gnorm > zero {
        for sign in [one, -one] {
            let mut s = &gdir * (sign * delta / gnorm);
            trim(&mut s);
            let value = lag_value(&s).abs();
            if best.as_ref().map_or(true, |(_, v)| value > *v) {
                best = Some((s, value));
            }
        }
    }

    // Candidate along the line through the sample being replaced.
    let u = model.xpt().column(knew) - model.xopt();
    let unorm = u.norm();
    if unorm > zero {
        let tmax = delta / unorm;
        let mut ts = vec![tmax, -tmax];

        // Interior extremum of the quadratic in t, when it exists.
        let gu = glag.dot(&u);
        let mut uhu = zero;
        for k in 0..model.npt() {
            let ck = coeff[k];
            if ck != zero {
                let t = model.xpt().column(k).dot(&u);
                uhu += ck * t * t;
            }
        }
        if uhu != zero {
            let tstar = -gu / uhu;
            if tstar.abs() <= tmax {
                ts.push(tstar);
            }
        }

        for t in ts {
            let mut s = &u * t;
            trim(&mut s);
            let value = lag_value(&s).abs();
            if best.as_ref().map_or(true, |(_, v)| value > *v) {
                best = Some((s, value));
            }
        }
    }

    let step = best.map(|(s, _)| s).unwrap_or_else(|| DVector::zeros(n));

    // The step was built against the near-active constraints only; report
    // whether it in fact respects every residual.
    let feastol = T::EPSILON_SQRT * (one + delta);
    let mut ifeas = true;
    for j in 0..a.ncols() {
        if rescon[j] >= zero && a.column(j).dot(&step) > rescon[j] + feastol {
            ifeas = false;
            break;
        }
    }

    Ok(GeometryStep { step, ifeas })
}

#[cfg(test)]
mod tests {
    use nalgebra::{DMatrix, DVector};

    use super::*;
    use crate::model::tests::build_quadratic_model;

    #[test]
    fn step_is_bounded_and_improves_the_lagrange_function() {
        let model = build_quadratic_model(6);
        let knew = (model.kopt() + 1) % model.npt();
        let delta = 0.4;

        let a = DMatrix::zeros(2, 0);
        let rescon = DVector::zeros(0);
        let actset = ActiveSet::new(2);

        let result = geometry_step(&model, knew, delta, &a, &rescon, &actset).unwrap();

        assert!(result.step.norm() <= delta * (1.0 + 1e-12));
        assert!(result.ifeas);

        // Cross-check the Lagrange value through the factorization: the
        // knew-th entry of vlag is exactly L_knew at the trial point.
        let (vlag, _) = model.vlag_beta(&result.step);
        assert!(
            vlag[knew].abs() >= 0.05,
            "geometry step produced a weak Lagrange value: {}",
            vlag[knew],
        );
    }

    #[test]
    fn step_respects_near_active_constraints() {
        let model = build_quadratic_model(6);
        let knew = (model.kopt() + 2) % model.npt();
        let delta = 0.4;

        // A tight constraint at xopt: only 0.01 of slack along +x₀.
        let a = DMatrix::from_column_slice(2, 1, &[1.0, 0.0]);
        let rescon = DVector::from_vec(vec![0.01]);
        let actset = ActiveSet::new(2);

        let result = geometry_step(&model, knew, delta, &a, &rescon, &actset).unwrap();

        assert!(a.column(0).dot(&result.step) <= 0.01 + 1e-7);
        assert!(result.ifeas);
    }

    #[test]
    fn lagrange_values_agree_between_formulations() {
        let model = build_quadratic_model(6);
        let knew = (model.kopt() + 1) % model.npt();

        let coeff = model.lagrange_coeff(knew).unwrap();
        let glag = model.lagrange_grad(knew).unwrap();

        let s = DVector::from_vec(vec![0.13, -0.21]);
        let mut direct = glag.dot(&s);
        for k in 0..model.npt() {
            let t = model.xpt().column(k).dot(&s);
            direct += 0.5 * coeff[k] * t * t;
        }

        let (vlag, _) = model.vlag_beta(&s);
        assert!(
            (direct - vlag[knew]).abs() <= 1e-9,
            "{} vs {}",
            direct,
            vlag[knew],
        );
    }
}
