//! Unconstrained trust-region subproblem.
//!
//! Minimizes `gᵀd + ½ dᵀH d` subject to `‖d‖ ≤ Δ` by reducing `H` to
//! tridiagonal form and solving the secular equation for the multiplier λ of
//! `(H + λI)d = −g`, `‖d‖ = Δ` with a safeguarded, bracketed Newton
//! iteration. Nonpositive pivots of the shifted tridiagonal matrix yield
//! directions of nonpositive curvature that raise the lower bracket, and the
//! hard case is handled by appending a multiple of an approximate
//! eigendirection.
//!
//! The routine never fails: non-finite input produces a zero step and the
//! iteration count is capped.

use log::debug;
use nalgebra::{convert, DVector, Dyn, OMatrix, OVector};

use crate::core::RealField;
use crate::linalg::{self, Tridiagonal};

/// Computed step and the `crvmin` certificate.
///
/// `crvmin` is the least eigenvalue of `H` when the returned step is an
/// interior Newton step (so `H` is positive semidefinite), and zero
/// otherwise.
pub fn trust_region_step<T: RealField>(
    g: &OVector<T, Dyn>,
    h: &OMatrix<T, Dyn, Dyn>,
    delta: T,
    tol: T,
) -> (OVector<T, Dyn>, T) {
    let n = g.len();
    let zero = T::zero();
    let one = T::one();

    if !linalg::all_finite(g) || !linalg::all_finite_matrix(h) || !delta.is_finite() {
        return (DVector::zeros(n), zero);
    }

    // ‖H‖₁, which also tells whether the quadratic is purely linear.
    let mut h1norm = zero;
    for j in 0..n {
        let mut colsum = zero;
        for i in 0..n {
            colsum += h[(i, j)].abs();
        }
        h1norm = h1norm.max(colsum);
    }

    if h1norm == zero {
        let gnorm = g.norm();
        let d = if gnorm > zero {
            g * (-delta / gnorm)
        } else {
            DVector::zeros(n)
        };
        return (d, zero);
    }

    if n == 1 {
        return univariate(g[0], h[(0, 0)], delta);
    }

    let tri = Tridiagonal::reduce(h.clone_owned());
    let mut gg = g.clone_owned();
    tri.forward(&mut gg);

    let gnorm = gg.norm();
    let delsq = delta * delta;
    let itmax = 1000.min(100 * n);

    // Smallest pivot considered positive.
    let tinypiv = T::EPSILON * (one + h1norm);

    if gnorm == zero {
        // Zero gradient: either the origin is optimal (and an interior
        // Newton step), or there is negative curvature to follow to the
        // boundary.
        let evmin = least_eigenvalue(&tri, tinypiv);
        if evmin >= zero {
            return (DVector::zeros(n), evmin);
        }

        if let Err((kfail, _, piv)) = ldl_pivots(&tri, -evmin, tinypiv) {
            let mut z = OVector::<T, Dyn>::zeros(n);
            z[kfail] = one;
            for i in (0..kfail).rev() {
                z[i] = -tri.tn[i] * z[i + 1] / piv[i];
            }
            let mut d = &z * (delta / z.norm());
            tri.backward(&mut d);
            return (d, zero);
        }

        return (DVector::zeros(n), zero);
    }

    let mintd = tri.td.iter().fold(tri.td[0], |acc, &t| acc.min(t));

    let mut parl = zero.max(-mintd).max(gnorm / delta - h1norm);
    let mut parlest = parl;
    let mut par = parl;
    let mut paru: Option<T> = None;

    let mut d = OVector::<T, Dyn>::zeros(n);
    let mut zhat: Option<OVector<T, Dyn>> = None;
    let mut interior_newton = false;

    for iter in 0..itmax {
        match ldl_pivots(&tri, par, tinypiv) {
            Ok(piv) => {
                solve_shifted(&tri, &piv, &gg, &mut d);
                let dnorm = d.norm();

                if par == zero && dnorm <= delta {
                    // Interior Newton step; H is positive definite on the
                    // evidence of the pivots.
                    interior_newton = true;
                    break;
                }

                if (dnorm - delta).abs() <= tol * delta {
                    break;
                }

                if dnorm > delta {
                    parl = parl.max(par);
                    parlest = parlest.max(par);
                } else {
                    paru = Some(match paru {
                        Some(pu) => pu.min(par),
                        None => par,
                    });
                }

                // Hard case: the bracket has collapsed while the step stays
                // interior. Append a multiple of the eigendirection
                // candidate.
                if dnorm < delta {
                    if let (Some(pu), Some(z)) = (paru, zhat.as_ref()) {
                        if pu - parlest <= tol * (one + pu) {
                            if let Some(dz) =
                                hard_case_step(&tri, &d, z, par, delsq, tol)
                            {
                                d = dz;
                                break;
                            }
                        }
                    }
                }

                // Newton refinement of the secular equation through the
                // Cholesky-like factors.
                let qsq = newton_weight(&tri, &piv, &d);
                let mut parnew = par + (dnorm - delta) / delta * (dnorm * dnorm) / qsq;

                let lower = parl.max(parlest);
                match paru {
                    Some(pu) => {
                        if parnew <= lower || parnew >= pu {
                            parnew = (lower + pu) * convert(0.5);
                        }
                    }
                    None => {
                        if parnew <= lower {
                            parnew = lower + (one + lower) * convert(0.5);
                        }
                    }
                }
                par = parnew;
            }
            Err((kfail, pivfail, piv)) => {
                // T + par·I is not positive definite; extract a direction of
                // nonpositive curvature from the failing column and raise
                // the lower estimate by its Rayleigh quotient.
                let mut z = OVector::<T, Dyn>::zeros(n);
                z[kfail] = one;
                for i in (0..kfail).rev() {
                    z[i] = -tri.tn[i] * z[i + 1] / piv[i];
                }
                let zsq = z.norm_squared();

                parlest = parlest.max(par - pivfail / zsq);
                parl = parl.max(par);
                zhat = Some(z);

                par = match paru {
                    Some(pu) => (parlest.max(parl) + pu) * convert(0.5),
                    None => {
                        let base = parlest.max(parl);
                        base + (one + base) * convert(0.5)
                    }
                };
            }
        }

        if iter + 1 == itmax {
            debug!("secular iteration cap reached at par = {}", par);
        }
    }

    // Never step outside the ball, whatever path produced d.
    let dnorm = d.norm();
    if dnorm > delta && dnorm > zero {
        d *= delta / dnorm;
    }

    let crvmin = if interior_newton {
        least_eigenvalue(&tri, tinypiv)
    } else {
        zero
    };

    tri.backward(&mut d);
    (d, crvmin)
}

fn univariate<T: RealField>(g: T, h: T, delta: T) -> (OVector<T, Dyn>, T) {
    let zero = T::zero();

    let (d, crvmin) = if h > zero && (g / h).abs() <= delta {
        (-g / h, h)
    } else if g != zero {
        (if g > zero { -delta } else { delta }, zero)
    } else if h < zero {
        (delta, zero)
    } else {
        (zero, h.max(zero))
    };

    (DVector::from_element(1, d), crvmin)
}

/// LDLᵀ pivots of `T + par·I`; on a nonpositive pivot returns its index and
/// value together with the pivots computed so far.
#[allow(clippy::type_complexity)]
fn ldl_pivots<T: RealField>(
    tri: &Tridiagonal<T>,
    par: T,
    tinypiv: T,
) -> Result<OVector<T, Dyn>, (usize, T, OVector<T, Dyn>)> {
    let n = tri.td.len();
    let mut piv = OVector::<T, Dyn>::zeros(n);

    for k in 0..n {
        let mut p = tri.td[k] + par;
        if k > 0 {
            p -= tri.tn[k - 1] * tri.tn[k - 1] / piv[k - 1];
        }

        if p <= tinypiv {
            return Err((k, p, piv));
        }

        piv[k] = p;
    }

    Ok(piv)
}

/// Solves `(T + par·I)·d = −g` given the LDLᵀ pivots.
fn solve_shifted<T: RealField>(
    tri: &Tridiagonal<T>,
    piv: &OVector<T, Dyn>,
    g: &OVector<T, Dyn>,
    d: &mut OVector<T, Dyn>,
) {
    let n = tri.td.len();

    // Forward substitution with the unit bidiagonal factor.
    d[0] = -g[0];
    for k in 1..n {
        d[k] = -g[k] - tri.tn[k - 1] / piv[k - 1] * d[k - 1];
    }

    // Diagonal and transposed factor.
    for k in 0..n {
        d[k] /= piv[k];
    }
    for k in (0..n.saturating_sub(1)).rev() {
        let t = tri.tn[k] / piv[k] * d[k + 1];
        d[k] -= t;
    }
}

/// The weight `‖q‖²` of the secular Newton step, where `Rᵀq = d` for the
/// Cholesky factor `R` of the shifted matrix.
fn newton_weight<T: RealField>(
    tri: &Tridiagonal<T>,
    piv: &OVector<T, Dyn>,
    d: &OVector<T, Dyn>,
) -> T {
    let n = tri.td.len();

    let mut u = OVector::<T, Dyn>::zeros(n);
    u[0] = d[0];
    for k in 1..n {
        u[k] = d[k] - tri.tn[k - 1] / piv[k - 1] * u[k - 1];
    }

    let mut qsq = T::zero();
    for k in 0..n {
        qsq += u[k] * u[k] / piv[k];
    }
    qsq
}

/// Appends `γ·z` to a strictly interior step so that the result reaches the
/// boundary, provided the z-direction carries little enough energy of the
/// shifted quadratic.
fn hard_case_step<T: RealField>(
    tri: &Tridiagonal<T>,
    d: &OVector<T, Dyn>,
    z: &OVector<T, Dyn>,
    par: T,
    delsq: T,
    tol: T,
) -> Option<OVector<T, Dyn>> {
    let zero = T::zero();

    let dsq = d.norm_squared();
    let zsq = z.norm_squared();
    if zsq == zero {
        return None;
    }

    let b = d.dot(z);
    let disc = (b * b + zsq * (delsq - dsq)).sqrt();
    let gamma = if b >= zero {
        (delsq - dsq) / (b + disc)
    } else {
        (disc - b) / zsq
    };

    // Shifted-curvature energies of the accepted step and of the correction.
    let td = tri.mul(d);
    let tz = tri.mul(z);
    let wsq = d.dot(&td) + par * dsq;
    let wwsq = z.dot(&tz) + par * zsq;

    if tol * (wsq + par * delsq) - gamma * gamma * wwsq >= zero {
        Some(d + z * gamma)
    } else {
        None
    }
}

/// Least eigenvalue of the tridiagonal matrix by Sturm-sequence bisection.
fn least_eigenvalue<T: RealField>(tri: &Tridiagonal<T>, tinypiv: T) -> T {
    let n = tri.td.len();
    let zero = T::zero();
    let half: T = convert(0.5);

    // Gershgorin-style lower bound and the trivial upper bound min(td).
    let mut lo = tri.td[0];
    let mut hi = tri.td[0];
    for k in 0..n {
        let mut off = zero;
        if k > 0 {
            off += tri.tn[k - 1].abs();
        }
        if k + 1 < n {
            off += tri.tn[k].abs();
        }
        lo = lo.min(tri.td[k] - off);
        hi = hi.min(tri.td[k]);
    }

    let nonpos_pivots = |sigma: T| -> usize {
        let mut count = 0;
        let mut prev = T::one();
        for k in 0..n {
            let mut p = tri.td[k] - sigma;
            if k > 0 {
                if prev.abs() <= tinypiv {
                    prev = if prev < zero { -tinypiv } else { tinypiv };
                }
                p -= tri.tn[k - 1] * tri.tn[k - 1] / prev;
            }
            if p <= zero {
                count += 1;
            }
            prev = p;
        }
        count
    };

    for _ in 0..64 {
        let mid = (lo + hi) * half;
        if mid <= lo || mid >= hi {
            break;
        }
        if nonpos_pivots(mid) == 0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    (lo + hi) * half
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector, DMatrix, DVector};

    use super::*;

    fn model_value(g: &DVector<f64>, h: &DMatrix<f64>, d: &DVector<f64>) -> f64 {
        g.dot(d) + 0.5 * (h * d).dot(d)
    }

    #[test]
    fn newton_step_inside_region() {
        let h = dmatrix![2.0, 0.0; 0.0, 4.0];
        let g = dvector![-0.2, 0.4];

        let (d, crvmin) = trust_region_step(&g, &h, 10.0, 1e-10);

        assert!((d[0] - 0.1).abs() <= 1e-9);
        assert!((d[1] + 0.1).abs() <= 1e-9);
        assert!((crvmin - 2.0).abs() <= 1e-6);
    }

    #[test]
    fn boundary_step_for_identity_hessian() {
        let h = DMatrix::identity(3, 3);
        let g = dvector![3.0, 0.0, 4.0];
        let delta = 1.0;

        let (d, crvmin) = trust_region_step(&g, &h, delta, 1e-8);

        // Solution is −Δ·g/‖g‖.
        assert!((d.norm() - delta).abs() <= 1e-6);
        assert!((d[0] + 0.6).abs() <= 1e-6);
        assert!((d[2] + 0.8).abs() <= 1e-6);
        assert_eq!(crvmin, 0.0);
    }

    #[test]
    fn zero_hessian_goes_downhill_to_boundary() {
        let h = DMatrix::zeros(2, 2);
        let g = dvector![1.0, 0.0];

        let (d, crvmin) = trust_region_step(&g, &h, 0.5, 1e-8);

        assert!((d[0] + 0.5).abs() <= 1e-12);
        assert_eq!(d[1], 0.0);
        assert_eq!(crvmin, 0.0);
    }

    #[test]
    fn indefinite_hessian_reaches_boundary() {
        let h = dmatrix![-2.0, 0.0; 0.0, 1.0];
        let g = dvector![0.3, 0.1];
        let delta = 1.5;

        let (d, crvmin) = trust_region_step(&g, &h, delta, 1e-8);

        assert!(d.norm() <= delta * (1.0 + 1e-8));
        assert!((d.norm() - delta).abs() <= 1e-4 * delta);
        assert_eq!(crvmin, 0.0);

        // Must be at least as good as the plain gradient point on the
        // boundary.
        let cauchy = -&g * (delta / g.norm());
        assert!(model_value(&g, &h, &d) <= model_value(&g, &h, &cauchy) + 1e-10);
    }

    #[test]
    fn hard_case_appends_eigendirection() {
        // g is orthogonal to the eigenvector of the least eigenvalue.
        let h = dmatrix![-2.0, 0.0; 0.0, 1.0];
        let g = dvector![0.0, 1.0];
        let delta = 1.0;

        let (d, crvmin) = trust_region_step(&g, &h, delta, 1e-6);

        assert!(d.norm() <= delta * (1.0 + 1e-8));
        assert_eq!(crvmin, 0.0);

        // Optimal value is −7/6, attained at (±√8/3, −1/3).
        let value = model_value(&g, &h, &d);
        assert!(value <= -7.0 / 6.0 + 2e-2, "value = {}", value);
    }

    #[test]
    fn zero_gradient_with_negative_curvature() {
        let h = dmatrix![-2.0, 0.0; 0.0, 1.0];
        let g = dvector![0.0, 0.0];
        let delta = 2.0;

        let (d, crvmin) = trust_region_step(&g, &h, delta, 1e-8);

        assert!((d.norm() - delta).abs() <= 1e-9);
        assert!(model_value(&g, &h, &d) < 0.0);
        assert_eq!(crvmin, 0.0);
    }

    #[test]
    fn non_finite_input_gives_zero_step() {
        let h = dmatrix![f64::NAN, 0.0; 0.0, 1.0];
        let g = dvector![1.0, 1.0];

        let (d, crvmin) = trust_region_step(&g, &h, 1.0, 1e-8);

        assert_eq!(d, dvector![0.0, 0.0]);
        assert_eq!(crvmin, 0.0);
    }

    #[test]
    fn univariate_cases() {
        let h = dmatrix![2.0];
        let (d, crvmin) = trust_region_step(&dvector![1.0], &h, 5.0, 1e-8);
        assert_eq!(d[0], -0.5);
        assert_eq!(crvmin, 2.0);

        let (d, crvmin) = trust_region_step(&dvector![1.0], &h, 0.1, 1e-8);
        assert_eq!(d[0], -0.1);
        assert_eq!(crvmin, 0.0);

        let h = dmatrix![-1.0];
        let (d, _) = trust_region_step(&dvector![0.0], &h, 0.7, 1e-8);
        assert_eq!(d[0], 0.7);
    }

    #[test]
    fn predicted_reduction_is_near_optimal() {
        // Compare against dense sampling of the boundary circle plus the
        // interior Newton point for a generic 2-D quadratic.
        let h = dmatrix![1.0, 0.8; 0.8, -0.5];
        let g = dvector![0.4, -0.3];
        let delta = 0.9;
        let tol = 1e-6;

        let (d, _) = trust_region_step(&g, &h, delta, tol);
        let value = model_value(&g, &h, &d);

        let mut best = 0.0f64;
        for i in 0..2000 {
            let theta = i as f64 * std::f64::consts::TAU / 2000.0;
            let p = dvector![delta * theta.cos(), delta * theta.sin()];
            best = best.min(model_value(&g, &h, &p));
        }

        // −value ≥ (1 − τ)·maxred with a generous τ for the sampled
        // reference.
        assert!(-value >= 0.999 * -best, "{} vs {}", value, best);
    }
}
